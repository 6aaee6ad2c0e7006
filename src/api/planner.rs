//! Planner seam and the built-in static GEMM planner.

use std::collections::BTreeMap;

use crate::config::HwConfig;
use crate::diagnostic::Result;
use crate::ir::builder::grid_size_name;
use crate::ir::{AccessOp, Dim, Expr, Layout, ScalarType, Tile, Type, Var};
use crate::kernel::{
    CoordEntry, CoordInfo, EpiloguePlan, FmaKind, FmaPlan, Grid, GridAxis, KernelDesc, Plan,
    PrefetchPlan, Prop, SendBlock, SendPlan, Stage, StorePlan, StreamKSchedule, TensorKind,
    X2rFmaPlan, X2rPlan,
};

/// Launch shape and host-side scalar values of a planned kernel.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Launch {
    /// Work items per thread group.
    pub local_size: [u32; 3],
    /// Thread groups per grid axis.
    pub groups: [u32; 3],
    /// Values of the scalar kernel arguments the plan introduces.
    pub scalars: BTreeMap<String, i64>,
    pub stream_k: Option<StreamKSchedule>,
}

/// Chooses tiles, layouts and instructions for a descriptor.
pub trait Planner: Sync {
    fn name(&self) -> &str;

    /// `None` when no plan exists for the descriptor on `hw`.
    fn plan(&self, desc: &KernelDesc, hw: &HwConfig) -> Option<Plan>;

    fn launch(&self, desc: &KernelDesc, plan: &Plan) -> Result<Launch>;
}

// ─── StaticGemmPlanner ────────────────────────────────────────────

/// Fixed per-thread tiles for plain f32 `dst[m, n] = src[m, k] * wei[k, n]`
/// with vector multiply-adds. Problem sizes must divide evenly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StaticGemmPlanner {
    /// Rows of `dst` per thread.
    pub m_tile: i64,
    /// Columns of `dst` per thread; a multiple of the SIMD width.
    pub n_tile: i64,
    /// Reduction step per loop iteration.
    pub k_tile: i64,
}

impl Default for StaticGemmPlanner {
    fn default() -> Self {
        Self {
            m_tile: 4,
            n_tile: 16,
            k_tile: 8,
        }
    }
}

/// Extents derived from a descriptor the planner accepts.
struct Dims {
    m: i64,
    n: i64,
    k: i64,
    /// Threads per group along m and n.
    tm: i64,
    tn: i64,
}

impl StaticGemmPlanner {
    pub fn new(m_tile: i64, n_tile: i64, k_tile: i64) -> Self {
        Self {
            m_tile,
            n_tile,
            k_tile,
        }
    }

    fn dims(&self, desc: &KernelDesc) -> Option<Dims> {
        let (dm, dn, dk) = (Dim::new("m"), Dim::new("n"), Dim::new("k"));
        let plain = desc.prop == Prop::Fwd
            && desc.src.dims == [dm.clone(), dk.clone()]
            && desc.wei.dims == [dk.clone(), dn.clone()]
            && desc.dst.dims == [dm.clone(), dn.clone()]
            && desc.loop_desc == [dk.clone()];
        let f32_only = [desc.src.ty, desc.wei.ty, desc.dst.ty]
            .iter()
            .all(|&t| t == ScalarType::F32);
        if !plain || !f32_only || desc.simd == 0 {
            return None;
        }
        let d = Dims {
            m: desc.shape.get(&dm)?,
            n: desc.shape.get(&dn)?,
            k: desc.shape.get(&dk)?,
            tm: desc.thread_group_tile.get_or(&dm, 1),
            tn: desc.thread_group_tile.get_or(&dn, 1),
        };
        let simd = i64::from(desc.simd);
        let fits = self.m_tile > 0
            && self.k_tile > 0
            && self.n_tile % simd == 0
            && d.tm > 0
            && d.tn > 0
            && d.m % (d.tm * self.m_tile) == 0
            && d.n % (d.tn * self.n_tile) == 0
            && d.k % self.k_tile == 0;
        fits.then_some(d)
    }

    fn grid_size(&self, d: &Dims) -> (i64, i64) {
        (d.m / (d.tm * self.m_tile), d.n / (d.tn * self.n_tile))
    }
}

fn coord(dim: &str, tg: bool, thr: bool, loop_size: i64) -> CoordEntry {
    CoordEntry {
        dim: Dim::new(dim),
        tg_idx: tg.then(|| Var::s32(format!("{}_tg_idx", dim))),
        thr_idx: thr.then(|| Var::s32(format!("{}_thr_idx", dim))),
        loop_idx: (loop_size > 1).then(|| Var::s32(format!("{}_loop_idx", dim))),
        loop_size: Expr::int(loop_size),
    }
}

fn bytes(e: Expr, scale: i64) -> Expr {
    e.cast(Type::s64()) * scale
}

impl Planner for StaticGemmPlanner {
    fn name(&self) -> &str {
        "static_gemm"
    }

    fn plan(&self, desc: &KernelDesc, _hw: &HwConfig) -> Option<Plan> {
        let d = self.dims(desc)?;
        let (mt, nt, kt) = (self.m_tile, self.n_tile, self.k_tile);
        let elem = i64::from(ScalarType::F32.size());
        let (dm, dn) = (Dim::new("m"), Dim::new("n"));

        let thr_grid = Grid {
            axes: vec![GridAxis {
                dims: vec![(dn.clone(), Expr::int(d.tn)), (dm.clone(), Expr::int(d.tm))],
            }],
        };
        let grid_size = |dim: &Dim| Expr::const_var(grid_size_name(dim), Type::s32());
        let tg_grid = Grid {
            axes: vec![GridAxis {
                dims: vec![(dn.clone(), grid_size(&dn)), (dm.clone(), grid_size(&dm))],
            }],
        };
        let coord_info = CoordInfo {
            entries: vec![
                coord("m", true, true, 1),
                coord("n", true, true, 1),
                coord("k", false, false, d.k / kt),
            ],
        };

        let origin = |dim: &str, threads: i64, tile: i64| {
            let tg = Var::s32(format!("{}_tg_idx", dim)).expr();
            let thr = Var::s32(format!("{}_thr_idx", dim)).expr();
            (tg * threads + thr) * tile
        };
        let m0 = origin("m", d.tm, mt);
        let n0 = origin("n", d.tn, nt);

        let a_layout = Layout::dense(ScalarType::F32, &[("k", kt), ("m", mt)]);
        let a_load = SendPlan {
            op: AccessOp::Load,
            ty: ScalarType::F32,
            base: bytes(m0.clone(), d.k * elem),
            loop_strides: BTreeMap::from([(Dim::new("k"), kt * elem)]),
            blocks: (0..mt)
                .map(|r| SendBlock {
                    mem_off: r * d.k * elem,
                    reg_off: r * kt * elem,
                    bytes: (kt * elem) as u32,
                })
                .collect(),
            reg_layout: a_layout.clone(),
        };
        let b_layout = Layout::dense(ScalarType::F32, &[("n", nt), ("k", kt)]);
        let b_load = SendPlan {
            op: AccessOp::Load,
            ty: ScalarType::F32,
            base: bytes(n0.clone(), elem),
            loop_strides: BTreeMap::from([(Dim::new("k"), kt * d.n * elem)]),
            blocks: (0..kt)
                .map(|kk| SendBlock {
                    mem_off: kk * d.n * elem,
                    reg_off: kk * nt * elem,
                    bytes: (nt * elem) as u32,
                })
                .collect(),
            reg_layout: b_layout.clone(),
        };
        let c_layout = Layout::dense(ScalarType::F32, &[("n", nt), ("m", mt)]);

        let prefetch = if desc.prefetch_dist > 0 {
            PrefetchPlan {
                a: Some(SendPlan {
                    op: AccessOp::Prefetch,
                    ..a_load.clone()
                }),
                b: Some(SendPlan {
                    op: AccessOp::Prefetch,
                    ..b_load.clone()
                }),
            }
        } else {
            PrefetchPlan::default()
        };

        let x2r = |tensor, load: SendPlan, layout: Layout| {
            Stage::X2r(X2rPlan {
                tensor,
                load,
                reorder: None,
                layout,
                bias_layout: None,
            })
        };
        let x2r_fma = X2rFmaPlan {
            stages: vec![
                x2r(TensorKind::A, a_load, a_layout.clone()),
                x2r(TensorKind::B, b_load, b_layout.clone()),
                Stage::Fma(FmaPlan {
                    kind: FmaKind::Mad,
                    simd: desc.simd,
                    inst_tile: Tile::from_pairs([("m", 1), ("n", i64::from(desc.simd)), ("k", 1)]),
                    a_layout,
                    b_layout,
                    c_layout: c_layout.clone(),
                }),
            ],
            c_layout: c_layout.clone(),
            bias_layout: None,
        };

        let store_layout = Layout::dense(ScalarType::F32, &[("n", nt)]);
        let c_store = SendPlan {
            op: AccessOp::Store,
            ty: ScalarType::F32,
            base: bytes(m0.clone() * d.n + n0.clone(), elem),
            loop_strides: BTreeMap::new(),
            blocks: vec![SendBlock {
                mem_off: 0,
                reg_off: 0,
                bytes: (nt * elem) as u32,
            }],
            reg_layout: store_layout,
        };
        let epilogue = EpiloguePlan {
            c_reg_layout: c_layout,
            c_coord: BTreeMap::from([(dm, m0), (dn, n0)]),
            store: StorePlan {
                tile: Tile::from_pairs([("m", 1), ("n", nt)]),
                c_store,
                tile_strides: BTreeMap::from([(Dim::new("m"), d.n * elem), (Dim::new("n"), elem)]),
                bias_store: None,
                bias_reorder: None,
            },
            slm_reduce: None,
            bias_layout: None,
            bias_reduce_cond: None,
        };

        Some(Plan {
            simd: desc.simd,
            thr_grid,
            tg_grid,
            virt_grid: Vec::new(),
            coord_info,
            external_lets: Vec::new(),
            prefetch,
            x2r_fma,
            epilogue,
        })
    }

    fn launch(&self, desc: &KernelDesc, _plan: &Plan) -> Result<Launch> {
        let mut launch = Launch::default();
        let Some(d) = self.dims(desc) else {
            return Ok(launch);
        };
        let (gm, gn) = self.grid_size(&d);
        launch.local_size = [desc.simd * (d.tm * d.tn) as u32, 1, 1];
        launch
            .scalars
            .insert(grid_size_name(&Dim::new("m")), gm);
        launch
            .scalars
            .insert(grid_size_name(&Dim::new("n")), gn);
        if desc.use_stream_k {
            let sched = StreamKSchedule::new(
                (gm * gn) as u32,
                (d.k / self.k_tile) as u32,
                desc.stream_k_batches,
                desc.stream_k_groups,
            )?;
            let (groups, batches) = sched.thread_groups();
            launch.groups = [groups, batches, 1];
            launch.scalars.extend(sched.kernel_args());
            launch.stream_k = Some(sched);
        } else {
            launch.groups = [(gm * gn) as u32, 1, 1];
        }
        Ok(launch)
    }
}
