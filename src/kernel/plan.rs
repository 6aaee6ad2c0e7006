//! The plan: layouts, tiles and instruction choices for one kernel.
//!
//! Plans come from a `Planner` and are read-only for the builders. All
//! memory offsets are in bytes; register layouts describe the register
//! side of each transfer.

use std::collections::BTreeMap;
use std::fmt;

use crate::ir::{AccessOp, Dim, Expr, Layout, ScalarType, Tile, Var};

// ─── Grids ────────────────────────────────────────────────────────

/// One axis of a launch grid. Dimensions are listed fastest first; each
/// carries its extent on the axis.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GridAxis {
    pub dims: Vec<(Dim, Expr)>,
}

/// Thread or thread-group grid. Axis `i` is indexed by hardware id `i`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Grid {
    pub axes: Vec<GridAxis>,
}

impl Grid {
    pub fn axis_of(&self, dim: &Dim) -> Option<usize> {
        self.axes
            .iter()
            .position(|a| a.dims.iter().any(|(d, _)| d == dim))
    }

    /// Index of `dim` within a linear index `base` of its axis: divide by
    /// the extents of faster dims, then take the modulo of its own extent
    /// unless it is the slowest dim.
    pub fn unpack(&self, dim: &Dim, base: Expr) -> Option<Expr> {
        let axis = &self.axes[self.axis_of(dim)?];
        let mut value = base;
        let n = axis.dims.len();
        for (i, (d, size)) in axis.dims.iter().enumerate() {
            if d == dim {
                if i + 1 == n {
                    return Some(value);
                }
                return Some(value % size.clone());
            }
            value = value / size.clone();
        }
        None
    }

    pub fn dims(&self) -> impl Iterator<Item = &Dim> {
        self.axes.iter().flat_map(|a| a.dims.iter().map(|(d, _)| d))
    }
}

// ─── Coordinates ──────────────────────────────────────────────────

/// How a problem dimension is split between thread groups, threads and
/// the reduction loop.
#[derive(Clone, Debug, PartialEq)]
pub struct CoordEntry {
    pub dim: Dim,
    pub tg_idx: Option<Var>,
    pub thr_idx: Option<Var>,
    pub loop_idx: Option<Var>,
    /// Loop trip count along `dim`; 1 when `dim` is not looped over.
    pub loop_size: Expr,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CoordInfo {
    pub entries: Vec<CoordEntry>,
}

impl CoordInfo {
    pub fn get(&self, dim: &Dim) -> Option<&CoordEntry> {
        self.entries.iter().find(|e| &e.dim == dim)
    }

    pub fn loop_size(&self, dim: &Dim) -> Expr {
        self.get(dim)
            .map(|e| e.loop_size.clone())
            .unwrap_or_else(|| Expr::int(1))
    }

    pub fn loop_index(&self, dim: &Dim) -> Var {
        self.get(dim)
            .and_then(|e| e.loop_idx.clone())
            .unwrap_or_else(|| Var::s32(format!("{}_loop_idx", dim)))
    }

    pub fn tg_index(&self, dim: &Dim) -> Option<&Var> {
        self.get(dim).and_then(|e| e.tg_idx.as_ref())
    }

    pub fn thr_index(&self, dim: &Dim) -> Option<&Var> {
        self.get(dim).and_then(|e| e.thr_idx.as_ref())
    }
}

// ─── Memory transfers ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SendBlock {
    pub mem_off: i64,
    pub reg_off: i64,
    pub bytes: u32,
}

/// A group of contiguous transfers between one memory tensor and one
/// register tile. The address of block `j` at loop position `idx` is
/// `base + sum(idx[d] * loop_strides[d]) + blocks[j].mem_off`.
#[derive(Clone, Debug, PartialEq)]
pub struct SendPlan {
    pub op: AccessOp,
    pub ty: ScalarType,
    /// Byte offset of the tile origin; s64.
    pub base: Expr,
    pub loop_strides: BTreeMap<Dim, i64>,
    pub blocks: Vec<SendBlock>,
    pub reg_layout: Layout,
}

impl SendPlan {
    pub fn reg_bytes(&self) -> u32 {
        self.reg_layout.size()
    }

    pub fn total_bytes(&self) -> u32 {
        self.blocks.iter().map(|b| b.bytes).sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ReorderPlan {
    pub src: Layout,
    pub dst: Layout,
}

// ─── Load + multiply ──────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TensorKind {
    A,
    B,
    C,
}

impl TensorKind {
    pub fn name(self) -> &'static str {
        match self {
            TensorKind::A => "a",
            TensorKind::B => "b",
            TensorKind::C => "c",
        }
    }
}

impl fmt::Display for TensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct X2rPlan {
    pub tensor: TensorKind,
    pub load: SendPlan,
    /// Present when the loaded layout differs from `layout`.
    pub reorder: Option<ReorderPlan>,
    /// Register layout the multiply stage reads.
    pub layout: Layout,
    /// Bias accumulator layout when the operand feeds a bias reduction.
    pub bias_layout: Option<Layout>,
}

impl X2rPlan {
    /// Size of the operand register buffer.
    pub fn reg_bytes(&self) -> u32 {
        match &self.reorder {
            Some(r) => r.dst.size(),
            None => self.load.reg_bytes(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FmaKind {
    /// Per-lane vector multiply-add.
    Mad,
    /// Systolic multiply-add.
    Dpas,
    /// Systolic multiply-add sharing operands between thread pairs.
    Dpasw,
}

impl FmaKind {
    pub fn name(self) -> &'static str {
        match self {
            FmaKind::Mad => "mad",
            FmaKind::Dpas => "dpas",
            FmaKind::Dpasw => "dpasw",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FmaPlan {
    pub kind: FmaKind,
    pub simd: u32,
    /// Extents covered by one instruction.
    pub inst_tile: Tile,
    pub a_layout: Layout,
    pub b_layout: Layout,
    pub c_layout: Layout,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    X2r(X2rPlan),
    Fma(FmaPlan),
}

#[derive(Clone, Debug, PartialEq)]
pub struct X2rFmaPlan {
    pub stages: Vec<Stage>,
    pub c_layout: Layout,
    pub bias_layout: Option<Layout>,
}

impl X2rFmaPlan {
    pub fn x2r(&self, kind: TensorKind) -> impl Iterator<Item = &X2rPlan> {
        self.stages.iter().filter_map(move |s| match s {
            Stage::X2r(x) if x.tensor == kind => Some(x),
            _ => None,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PrefetchPlan {
    pub a: Option<SendPlan>,
    pub b: Option<SendPlan>,
}

// ─── Epilogue ─────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct StorePlan {
    /// Extent stored per step.
    pub tile: Tile,
    /// Store of one tile at the origin of the output tile.
    pub c_store: SendPlan,
    /// Byte distance in memory per unit of each tile dimension.
    pub tile_strides: BTreeMap<Dim, i64>,
    pub bias_store: Option<SendPlan>,
    pub bias_reorder: Option<ReorderPlan>,
}

/// Partial-sum reduction of the accumulator through shared scratch.
#[derive(Clone, Debug, PartialEq)]
pub struct SlmReducePlan {
    pub store: SendPlan,
    pub load: SendPlan,
    pub reduce: ReorderPlan,
    pub slm_bytes: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EpiloguePlan {
    pub c_reg_layout: Layout,
    /// Problem coordinates of the origin of this thread's output tile.
    pub c_coord: BTreeMap<Dim, Expr>,
    pub store: StorePlan,
    pub slm_reduce: Option<SlmReducePlan>,
    pub bias_layout: Option<Layout>,
    /// Issues the bias store only on the owning thread.
    pub bias_reduce_cond: Option<Expr>,
}

// ─── Plan ─────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq)]
pub struct Plan {
    pub simd: u32,
    pub thr_grid: Grid,
    pub tg_grid: Grid,
    /// Derived indices bound after the thread indices.
    pub virt_grid: Vec<(Var, Expr)>,
    pub coord_info: CoordInfo,
    /// Values derived from kernel arguments, bound at kernel entry.
    pub external_lets: Vec<(Var, Expr)>,
    pub prefetch: PrefetchPlan,
    pub x2r_fma: X2rFmaPlan,
    pub epilogue: EpiloguePlan,
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "plan simd{}", self.simd)?;
        for (name, grid) in [("thr", &self.thr_grid), ("tg", &self.tg_grid)] {
            for (i, axis) in grid.axes.iter().enumerate() {
                let dims: Vec<String> = axis
                    .dims
                    .iter()
                    .map(|(d, s)| format!("{}:{}", d, s))
                    .collect();
                writeln!(f, "  {}_grid[{}] = {}", name, i, dims.join(" "))?;
            }
        }
        for s in &self.x2r_fma.stages {
            match s {
                Stage::X2r(x) => writeln!(
                    f,
                    "  x2r {} {} blocks -> {}",
                    x.tensor,
                    x.load.blocks.len(),
                    x.layout
                )?,
                Stage::Fma(m) => writeln!(
                    f,
                    "  fma {} simd{} c = {}",
                    m.kind.name(),
                    m.simd,
                    m.c_layout
                )?,
            }
        }
        write!(f, "  store {}", self.epilogue.store.c_store.reg_layout)
    }
}
