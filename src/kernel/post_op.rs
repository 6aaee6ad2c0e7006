//! Fused post-ops over one f32 output tile.
//!
//! Order: source scale, weights scale, bias add, declared post-ops in
//! list order, destination scale. Operands other than the accumulator
//! are loaded from memory into temporaries, converted to f32 and combined
//! lane-wise, broadcasting along dimensions they do not have.

use std::collections::BTreeMap;

use crate::diagnostic::{Phase, Result};
use crate::ir::builder::{BuildCtx, IrBuilder};
use crate::ir::{
    for_each, AccessOp, BinOp, Coord, Dim, EltwiseAlg, Expr, Func, Layout, ScalarType, Stmt,
    Tile, Type,
};

use super::buffer_info::{binary_arg_name, BufferInfo};
use super::desc::{reverse_mask, KernelDesc, PostOp, ScaleDesc};
use super::gemm::{to_gemm, Bmnk};
use super::offset::send_stmt;
use super::plan::{SendBlock, SendPlan};

/// A right-hand operand in memory: dense over `dims` (outermost first)
/// with extents from the problem shape.
#[derive(Clone, Debug, PartialEq)]
pub struct RhsView {
    pub buf: Expr,
    pub ty: ScalarType,
    pub dims: Vec<Dim>,
}

/// Dimensions of the output tensor selected by `mask`, where bit `j`
/// stands for the `j`-th dimension counted from the innermost.
pub fn mask_dims(c_dims: &[Dim], mask: u32) -> Vec<Dim> {
    let n = c_dims.len();
    c_dims
        .iter()
        .enumerate()
        .filter(|(i, _)| (mask >> (n - 1 - i)) & 1 == 1)
        .map(|(_, d)| d.clone())
        .collect()
}

pub struct PostOpBuilder<'a, 'h> {
    ctx: &'a mut BuildCtx<'h>,
    desc: &'a KernelDesc,
    bufs: &'a BufferInfo,
    b: IrBuilder,
}

impl<'a, 'h> PostOpBuilder<'a, 'h> {
    pub fn new(ctx: &'a mut BuildCtx<'h>, desc: &'a KernelDesc, bufs: &'a BufferInfo) -> Self {
        Self {
            ctx,
            desc,
            bufs,
            b: IrBuilder::new(),
        }
    }

    /// Apply every post-op to `buf` (layout `lhs`, f32) whose origin is at
    /// problem coordinates `coord`.
    pub fn build(
        mut self,
        coord: &BTreeMap<Dim, Expr>,
        lhs: &Layout,
        buf: &Expr,
    ) -> Result<Stmt> {
        let desc = self.desc;
        let c_dims = desc.c_tag().dims.clone();
        let ndims = c_dims.len();

        for (name, scale) in [("src_scales", desc.scales.src), ("wei_scales", desc.scales.wei)] {
            if let Some(s) = scale {
                let view = self.scale_view(name, &c_dims, s)?;
                self.binary(BinOp::Mul, coord, lhs, buf, &view, 1.0, 0)?;
            }
        }
        if let (true, Some(ty)) = (desc.with_bias_fwd(), desc.bias) {
            let dims = c_dims
                .iter()
                .filter(|d| to_gemm(d, desc.prop) == Some(Bmnk::N))
                .cloned()
                .collect();
            let view = RhsView {
                buf: self.bufs.require_mem("bias", Phase::Epilogue)?.clone(),
                ty,
                dims,
            };
            self.binary(BinOp::Add, coord, lhs, buf, &view, 1.0, 0)?;
        }
        for (i, po) in desc.post_ops.iter().enumerate() {
            match *po {
                PostOp::Eltwise {
                    alg,
                    scale,
                    alpha,
                    beta,
                } => self.eltwise(alg, scale, alpha, beta, lhs.elems(), buf),
                PostOp::Sum {
                    scale,
                    zero_point,
                    dt,
                } => {
                    let view = RhsView {
                        buf: self.bufs.require_mem("c", Phase::Epilogue)?.clone(),
                        ty: dt,
                        dims: c_dims.clone(),
                    };
                    self.binary(BinOp::Add, coord, lhs, buf, &view, scale, zero_point)?;
                }
                PostOp::Binary {
                    alg,
                    src1_dt,
                    broadcast_mask,
                } => {
                    let full = (1u32 << ndims) - 1;
                    let mask = reverse_mask(!broadcast_mask & full, ndims);
                    let view = RhsView {
                        buf: self
                            .bufs
                            .require_mem(&binary_arg_name(i), Phase::Epilogue)?
                            .clone(),
                        ty: src1_dt,
                        dims: mask_dims(&c_dims, mask),
                    };
                    self.binary(alg.op(), coord, lhs, buf, &view, 1.0, 0)?;
                }
            }
        }
        if let Some(s) = desc.scales.dst {
            let view = self.scale_view("dst_scales", &c_dims, s)?;
            self.binary(BinOp::Div, coord, lhs, buf, &view, 1.0, 0)?;
        }
        Ok(self.b.finish())
    }

    fn scale_view(&self, name: &str, c_dims: &[Dim], scale: ScaleDesc) -> Result<RhsView> {
        Ok(RhsView {
            buf: self.bufs.require_mem(name, Phase::Epilogue)?.clone(),
            ty: scale.dt,
            dims: mask_dims(c_dims, reverse_mask(scale.mask, c_dims.len())),
        })
    }

    fn eltwise(&mut self, alg: EltwiseAlg, scale: f32, alpha: f32, beta: f32, elems: i64, buf: &Expr) {
        self.b.call(
            Func::Eltwise {
                alg,
                scale,
                alpha,
                beta,
            },
            vec![Expr::int(elems), buf.clone()],
        );
    }

    /// Load the part of `view` covering `tile` at `coord`. Returns the
    /// register layout and buffer.
    fn load_rhs(
        &mut self,
        coord: &BTreeMap<Dim, Expr>,
        tile: &Tile,
        view: &RhsView,
    ) -> (Layout, Expr) {
        let elem = i64::from(view.ty.size());
        let mut strides = BTreeMap::new();
        let mut stride = 1;
        for d in view.dims.iter().rev() {
            strides.insert(d.clone(), stride * elem);
            stride *= self.desc.shape.get_or(d, 1);
        }

        let inner_first: Vec<(&str, i64)> = view
            .dims
            .iter()
            .rev()
            .filter(|d| tile.get_or(d, 1) > 1)
            .map(|d| (d.as_str(), tile.get_or(d, 1)))
            .collect();
        let layout = Layout::dense(view.ty, &inner_first);

        let mut base = Expr::i64(0);
        for (d, s) in &strides {
            if let Some(c) = coord.get(d) {
                base = base + c.clone().cast(Type::s64()) * *s;
            }
        }

        let run = match layout.blocks.first() {
            Some(blk) if strides.get(&blk.dim) == Some(&elem) => blk.size,
            _ => 1,
        };
        let mut step = Tile::new();
        if let Some(blk) = layout.blocks.first() {
            step.set(blk.dim.clone(), run);
        }
        let order: Vec<Dim> = view.dims.clone();
        let mut blocks = Vec::new();
        for_each(&layout.dim_sizes(), &step, &order, |c: &Coord| {
            let mem_off = c
                .iter()
                .map(|(d, v)| v * strides.get(d).copied().unwrap_or(0))
                .sum();
            blocks.push(SendBlock {
                mem_off,
                reg_off: layout.offset_in_bytes(c),
                bytes: (run * elem) as u32,
            });
        });
        let plan = SendPlan {
            op: AccessOp::Load,
            ty: view.ty,
            base: base.clone(),
            loop_strides: BTreeMap::new(),
            blocks,
            reg_layout: layout.clone(),
        };
        let reg = self.ctx.bufs.tmp("rhs", layout.size());
        self.b
            .emit(send_stmt(&plan, AccessOp::Load, &view.buf, &base, Some(&reg)));
        (layout, reg)
    }

    #[allow(clippy::too_many_arguments)]
    fn binary(
        &mut self,
        op: BinOp,
        coord: &BTreeMap<Dim, Expr>,
        lhs: &Layout,
        lhs_buf: &Expr,
        view: &RhsView,
        scale: f32,
        zero_point: i32,
    ) -> Result<()> {
        let (mut rhs, mut rhs_buf) = self.load_rhs(coord, &lhs.dim_sizes(), view);
        if rhs.ty != ScalarType::F32 {
            let rhs_f32 = rhs.retype(ScalarType::F32, true);
            let buf = self.ctx.bufs.tmp("rhs_f32", rhs_f32.size());
            self.b.reorder(&rhs, &rhs_buf, &rhs_f32, &buf);
            rhs = rhs_f32;
            rhs_buf = buf;
        }
        if zero_point != 0 {
            self.eltwise(EltwiseAlg::Linear, 1.0, 1.0, -(zero_point as f32), rhs.elems(), &rhs_buf);
        }
        if scale != 1.0 {
            self.eltwise(EltwiseAlg::Linear, 1.0, scale, 0.0, rhs.elems(), &rhs_buf);
        }

        let Some(lhs0) = lhs.blocks.first() else {
            // Scalar accumulator tile.
            let e = Expr::binary(
                op,
                Expr::load(Type::f32(), lhs_buf.clone(), 0),
                Expr::load(Type::f32(), rhs_buf.clone(), 0),
            );
            self.b.store(lhs_buf, 0, to_f32(e, 1));
            return Ok(());
        };
        let max_simd = (2 * self.ctx.hw.grf_size / 4) as i64;
        let mut elems = gcd(max_simd, lhs0.size);
        let is_bcast = !rhs.dim_sizes().has(&lhs0.dim);
        if !is_bcast {
            match rhs.blocks.first() {
                Some(rhs0) if rhs0.dim == lhs0.dim => elems = gcd(elems, rhs0.size),
                _ => elems = 1,
            }
        }
        if elems < 8 {
            elems = 1;
        }
        let mut step = Tile::new();
        step.set(lhs0.dim.clone(), elems);
        let lanes = elems as u32;
        let mut stores = Vec::new();
        for_each(&lhs.dim_sizes(), &step, &[], |c| {
            let lhs_off = lhs.offset_in_bytes(c);
            let rhs_off = rhs.offset_in_bytes(c);
            let l = Expr::load(Type::f32().with_elems(lanes), lhs_buf.clone(), lhs_off);
            let r = if is_bcast {
                Expr::load(Type::f32(), rhs_buf.clone(), rhs_off).broadcast(lanes)
            } else {
                Expr::load(Type::f32().with_elems(lanes), rhs_buf.clone(), rhs_off)
            };
            stores.push(Stmt::store(lhs_buf.clone(), lhs_off, to_f32(Expr::binary(op, l, r), lanes)));
        });
        self.b.emit(Stmt::seq(stores));
        Ok(())
    }
}

fn to_f32(e: Expr, lanes: u32) -> Expr {
    if e.ty().is_bool() {
        e.cast(Type::f32().with_elems(lanes))
    } else {
        e
    }
}

fn gcd(a: i64, b: i64) -> i64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}
