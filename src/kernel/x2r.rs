//! Load + multiply: operand loads into registers and the multiply-add
//! instruction stream over the accumulator.

use tracing::trace;

use crate::diagnostic::{CompileError, Phase, Result};
use crate::ir::builder::{BuildCtx, IrBuilder};
use crate::ir::{for_each, AccessOp, Attr, Func, Stmt};

use super::buffer_info::BufferInfo;
use super::desc::KernelDesc;
use super::gemm::{gemm_tile, order_by_role, Bmnk};
use super::loop_nest::LoopNest;
use super::offset::{send_stmt, Fragment, OffsetCtx};
use super::plan::{FmaKind, FmaPlan, Stage, TensorKind, X2rFmaPlan, X2rPlan};

pub fn build_x2r_fma(
    ctx: &mut BuildCtx<'_>,
    nest: &LoopNest,
    bufs: &BufferInfo,
    desc: &KernelDesc,
    plan: &X2rFmaPlan,
) -> Result<Fragment> {
    let mut offsets = OffsetCtx::new("x2r", nest);
    let mut b = IrBuilder::new();
    for stage in &plan.stages {
        match stage {
            Stage::X2r(x2r) => {
                build_x2r(ctx, &mut b, &mut offsets, bufs, x2r)?;
                if x2r.tensor == TensorKind::B {
                    if let Some(bias_layout) = &x2r.bias_layout {
                        let b_buf = bufs.require_reg("b", Phase::LoadMultiply)?;
                        let bias_buf = bufs.require_reg("bias", Phase::LoadMultiply)?;
                        b.reduce(&x2r.layout, b_buf, bias_layout, bias_buf);
                    }
                }
            }
            Stage::Fma(fma) => {
                let calls = build_fma(ctx, bufs, desc, fma)?;
                trace!(kind = fma.kind.name(), calls = calls.len(), "fma stage");
                b.emit(Stmt::seq(calls));
            }
        }
    }
    Ok(Fragment {
        init: offsets.init_stmt(),
        body: b.finish(),
        offsets,
    })
}

fn build_x2r(
    ctx: &mut BuildCtx<'_>,
    b: &mut IrBuilder,
    offsets: &mut OffsetCtx,
    bufs: &BufferInfo,
    plan: &X2rPlan,
) -> Result<()> {
    let name = plan.tensor.name();
    let mem_buf = bufs.require_mem(name, Phase::LoadMultiply)?;
    let reg_buf = bufs.require_reg(name, Phase::LoadMultiply)?;
    let base = offsets.add(&mut ctx.bufs, &plan.load);
    match &plan.reorder {
        Some(reorder) => {
            let load_buf = ctx
                .bufs
                .get(&format!("{}_load", name), plan.load.reg_bytes());
            b.emit(send_stmt(&plan.load, AccessOp::Load, mem_buf, &base, Some(&load_buf)));
            b.reorder(&reorder.src, &load_buf, &reorder.dst, reg_buf);
        }
        None => {
            b.emit(send_stmt(&plan.load, AccessOp::Load, mem_buf, &base, Some(reg_buf)));
        }
    }
    Ok(())
}

/// One multiply call per instruction tile, outermost to innermost over
/// M, N, K, B.
pub fn build_fma(
    ctx: &BuildCtx<'_>,
    bufs: &BufferInfo,
    desc: &KernelDesc,
    fma: &FmaPlan,
) -> Result<Vec<Stmt>> {
    let (a_layout, b_layout, c_layout) = (&fma.a_layout, &fma.b_layout, &fma.c_layout);
    let a_buf = bufs.require_reg("a", Phase::LoadMultiply)?;
    let b_buf = bufs.require_reg("b", Phase::LoadMultiply)?;
    let c_buf = bufs.require_reg("c", Phase::LoadMultiply)?;

    let mut sizes = a_layout.dim_sizes();
    for (d, v) in b_layout.dim_sizes().iter() {
        if let Some(a) = sizes.get(d) {
            if a != v {
                return Err(CompileError::invariant(
                    Phase::LoadMultiply,
                    format!("{} mismatch between operands: {} vs {}", d, a, v),
                ));
            }
        }
        sizes.set(d.clone(), v);
    }
    let order = order_by_role(&sizes, &[Bmnk::M, Bmnk::N, Bmnk::K, Bmnk::B], desc.prop);

    let [bb, m, n, k] = gemm_tile(&fma.inst_tile, desc.prop);
    let func = match fma.kind {
        FmaKind::Mad => {
            let a_stride = if bb * m * k == 1 { 0 } else { a_layout.inner_stride() };
            let b_stride = if bb * k * n == 1 { 0 } else { b_layout.inner_stride() };
            Func::Mad {
                simd: fma.simd,
                dst: c_layout.ty,
                a: a_layout.ty,
                a_stride,
                b: b_layout.ty,
                b_stride,
            }
        }
        FmaKind::Dpas => {
            if ctx.hw.systolic_depth == 0 {
                return Err(CompileError::unsupported(
                    Phase::LoadMultiply,
                    format!("dpas on {}", ctx.hw.name),
                ));
            }
            Func::Dpas {
                simd: fma.simd,
                depth: ctx.hw.systolic_depth,
                repeat: m as u32,
                dst: c_layout.ty,
                src1: b_layout.ty,
                src2: a_layout.ty,
            }
        }
        FmaKind::Dpasw => {
            return Err(CompileError::unsupported(Phase::LoadMultiply, "dpasw"));
        }
    };

    let mut calls = Vec::new();
    for_each(&sizes, &fma.inst_tile, &order, |coord| {
        let dst = c_buf.clone().offset(c_layout.offset_in_bytes(coord));
        let mut src1 = a_buf.clone().offset(a_layout.offset_in_bytes(coord));
        let mut src2 = b_buf.clone().offset(b_layout.offset_in_bytes(coord));
        if fma.kind == FmaKind::Dpas {
            std::mem::swap(&mut src1, &mut src2);
        }
        calls.push(Stmt::call(func.clone(), vec![dst.clone(), dst, src1, src2]));
    });
    if fma.kind == FmaKind::Dpas {
        mark_atomic_runs(&mut calls);
    }
    Ok(calls)
}

/// Within each run of consecutive systolic calls, tie every call but the
/// last to its successor.
pub fn mark_atomic_runs(stmts: &mut [Stmt]) {
    let is_dpas = |s: &Stmt| matches!(s, Stmt::Call(c) if matches!(c.func, Func::Dpas { .. }));
    for i in 0..stmts.len() {
        let next_is_dpas = stmts.get(i + 1).map_or(false, is_dpas);
        if let Stmt::Call(c) = &mut stmts[i] {
            if matches!(c.func, Func::Dpas { .. }) && next_is_dpas {
                c.add_attr(Attr::Atomic);
            }
        }
    }
}
