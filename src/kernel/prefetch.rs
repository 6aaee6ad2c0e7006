use crate::diagnostic::{Phase, Result};
use crate::ir::builder::{BuildCtx, IrBuilder};
use crate::ir::AccessOp;

use super::buffer_info::BufferInfo;
use super::loop_nest::LoopNest;
use super::offset::{send_stmt, Fragment, OffsetCtx};
use super::plan::{PrefetchPlan, TensorKind};

/// Cache warm-up accesses for the reduction operands. The offsets are
/// separate from the load offsets so the prefetch can run ahead.
pub fn build_prefetch(
    ctx: &mut BuildCtx<'_>,
    nest: &LoopNest,
    bufs: &BufferInfo,
    plan: &PrefetchPlan,
) -> Result<Fragment> {
    let mut offsets = OffsetCtx::new("pf", nest);
    let mut b = IrBuilder::new();
    for (kind, send) in [(TensorKind::A, &plan.a), (TensorKind::B, &plan.b)] {
        let Some(send) = send else { continue };
        let mem_buf = bufs.require_mem(kind.name(), Phase::Prefetch)?;
        let base = offsets.add(&mut ctx.bufs, send);
        b.emit(send_stmt(send, AccessOp::Prefetch, mem_buf, &base, None));
    }
    Ok(Fragment {
        init: offsets.init_stmt(),
        body: b.finish(),
        offsets,
    })
}
