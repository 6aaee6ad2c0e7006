//! Epilogue: shared scratch reduction of partial sums, post-ops and the
//! final store of the accumulator.

use std::collections::BTreeMap;

use crate::diagnostic::{CompileError, Phase, Result};
use crate::ir::builder::{BuildCtx, IrBuilder};
use crate::ir::{for_each, AccessOp, Coord, Dim, Expr, ScalarType, Stmt};

use super::buffer_info::BufferInfo;
use super::desc::KernelDesc;
use super::offset::send_stmt;
use super::plan::{EpiloguePlan, SlmReducePlan};
use super::post_op::PostOpBuilder;

/// How the output tile reaches memory.
#[derive(Clone, Debug, PartialEq)]
pub enum StoreMode {
    Plain,
    /// Atomic add when the condition holds (the tile is shared between
    /// thread groups), plain store otherwise.
    SharedIf(Expr),
}

pub struct EpilogueBuilder<'a, 'h> {
    ctx: &'a mut BuildCtx<'h>,
    desc: &'a KernelDesc,
    bufs: &'a BufferInfo,
    plan: &'a EpiloguePlan,
    b: IrBuilder,
}

impl<'a, 'h> EpilogueBuilder<'a, 'h> {
    pub fn new(
        ctx: &'a mut BuildCtx<'h>,
        desc: &'a KernelDesc,
        bufs: &'a BufferInfo,
        plan: &'a EpiloguePlan,
    ) -> Self {
        Self {
            ctx,
            desc,
            bufs,
            plan,
            b: IrBuilder::new(),
        }
    }

    pub fn build(mut self, mode: &StoreMode) -> Result<Stmt> {
        let plan = self.plan;
        if let Some(slm) = &plan.slm_reduce {
            self.build_slm_reduce(slm)?;
        }
        self.build_c_store(mode)?;
        self.build_bias_store()?;
        Ok(self.b.finish())
    }

    /// Every thread writes its partial tile to scratch, waits for the
    /// group, then sums the slots it owns back into the accumulator.
    fn build_slm_reduce(&mut self, slm: &SlmReducePlan) -> Result<()> {
        let c_buf = self.bufs.require_reg("c", Phase::Epilogue)?.clone();
        let slm_buf = self.ctx.bufs.get_slm("slm", slm.slm_bytes);
        let tmp = self.ctx.bufs.get("c_reduce", slm.load.reg_bytes());
        self.b.emit(send_stmt(
            &slm.store,
            AccessOp::Store,
            &slm_buf,
            &slm.store.base,
            Some(&c_buf),
        ));
        self.b.barrier();
        self.b.emit(send_stmt(
            &slm.load,
            AccessOp::Load,
            &slm_buf,
            &slm.load.base,
            Some(&tmp),
        ));
        self.b.zero_out(&c_buf, self.plan.c_reg_layout.size());
        self.b.reduce(&slm.reduce.src, &tmp, &slm.reduce.dst, &c_buf);
        Ok(())
    }

    fn build_bias_store(&mut self) -> Result<()> {
        let plan = self.plan;
        let Some(bias_layout) = &plan.bias_layout else {
            return Ok(());
        };
        let store = plan.store.bias_store.as_ref().ok_or_else(|| {
            CompileError::invariant(Phase::Epilogue, "bias reduction without a bias store")
        })?;
        let mem = self.bufs.require_mem("bias", Phase::Epilogue)?.clone();
        let reg = self.bufs.require_reg("bias", Phase::Epilogue)?.clone();

        let mut b = IrBuilder::new();
        let payload = match &plan.store.bias_reorder {
            Some(r) => {
                let tmp = self.ctx.bufs.get("bias_tmp", r.dst.size());
                b.reorder(&r.src, &reg, &r.dst, &tmp);
                tmp
            }
            None => {
                if &store.reg_layout != bias_layout {
                    return Err(CompileError::invariant(
                        Phase::Epilogue,
                        format!(
                            "bias layout {} does not match store {}",
                            bias_layout, store.reg_layout
                        ),
                    ));
                }
                reg
            }
        };
        b.emit(send_stmt(store, AccessOp::Store, &mem, &store.base, Some(&payload)));
        let body = b.finish();
        match &plan.bias_reduce_cond {
            Some(cond) => self.b.if_(cond.clone(), body),
            None => self.b.emit(body),
        }
        Ok(())
    }

    fn build_c_store(&mut self, mode: &StoreMode) -> Result<()> {
        let plan = self.plan;
        let store = &plan.store;
        let c_reg = self.bufs.require_reg("c", Phase::Epilogue)?.clone();
        let c_mem = self.bufs.require_mem("c", Phase::Epilogue)?.clone();
        // Post-ops run in f32; the result is converted on the way out.
        let with_post_ops = self.desc.has_post_ops();

        let mut coords = Vec::new();
        for_each(&plan.c_reg_layout.dim_sizes(), &store.tile, &[], |c| {
            coords.push(c.clone());
        });
        for coord in &coords {
            let src_layout = plan.c_reg_layout.map(&store.tile);
            let src = c_reg.clone().offset(plan.c_reg_layout.offset_in_bytes(coord));
            let (mut layout, mut buf) = (src_layout, src);

            if with_post_ops {
                let tile_layout = store.c_store.reg_layout.retype(ScalarType::F32, true);
                let tile_buf = self.ctx.bufs.get("c_tile", tile_layout.size());
                self.b.reorder(&layout, &buf, &tile_layout, &tile_buf);
                let origin = self.tile_origin(coord);
                let stmt = PostOpBuilder::new(self.ctx, self.desc, self.bufs)
                    .build(&origin, &tile_layout, &tile_buf)?;
                self.b.emit(stmt);
                layout = tile_layout;
                buf = tile_buf;
            }
            if layout != store.c_store.reg_layout {
                let store_buf = self
                    .ctx
                    .bufs
                    .get("c_store", store.c_store.reg_layout.size());
                self.b
                    .reorder(&layout, &buf, &store.c_store.reg_layout, &store_buf);
                buf = store_buf;
            }

            let mut base = store.c_store.base.clone();
            let delta: i64 = coord
                .iter()
                .map(|(d, v)| v * store.tile_strides.get(d).copied().unwrap_or(0))
                .sum();
            if delta != 0 {
                base = base + delta;
            }
            let plain = send_stmt(&store.c_store, AccessOp::Store, &c_mem, &base, Some(&buf));
            match mode {
                StoreMode::Plain => self.b.emit(plain),
                StoreMode::SharedIf(cond) => {
                    let atomic = send_stmt(
                        &store.c_store,
                        AccessOp::AtomicAdd,
                        &c_mem,
                        &base,
                        Some(&buf),
                    );
                    self.b.if_else(cond.clone(), atomic, plain);
                }
            }
        }
        Ok(())
    }

    /// Problem coordinates of the store tile at `coord` within this
    /// thread's output tile.
    fn tile_origin(&self, coord: &Coord) -> BTreeMap<Dim, Expr> {
        let mut origin = self.plan.c_coord.clone();
        for (d, v) in coord.iter() {
            if v == 0 {
                continue;
            }
            let cur = origin.remove(d).unwrap_or_else(|| Expr::int(0));
            origin.insert(d.clone(), cur + v);
        }
        origin
    }
}
