//! Kernel orchestrator: index bindings, reduction loop, epilogue, then
//! the pass pipeline.

use tracing::{debug, warn};

use crate::config::CompileOptions;
use crate::diagnostic::{CompileError, Phase, Result};
use crate::ir::builder::{builtin, BufferDecl, BuildCtx, IrBuilder, KernelArg};
use crate::ir::pass::{run_pipeline, PassCtx};
use crate::ir::{Expr, ScalarType, Stmt, Var};

use super::buffer_info::BufferInfo;
use super::desc::KernelDesc;
use super::epilogue::{EpilogueBuilder, StoreMode};
use super::loop_nest::{LoopIterator, LoopNest};
use super::offset::Fragment;
use super::plan::Plan;
use super::prefetch::build_prefetch;
use super::stream_k::{build_stream_k, StreamKWindow};
use super::x2r::build_x2r_fma;

/// A finished kernel body with everything the host needs to launch it.
#[derive(Clone, Debug)]
pub struct BuiltKernel {
    pub body: Stmt,
    pub args: Vec<KernelArg>,
    pub buffers: Vec<BufferDecl>,
}

pub struct KernelBuilder<'a> {
    opts: &'a CompileOptions,
    desc: &'a KernelDesc,
    plan: &'a Plan,
}

impl<'a> KernelBuilder<'a> {
    pub fn new(opts: &'a CompileOptions, desc: &'a KernelDesc, plan: &'a Plan) -> Self {
        Self { opts, desc, plan }
    }

    pub fn build(self) -> Result<BuiltKernel> {
        self.validate()?;
        let (desc, plan) = (self.desc, self.plan);
        let mut ctx = BuildCtx::new(&self.opts.hw);
        let bufs = BufferInfo::build(&mut ctx, desc, &plan.x2r_fma)?;

        let mut b = IrBuilder::new();
        self.bind_thread_indices(&mut b);
        if desc.use_stream_k {
            let body = build_stream_k(&mut ctx, |ctx, window| {
                let store = StoreMode::SharedIf(window.is_shared());
                self.build_tile(ctx, &bufs, Some(window), &store)
            })?;
            b.emit(body);
        } else {
            b.emit(self.build_tile(&mut ctx, &bufs, None, &StoreMode::Plain)?);
        }
        let stmt = b.finish();
        debug!(stmts = stmt.count(), "kernel assembled");

        let BuildCtx { bufs: buf_mgr, vars, .. } = ctx;
        let buffers = buf_mgr.decls().to_vec();
        let mut pass_ctx = PassCtx::new(self.opts.clone(), buf_mgr, vars)
            .with_external_lets(plan.external_lets.clone());
        let body = run_pipeline(stmt, &mut pass_ctx);
        debug!(stmts = body.count(), "pipeline done");
        Ok(BuiltKernel {
            body,
            args: pass_ctx.vars.into_args(),
            buffers,
        })
    }

    fn validate(&self) -> Result<()> {
        let (desc, plan) = (self.desc, self.plan);
        if plan.simd != desc.simd {
            return Err(CompileError::invariant(
                Phase::Plan,
                format!("plan is simd{}, descriptor simd{}", plan.simd, desc.simd),
            ));
        }
        if desc.use_stream_k {
            if desc.has_post_ops() {
                return Err(CompileError::unsupported(
                    Phase::StreamK,
                    "post-ops on partial sums",
                ));
            }
            if desc.c_tag().ty != ScalarType::F32 {
                return Err(CompileError::unsupported(
                    Phase::StreamK,
                    format!("{} output", desc.c_tag().ty.name()),
                ));
            }
            if plan.epilogue.bias_layout.is_some() {
                return Err(CompileError::unsupported(Phase::StreamK, "bias reduction"));
            }
        }
        Ok(())
    }

    /// Thread indices from the local ids (x counts lanes, so it is divided
    /// by the SIMD width), then the virtual grid.
    fn bind_thread_indices(&self, b: &mut IrBuilder) {
        let plan = self.plan;
        for (i, axis) in plan.thr_grid.axes.iter().enumerate() {
            let mut base = builtin(&format!("local_id{}", i));
            if i == 0 {
                base = base / i64::from(plan.simd);
            }
            for (dim, _) in &axis.dims {
                let var = plan
                    .coord_info
                    .thr_index(dim)
                    .cloned()
                    .unwrap_or_else(|| Var::s32(format!("{}_thr_idx", dim)));
                if let Some(value) = plan.thr_grid.unpack(dim, base.clone()) {
                    bind(b, var, value);
                }
            }
        }
        for (var, value) in &plan.virt_grid {
            bind(b, var.clone(), value.clone());
        }
    }

    /// Thread-group indices. Under Stream-K the tile index stands in for
    /// group id 0.
    fn bind_tg_indices(&self, b: &mut IrBuilder, window: Option<&StreamKWindow>) -> Result<()> {
        let plan = self.plan;
        for entry in &plan.coord_info.entries {
            let Some(var) = &entry.tg_idx else { continue };
            let axis = plan.tg_grid.axis_of(&entry.dim).ok_or_else(|| {
                CompileError::invariant(
                    Phase::Plan,
                    format!("{} has a group index but no grid axis", entry.dim),
                )
            })?;
            let base = match window {
                Some(w) if axis == 0 => w.tile_idx.clone(),
                _ => builtin(&format!("group_id{}", axis)),
            };
            if let Some(value) = plan.tg_grid.unpack(&entry.dim, base) {
                bind(b, var.clone(), value);
            }
        }
        Ok(())
    }

    /// Reduction loop and epilogue of one output tile.
    fn build_tile(
        &self,
        ctx: &mut BuildCtx<'_>,
        bufs: &BufferInfo,
        window: Option<&StreamKWindow>,
        store: &StoreMode,
    ) -> Result<Stmt> {
        let (desc, plan) = (self.desc, self.plan);
        let mut b = IrBuilder::new();
        self.bind_tg_indices(&mut b, window)?;

        let nest = match window {
            Some(w) => {
                let mut value = w.local_beg.clone();
                let mut inits = Vec::new();
                for dim in &desc.loop_desc {
                    let size = plan.coord_info.loop_size(dim);
                    if size.is_int_value(1) {
                        continue;
                    }
                    let var = Var::s32(format!("{}_init", dim));
                    bind(&mut b, var.clone(), value.clone() % size.clone());
                    value = value / size;
                    inits.push((dim.clone(), var));
                }
                LoopNest::build(
                    &desc.loop_desc,
                    &plan.coord_info,
                    Some((&inits, w.local_size())),
                )
            }
            None => LoopNest::build(&desc.loop_desc, &plan.coord_info, None),
        };

        let x2r = build_x2r_fma(ctx, &nest, bufs, desc, &plan.x2r_fma)?;
        let prefetch = if desc.prefetch_dist > 0 {
            Some(build_prefetch(ctx, &nest, bufs, &plan.prefetch)?)
        } else {
            None
        };

        let c_buf = bufs.require_reg("c", Phase::LoadMultiply)?;
        b.zero_out(c_buf, plan.x2r_fma.c_layout.size());
        if let Some(layout) = &plan.x2r_fma.bias_layout {
            let bias = bufs.require_reg("bias", Phase::LoadMultiply)?;
            b.zero_out(bias, layout.size());
        }
        b.emit(x2r.init.clone());

        let pf_iter = match &prefetch {
            Some(pf) => Some(self.warm_up(ctx, &mut b, &nest, pf)),
            None => None,
        };
        let pf = prefetch.as_ref().zip(pf_iter.as_ref());

        let mut inner = IrBuilder::new();
        if let Some((pf, it)) = pf {
            inner.emit(it.check_bounds_stmt(pf.body.clone()));
        }
        inner.emit(x2r.body.clone());
        match window {
            Some(_) => {
                let it = LoopIterator::new(&mut ctx.bufs, &nest, "it");
                b.emit(it.init_stmt());
                inner.emit(it.inc_stmt(&x2r.offsets));
                if let Some((pf, pf_it)) = pf {
                    inner.emit(pf_it.inc_stmt(&pf.offsets));
                }
                b.for_(
                    Var::s32("sk_local_iter"),
                    Expr::int(0),
                    nest.linear_bound().clone(),
                    inner.finish(),
                );
            }
            None => {
                if let Some((pf, pf_it)) = pf {
                    inner.emit(pf_it.inc_stmt(&pf.offsets));
                }
                let mut body = inner.finish();
                for (i, l) in nest.loops().iter().enumerate() {
                    body = body.append(x2r.offsets.inc_loop_stmt(i));
                    body = Stmt::For {
                        var: l.var.clone(),
                        init: Expr::int(0),
                        bound: l.bound.clone(),
                        body: Box::new(body),
                    };
                }
                b.emit(body);
            }
        }

        let epilogue = EpilogueBuilder::new(ctx, desc, bufs, &plan.epilogue).build(store)?;
        b.emit(epilogue);
        Ok(b.finish())
    }

    /// Issue the first `prefetch_dist` prefetches ahead of the loop. Only
    /// issues that may run past the nest are bounds-checked.
    fn warm_up(
        &self,
        ctx: &mut BuildCtx<'_>,
        b: &mut IrBuilder,
        nest: &LoopNest,
        pf: &Fragment,
    ) -> LoopIterator {
        let dist = self.desc.prefetch_dist;
        let it = LoopIterator::new(&mut ctx.bufs, nest, "pf");
        b.emit(pf.init.clone());
        b.emit(it.init_stmt());
        let bound = nest.static_bound();
        if let Some(n) = bound {
            if n < i64::from(dist) {
                warn!(dist, bound = n, "prefetch distance exceeds the loop trip count");
            }
        }
        for i in 0..dist {
            let in_range = i == 0 || bound.map_or(false, |n| i64::from(i) < n);
            if in_range {
                b.emit(pf.body.clone());
            } else {
                b.emit(it.check_bounds_stmt(pf.body.clone()));
            }
            b.emit(it.inc_stmt(&pf.offsets));
        }
        it
    }
}

fn bind(b: &mut IrBuilder, var: Var, value: Expr) {
    b.emit(Stmt::Let {
        var,
        value,
        body: None,
    });
}
