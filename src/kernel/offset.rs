//! Memory offsets kept in registers and advanced with the loop nest.
//!
//! An offset starts at `base + sum(init[i] * stride[i])`. Advancing loop
//! `i` adds `stride[i] - bound[i-1] * stride[i-1]`: the inner index was
//! just reset from `bound[i-1]` to zero, so after any mixed-radix carry
//! the offset is again `base + sum(idx[i] * stride[i])`.

use crate::ir::builder::BufferManager;
use crate::ir::{Access, AccessOp, Expr, Stmt, Type};

use super::loop_nest::LoopNest;
use super::plan::SendPlan;

#[derive(Clone, Debug)]
struct OffsetEntry {
    reg: Expr,
    base: Expr,
    strides: Vec<i64>,
}

#[derive(Clone, Debug)]
pub struct OffsetCtx {
    prefix: String,
    nest: LoopNest,
    entries: Vec<OffsetEntry>,
}

impl OffsetCtx {
    pub fn new(prefix: &str, nest: &LoopNest) -> Self {
        Self {
            prefix: prefix.to_string(),
            nest: nest.clone(),
            entries: Vec::new(),
        }
    }

    /// Register the base offset of `plan`; returns the s64 expression
    /// reading its current value.
    pub fn add(&mut self, bufs: &mut BufferManager, plan: &SendPlan) -> Expr {
        let strides: Vec<i64> = self
            .nest
            .loops()
            .iter()
            .map(|l| plan.loop_strides.get(&l.dim).copied().unwrap_or(0))
            .collect();
        if strides.iter().all(|&s| s == 0) {
            return plan.base.clone().cast(Type::s64());
        }
        let reg = bufs.tmp(&format!("{}_off", self.prefix), 8);
        self.entries.push(OffsetEntry {
            reg: reg.clone(),
            base: plan.base.clone(),
            strides,
        });
        Expr::load(Type::s64(), reg, 0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn init_stmt(&self) -> Stmt {
        let mut stmts = Vec::new();
        for e in &self.entries {
            let mut value = e.base.clone().cast(Type::s64());
            for (l, stride) in self.nest.loops().iter().zip(&e.strides) {
                if *stride != 0 && !l.init.is_int_value(0) {
                    value = value + l.init.clone().cast(Type::s64()) * *stride;
                }
            }
            stmts.push(Stmt::store(e.reg.clone(), 0, value));
        }
        Stmt::seq(stmts)
    }

    /// Update after advancing loop `i` by one.
    pub fn inc_loop_stmt(&self, i: usize) -> Stmt {
        let mut stmts = Vec::new();
        for e in &self.entries {
            let mut delta = Expr::i64(e.strides[i]);
            if i > 0 && e.strides[i - 1] != 0 {
                let bound = &self.nest.loops()[i - 1].bound;
                delta = match bound.as_int() {
                    Some(b) => Expr::i64(e.strides[i] - b * e.strides[i - 1]),
                    None => delta - bound.clone().cast(Type::s64()) * e.strides[i - 1],
                };
            }
            if delta.is_int_value(0) {
                continue;
            }
            let cur = Expr::load(Type::s64(), e.reg.clone(), 0);
            stmts.push(Stmt::store(e.reg.clone(), 0, cur + delta));
        }
        Stmt::seq(stmts)
    }
}

/// One access per block of `plan`, at byte offset `base` of `mem`.
pub fn send_stmt(plan: &SendPlan, op: AccessOp, mem: &Expr, base: &Expr, reg: Option<&Expr>) -> Stmt {
    let stmts = plan
        .blocks
        .iter()
        .map(|blk| {
            Stmt::Access(Access {
                op,
                ty: plan.ty,
                mem_buf: mem.clone(),
                mem_off: base.clone() + blk.mem_off,
                reg_buf: reg.cloned(),
                reg_off: if reg.is_some() { blk.reg_off } else { 0 },
                bytes: blk.bytes,
            })
        })
        .collect();
    Stmt::seq(stmts)
}

/// Output of a sub-builder: statements run once before the loop, the
/// per-iteration body, and the offsets the body reads.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub init: Stmt,
    pub body: Stmt,
    pub offsets: OffsetCtx,
}

impl Fragment {
    pub fn is_empty(&self) -> bool {
        self.init.is_empty() && self.body.is_empty()
    }
}
