//! Explicit build context and append-only statement emission.
//!
//! Kernel sub-builders receive a `BuildCtx` by reference instead of
//! sharing hidden state: buffers go through `BufferManager`, kernel
//! arguments through `VarManager`. Each sub-builder collects statements
//! in its own `IrBuilder` and hands the finished tree back to the caller.

mod buffers;
mod vars;

#[cfg(test)]
mod tests;

pub use buffers::{BufferDecl, BufferManager, NameGen};
pub use vars::{builtin, grid_size_name, ArgKind, KernelArg, VarManager, BUILTINS, MAGIC_SUFFIX};

use crate::config::HwConfig;

use super::{Access, AccessOp, Expr, Func, Layout, ScalarType, Stmt, Var};

// ─── BuildCtx ─────────────────────────────────────────────────────

pub struct BuildCtx<'a> {
    pub hw: &'a HwConfig,
    pub bufs: BufferManager,
    pub vars: VarManager,
}

impl<'a> BuildCtx<'a> {
    pub fn new(hw: &'a HwConfig) -> Self {
        Self {
            hw,
            bufs: BufferManager::new(),
            vars: VarManager::new(),
        }
    }
}

// ─── IrBuilder ────────────────────────────────────────────────────

/// Collects statements in emission order.
#[derive(Debug, Default)]
pub struct IrBuilder {
    stmts: Vec<Stmt>,
}

impl IrBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, s: Stmt) {
        if !s.is_empty() {
            self.stmts.extend(s.into_items());
        }
    }

    /// Dangling let scoping over everything emitted after it.
    pub fn let_(&mut self, name: &str, value: Expr) -> Expr {
        let var = Var::new(name, value.ty());
        self.stmts.push(Stmt::Let {
            var: var.clone(),
            value,
            body: None,
        });
        var.expr()
    }

    pub fn store(&mut self, buf: &Expr, off: i64, value: Expr) {
        self.stmts.push(Stmt::store(buf.clone(), off, value));
    }

    pub fn call(&mut self, func: Func, args: Vec<Expr>) {
        self.stmts.push(Stmt::call(func, args));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn access(
        &mut self,
        op: AccessOp,
        ty: ScalarType,
        mem_buf: &Expr,
        mem_off: Expr,
        reg: Option<(&Expr, i64)>,
        bytes: u32,
    ) {
        let (reg_buf, reg_off) = match reg {
            Some((buf, off)) => (Some(buf.clone()), off),
            None => (None, 0),
        };
        self.stmts.push(Stmt::Access(Access {
            op,
            ty,
            mem_buf: mem_buf.clone(),
            mem_off,
            reg_buf,
            reg_off,
            bytes,
        }));
    }

    /// Copy `src` to `dst` converting layouts. Skipped when both sides are
    /// the same buffer with the same layout.
    pub fn reorder(&mut self, src_layout: &Layout, src: &Expr, dst_layout: &Layout, dst: &Expr) {
        if src_layout == dst_layout && src == dst {
            return;
        }
        self.call(
            Func::Reorder {
                src: src_layout.clone(),
                dst: dst_layout.clone(),
            },
            vec![src.clone(), dst.clone()],
        );
    }

    pub fn reduce(&mut self, src_layout: &Layout, src: &Expr, dst_layout: &Layout, dst: &Expr) {
        self.call(
            Func::Reduce {
                src: src_layout.clone(),
                dst: dst_layout.clone(),
            },
            vec![src.clone(), dst.clone()],
        );
    }

    pub fn zero_out(&mut self, buf: &Expr, bytes: u32) {
        self.call(Func::ZeroOut { bytes }, vec![buf.clone()]);
    }

    pub fn barrier(&mut self) {
        self.call(Func::Barrier, Vec::new());
    }

    pub fn if_(&mut self, cond: Expr, then: Stmt) {
        if !then.is_empty() {
            self.stmts.push(Stmt::if_then(cond, then));
        }
    }

    pub fn if_else(&mut self, cond: Expr, then: Stmt, otherwise: Stmt) {
        self.stmts.push(Stmt::If {
            cond,
            then: Box::new(then),
            otherwise: Some(Box::new(otherwise)),
        });
    }

    pub fn for_(&mut self, var: Var, init: Expr, bound: Expr, body: Stmt) {
        self.stmts.push(Stmt::For {
            var,
            init,
            bound,
            body: Box::new(body),
        });
    }

    pub fn while_(&mut self, cond: Expr, body: Stmt) {
        self.stmts.push(Stmt::While {
            cond,
            body: Box::new(body),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.iter().all(Stmt::is_empty)
    }

    pub fn finish(self) -> Stmt {
        Stmt::Seq(self.stmts)
    }
}
