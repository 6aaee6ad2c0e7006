//! Instruction-tree pass pipeline.
//!
//! Each pass is a total function `(Stmt, &mut PassCtx) -> Stmt`. The
//! pipeline runs them once, in a fixed order; every pass relies on the
//! forms established by the passes before it (division fixup precedes
//! variable finalization, which precedes memory-access lowering).

mod alloc;
mod bank;
mod cse;
mod lets;
mod send;
mod simplify;
mod vars;

#[cfg(test)]
mod tests;

use tracing::trace;

use crate::config::CompileOptions;

use super::builder::{BufferManager, NameGen, VarManager};
use super::{Expr, Stmt, Var};

pub use alloc::{inject_alloc_stmts, inject_global_alloc, merge_slm_buffers, optimize_alloc_let};
pub use bank::inject_bank_conflict_attrs;
pub use cse::eliminate_common_subexprs;
pub use lets::{inject_dangling_lets, inject_external_lets};
pub use send::{inject_send, split_wide_stores};
pub use simplify::{fixup_if_conditions, simplify};
pub use vars::{finalize_vars, fixup_idiv};

/// State shared by the passes of one compilation.
pub struct PassCtx {
    pub opts: CompileOptions,
    pub bufs: BufferManager,
    pub vars: VarManager,
    /// Values derived from kernel arguments, bound once at kernel entry.
    pub external_lets: Vec<(Var, Expr)>,
    pub names: NameGen,
}

impl PassCtx {
    pub fn new(opts: CompileOptions, bufs: BufferManager, vars: VarManager) -> Self {
        Self {
            opts,
            bufs,
            vars,
            external_lets: Vec::new(),
            names: NameGen::default(),
        }
    }

    pub fn with_external_lets(mut self, lets: Vec<(Var, Expr)>) -> Self {
        self.external_lets = lets;
        self
    }
}

pub type Pass = fn(Stmt, &mut PassCtx) -> Stmt;

/// The pipeline, in order.
pub const PIPELINE: [(&str, Pass); 14] = [
    ("inject_alloc_stmts", inject_alloc_stmts),
    ("inject_dangling_lets", inject_dangling_lets),
    ("inject_external_lets", inject_external_lets),
    ("inject_global_alloc", inject_global_alloc),
    ("fixup_idiv", fixup_idiv),
    ("finalize_vars", finalize_vars),
    ("merge_slm_buffers", merge_slm_buffers),
    ("inject_send", inject_send),
    ("simplify", simplify),
    ("optimize_alloc_let", optimize_alloc_let),
    ("split_wide_stores", split_wide_stores),
    ("fixup_if_conditions", fixup_if_conditions),
    ("eliminate_common_subexprs", eliminate_common_subexprs),
    ("inject_bank_conflict_attrs", inject_bank_conflict_attrs),
];

/// Run every pass over `stmt`.
pub fn run_pipeline(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    let mut stmt = stmt;
    for (name, pass) in PIPELINE {
        stmt = pass(stmt, ctx);
        trace!(pass = name, stmts = stmt.count(), "pass done");
    }
    stmt
}
