use crate::ir::{uses_var, walk_stmt, Rewriter, Stmt};

use super::PassCtx;

/// Turn every dangling let into a scoped let over the remainder of its
/// sequence. Lets nothing reads are dropped.
pub fn inject_dangling_lets(stmt: Stmt, _ctx: &mut PassCtx) -> Stmt {
    DanglingLets.rewrite_stmt(stmt)
}

struct DanglingLets;

impl Rewriter for DanglingLets {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Seq(items) => scope_seq(self, items),
            // Outside a sequence there is nothing left to scope over.
            Stmt::Let { body: None, .. } => Stmt::empty(),
            other => walk_stmt(self, other),
        }
    }
}

fn scope_seq(r: &mut DanglingLets, items: Vec<Stmt>) -> Stmt {
    let mut iter = items.into_iter();
    let mut head = Vec::new();
    while let Some(item) = iter.next() {
        match item {
            Stmt::Let {
                var,
                value,
                body: None,
            } => {
                let rest = scope_seq(r, iter.collect());
                if uses_var(&rest, &var.name) {
                    head.push(Stmt::let_in(var, value, rest));
                } else {
                    head.extend(rest.into_items());
                }
                return Stmt::Seq(head);
            }
            other => head.push(r.rewrite_stmt(other)),
        }
    }
    Stmt::Seq(head)
}

/// Bind the kernel-entry values derived from arguments around the whole
/// body. Only values the body reads are bound; earlier entries may be
/// referenced by later ones, so the first entry is outermost.
pub fn inject_external_lets(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    let mut stmt = stmt;
    for (var, value) in ctx.external_lets.iter().rev() {
        if uses_var(&stmt, &var.name) {
            stmt = Stmt::let_in(var.clone(), value.clone(), stmt);
        }
    }
    stmt
}
