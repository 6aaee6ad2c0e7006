//! Allocation placement and cleanup.

#[cfg(test)]
use std::collections::BTreeMap;

use crate::ir::builder::BufferDecl;
use crate::ir::{
    collect_expr_vars, uses_var, walk_expr, walk_stmt, AllocKind, Expr, Rewriter, Stmt, Var,
};

use super::PassCtx;

// ─── inject_alloc_stmts ───────────────────────────────────────────

/// Wrap each register and shared-scratch buffer around the smallest
/// statement range covering all its uses. Unused buffers get no
/// allocation.
pub fn inject_alloc_stmts(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    let mut stmt = stmt;
    for decl in ctx.bufs.decls() {
        if decl.kind == AllocKind::Global || !uses_var(&stmt, &decl.var.name) {
            continue;
        }
        stmt = place(stmt, decl);
    }
    stmt
}

fn expr_uses(e: &Expr, name: &str) -> bool {
    collect_expr_vars(e).contains(name)
}

fn wrap(decl: &BufferDecl, body: Stmt) -> Stmt {
    Stmt::alloc(decl.var.clone(), decl.size, decl.kind, body)
}

fn place(stmt: Stmt, decl: &BufferDecl) -> Stmt {
    let name = decl.var.name.as_str();
    match stmt {
        Stmt::Seq(items) => place_in_seq(items, decl),
        Stmt::For {
            var,
            init,
            bound,
            body,
        } if !expr_uses(&init, name) && !expr_uses(&bound, name) => Stmt::For {
            var,
            init,
            bound,
            body: Box::new(place(*body, decl)),
        },
        Stmt::While { cond, body } if !expr_uses(&cond, name) => Stmt::While {
            cond,
            body: Box::new(place(*body, decl)),
        },
        Stmt::Let {
            var,
            value,
            body: Some(body),
        } if !expr_uses(&value, name) => Stmt::Let {
            var,
            value,
            body: Some(Box::new(place(*body, decl))),
        },
        Stmt::Alloc {
            buf,
            size,
            kind,
            body,
        } => Stmt::Alloc {
            buf,
            size,
            kind,
            body: Box::new(place(*body, decl)),
        },
        Stmt::If {
            cond,
            then,
            otherwise,
        } if !expr_uses(&cond, name) => {
            let in_then = uses_var(&then, name);
            let in_else = otherwise.as_ref().is_some_and(|o| uses_var(o, name));
            match (in_then, in_else) {
                (true, false) => Stmt::If {
                    cond,
                    then: Box::new(place(*then, decl)),
                    otherwise,
                },
                (false, true) => Stmt::If {
                    cond,
                    then,
                    otherwise: otherwise.map(|o| Box::new(place(*o, decl))),
                },
                _ => wrap(
                    decl,
                    Stmt::If {
                        cond,
                        then,
                        otherwise,
                    },
                ),
            }
        }
        other => wrap(decl, other),
    }
}

fn place_in_seq(items: Vec<Stmt>, decl: &BufferDecl) -> Stmt {
    let name = decl.var.name.as_str();
    let users: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, s)| uses_var(s, name))
        .map(|(i, _)| i)
        .collect();
    let (first, mut last) = match (users.first(), users.last()) {
        (Some(&f), Some(&l)) => (f, l),
        _ => return Stmt::Seq(items),
    };
    // A dangling let inside the range must stay visible to later statements.
    let escapes = items[first..=last].iter().any(|s| match s {
        Stmt::Let {
            var, body: None, ..
        } => items[last + 1..].iter().any(|t| uses_var(t, &var.name)),
        _ => false,
    });
    if escapes {
        last = items.len() - 1;
    }
    let mut items = items;
    if first == last && !escapes {
        let item = std::mem::replace(&mut items[first], Stmt::empty());
        items[first] = place(item, decl);
        return Stmt::Seq(items);
    }
    let after = items.split_off(last + 1);
    let range = items.split_off(first);
    items.push(wrap(decl, Stmt::Seq(range)));
    items.extend(after);
    Stmt::Seq(items)
}

// ─── inject_global_alloc ──────────────────────────────────────────

/// Wrap the kernel in whole-lifetime allocations of its pointer arguments.
pub fn inject_global_alloc(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    let ptrs: Vec<String> = ctx.vars.ptr_args().map(|a| a.name.clone()).collect();
    let mut stmt = stmt;
    for name in ptrs.iter().rev() {
        if uses_var(&stmt, name) {
            stmt = Stmt::alloc(Var::ptr(name), 0, AllocKind::Global, stmt);
        }
    }
    stmt
}

// ─── merge_slm_buffers ────────────────────────────────────────────

/// Alias shared-scratch allocations whose lifetimes do not nest onto one
/// buffer sized for the largest of them.
pub fn merge_slm_buffers(stmt: Stmt, _ctx: &mut PassCtx) -> Stmt {
    let mut found = Vec::new();
    collect_slm(&stmt, &mut found);
    if found.len() < 2 {
        return stmt;
    }
    let target = found[0].0.clone();
    let size = found.iter().map(|(_, s)| *s).max().unwrap_or(0);
    let mut merger = SlmMerger { target, size };
    merger.rewrite_stmt(stmt)
}

fn collect_slm(s: &Stmt, out: &mut Vec<(Var, u32)>) {
    match s {
        Stmt::Alloc {
            buf,
            size,
            kind: AllocKind::Slm,
            ..
        } => out.push((buf.clone(), *size)),
        Stmt::Seq(items) => items.iter().for_each(|s| collect_slm(s, out)),
        Stmt::Let { body: Some(b), .. }
        | Stmt::Alloc { body: b, .. }
        | Stmt::For { body: b, .. }
        | Stmt::While { body: b, .. } => collect_slm(b, out),
        Stmt::If {
            then, otherwise, ..
        } => {
            collect_slm(then, out);
            if let Some(o) = otherwise {
                collect_slm(o, out);
            }
        }
        _ => {}
    }
}

struct SlmMerger {
    target: Var,
    size: u32,
}

impl Rewriter for SlmMerger {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Alloc {
                buf,
                kind: AllocKind::Slm,
                body,
                ..
            } => {
                let mut renamer = Substitute::new(&buf.name, self.target.expr());
                Stmt::alloc(
                    self.target.clone(),
                    self.size,
                    AllocKind::Slm,
                    renamer.rewrite_stmt(*body),
                )
            }
            other => walk_stmt(self, other),
        }
    }
}

// ─── optimize_alloc_let ───────────────────────────────────────────

/// Drop allocations and lets whose body no longer references them and
/// inline lets bound to constants or plain variables.
pub fn optimize_alloc_let(stmt: Stmt, _ctx: &mut PassCtx) -> Stmt {
    AllocLetOptimizer.rewrite_stmt(stmt)
}

struct AllocLetOptimizer;

impl Rewriter for AllocLetOptimizer {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match walk_stmt(self, s) {
            Stmt::Alloc { buf, body, .. } if !uses_var(&body, &buf.name) => *body,
            Stmt::Let {
                var,
                value,
                body: Some(body),
            } => {
                if !uses_var(&body, &var.name) {
                    return *body;
                }
                let trivial = value.is_const()
                    || matches!(value, Expr::Var(_) | Expr::ConstVar(_) | Expr::Arg { .. });
                if trivial {
                    Substitute::new(&var.name, value).rewrite_stmt(*body)
                } else {
                    Stmt::let_in(var, value, *body)
                }
            }
            other => other,
        }
    }
}

/// Replace references to one variable by an expression.
pub(super) struct Substitute<'a> {
    name: &'a str,
    value: Expr,
}

impl<'a> Substitute<'a> {
    pub(super) fn new(name: &'a str, value: Expr) -> Self {
        Self { name, value }
    }
}

impl Rewriter for Substitute<'_> {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Var(v) | Expr::ConstVar(v) if v.name == self.name => self.value.clone(),
            other => walk_expr(self, other),
        }
    }
}

/// Sizes of allocations by name.
#[cfg(test)]
pub(super) fn alloc_sizes(s: &Stmt) -> BTreeMap<String, (u32, AllocKind)> {
    fn go(s: &Stmt, out: &mut BTreeMap<String, (u32, AllocKind)>) {
        match s {
            Stmt::Alloc {
                buf,
                size,
                kind,
                body,
            } => {
                out.insert(buf.name.clone(), (*size, *kind));
                go(body, out);
            }
            Stmt::Seq(items) => items.iter().for_each(|s| go(s, out)),
            Stmt::Let { body: Some(b), .. }
            | Stmt::For { body: b, .. }
            | Stmt::While { body: b, .. } => go(b, out),
            Stmt::If {
                then, otherwise, ..
            } => {
                go(then, out);
                if let Some(o) = otherwise {
                    go(o, out);
                }
            }
            _ => {}
        }
    }
    let mut out = BTreeMap::new();
    go(s, &mut out);
    out
}
