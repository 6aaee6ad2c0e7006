//! Windowed common-subexpression elimination.
//!
//! Sequences are split into windows of `cse_window` statements. Inside a
//! window, a pure expression that appears at least twice is bound once by
//! a `cse_N` let wrapped around the window. Register loads are never
//! shared since stores in the window may change them.

use std::collections::{BTreeSet, HashMap};

use crate::ir::builder::NameGen;
use crate::ir::{collect_expr_vars, walk_expr, walk_stmt, Expr, Rewriter, Stmt, Var};

use super::PassCtx;

const MAX_PICKS: usize = 64;

pub fn eliminate_common_subexprs(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    let mut cse = Cse {
        window: ctx.opts.cse_window.max(1),
        names: &mut ctx.names,
    };
    cse.rewrite_stmt(stmt)
}

struct Cse<'a> {
    window: usize,
    names: &'a mut NameGen,
}

impl Rewriter for Cse<'_> {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match walk_stmt(self, s) {
            Stmt::Seq(items) => {
                let mut out = Vec::new();
                let mut items = items.into_iter().peekable();
                while items.peek().is_some() {
                    let window: Vec<Stmt> = items.by_ref().take(self.window).collect();
                    out.extend(self.process(window).into_items());
                }
                Stmt::Seq(out)
            }
            other => other,
        }
    }
}

impl Cse<'_> {
    fn process(&mut self, mut items: Vec<Stmt>) -> Stmt {
        let bound = bound_vars(&items);
        let mut lets: Vec<(Var, Expr)> = Vec::new();
        for _ in 0..MAX_PICKS {
            let Some(pick) = best_candidate(&items, &lets, &bound) else {
                break;
            };
            let var = Var::new(self.names.fresh("cse"), pick.ty());
            let mut replacer = Replace {
                from: &pick,
                to: var.expr(),
            };
            items = items
                .into_iter()
                .map(|s| replacer.rewrite_stmt(s))
                .collect();
            for (_, value) in lets.iter_mut() {
                *value = replacer.rewrite_expr(value.clone());
            }
            lets.push((var, pick));
        }
        let mut body = Stmt::Seq(items);
        for (var, value) in lets {
            body = Stmt::let_in(var, value, body);
        }
        body
    }
}

/// Variables bound by statements of the window, at any depth.
fn bound_vars(items: &[Stmt]) -> BTreeSet<String> {
    fn go(s: &Stmt, out: &mut BTreeSet<String>) {
        match s {
            Stmt::Seq(v) => v.iter().for_each(|s| go(s, out)),
            Stmt::Let { var, body, .. } => {
                out.insert(var.name.clone());
                if let Some(b) = body {
                    go(b, out);
                }
            }
            Stmt::For { var, body, .. } => {
                out.insert(var.name.clone());
                go(body, out);
            }
            Stmt::Alloc { buf, body, .. } => {
                out.insert(buf.name.clone());
                go(body, out);
            }
            Stmt::While { body, .. } => go(body, out),
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
    let mut out = BTreeSet::new();
    items.iter().for_each(|s| go(s, &mut out));
    out
}

/// Expressions attached directly to a statement, excluding nested bodies.
fn item_exprs(s: &Stmt) -> Vec<&Expr> {
    match s {
        Stmt::Let { value, .. } => vec![value],
        Stmt::Store { buf, value, .. } => vec![buf, value],
        Stmt::Access(a) => {
            let mut v = vec![&a.mem_buf, &a.mem_off];
            v.extend(a.reg_buf.as_ref());
            v
        }
        Stmt::Call(c) => c.args.iter().collect(),
        Stmt::If { cond, .. } | Stmt::While { cond, .. } => vec![cond],
        Stmt::For { init, bound, .. } => vec![init, bound],
        Stmt::Seq(_) | Stmt::Alloc { .. } => Vec::new(),
    }
}

fn size(e: &Expr) -> usize {
    match e {
        Expr::Load { buf, .. } | Expr::Offset { buf, .. } => 1 + size(buf),
        Expr::Binary { a, b, .. } => 1 + size(a) + size(b),
        Expr::Ternary { a, b, c, .. } => 1 + size(a) + size(b) + size(c),
        Expr::Iif {
            cond,
            then,
            otherwise,
        } => 1 + size(cond) + size(then) + size(otherwise),
        Expr::Cast { value, .. } | Expr::Broadcast { value, .. } => 1 + size(value),
        _ => 1,
    }
}

fn has_load(e: &Expr) -> bool {
    match e {
        Expr::Load { .. } => true,
        Expr::Offset { buf, .. } => has_load(buf),
        Expr::Binary { a, b, .. } => has_load(a) || has_load(b),
        Expr::Ternary { a, b, c, .. } => has_load(a) || has_load(b) || has_load(c),
        Expr::Iif {
            cond,
            then,
            otherwise,
        } => has_load(cond) || has_load(then) || has_load(otherwise),
        Expr::Cast { value, .. } | Expr::Broadcast { value, .. } => has_load(value),
        _ => false,
    }
}

#[derive(Default)]
struct Counter {
    order: Vec<Expr>,
    counts: HashMap<Expr, usize>,
}

impl Counter {
    fn count(&mut self, e: &Expr, bound: &BTreeSet<String>) {
        let shareable = matches!(
            e,
            Expr::Binary { .. } | Expr::Ternary { .. } | Expr::Iif { .. } | Expr::Cast { .. }
        ) && size(e) >= 3
            && !has_load(e)
            && collect_expr_vars(e).is_disjoint(bound);
        if shareable {
            let n = self.counts.entry(e.clone()).or_insert(0);
            if *n == 0 {
                self.order.push(e.clone());
            }
            *n += 1;
        }
        match e {
            Expr::Load { buf, .. } | Expr::Offset { buf, .. } => self.count(buf, bound),
            Expr::Binary { a, b, .. } => {
                self.count(a, bound);
                self.count(b, bound);
            }
            Expr::Ternary { a, b, c, .. } => {
                self.count(a, bound);
                self.count(b, bound);
                self.count(c, bound);
            }
            Expr::Iif {
                cond,
                then,
                otherwise,
            } => {
                self.count(cond, bound);
                self.count(then, bound);
                self.count(otherwise, bound);
            }
            Expr::Cast { value, .. } | Expr::Broadcast { value, .. } => self.count(value, bound),
            _ => {}
        }
    }
}

/// Largest expression occurring at least twice; the earliest wins ties.
fn best_candidate(
    items: &[Stmt],
    lets: &[(Var, Expr)],
    bound: &BTreeSet<String>,
) -> Option<Expr> {
    let mut counter = Counter::default();
    for s in items {
        for e in item_exprs(s) {
            counter.count(e, bound);
        }
    }
    for (_, value) in lets {
        counter.count(value, bound);
    }
    let mut best: Option<&Expr> = None;
    for e in &counter.order {
        if counter.counts.get(e).copied().unwrap_or(0) < 2 {
            continue;
        }
        if best.map_or(true, |b| size(e) > size(b)) {
            best = Some(e);
        }
    }
    best.cloned()
}

struct Replace<'a> {
    from: &'a Expr,
    to: Expr,
}

impl Rewriter for Replace<'_> {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        if &e == self.from {
            self.to.clone()
        } else {
            walk_expr(self, e)
        }
    }
}
