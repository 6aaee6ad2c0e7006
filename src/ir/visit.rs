//! Generic folds over the instruction tree.
//!
//! `Rewriter` rebuilds a tree by value; override `rewrite_expr` or
//! `rewrite_stmt` for the node kinds a pass cares about and call
//! `walk_expr`/`walk_stmt` to recurse into the rest. `Visitor` is the
//! read-only counterpart.

use std::collections::BTreeSet;

use super::{Access, Call, Expr, Stmt};

pub trait Rewriter {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        walk_expr(self, e)
    }

    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        walk_stmt(self, s)
    }
}

fn boxed<R: Rewriter + ?Sized>(r: &mut R, e: Box<Expr>) -> Box<Expr> {
    Box::new(r.rewrite_expr(*e))
}

fn boxed_stmt<R: Rewriter + ?Sized>(r: &mut R, s: Box<Stmt>) -> Box<Stmt> {
    Box::new(r.rewrite_stmt(*s))
}

/// Rebuild `e` with every child expression rewritten.
pub fn walk_expr<R: Rewriter + ?Sized>(r: &mut R, e: Expr) -> Expr {
    match e {
        Expr::Int(..)
        | Expr::Float(_)
        | Expr::Bool(_)
        | Expr::Var(_)
        | Expr::ConstVar(_)
        | Expr::Arg { .. } => e,
        Expr::Load { ty, buf, off } => Expr::Load {
            ty,
            buf: boxed(r, buf),
            off,
        },
        Expr::Offset { buf, off } => Expr::Offset {
            buf: boxed(r, buf),
            off,
        },
        Expr::Binary { op, a, b } => Expr::Binary {
            op,
            a: boxed(r, a),
            b: boxed(r, b),
        },
        Expr::Ternary { op, a, b, c } => Expr::Ternary {
            op,
            a: boxed(r, a),
            b: boxed(r, b),
            c: boxed(r, c),
        },
        Expr::Iif {
            cond,
            then,
            otherwise,
        } => Expr::Iif {
            cond: boxed(r, cond),
            then: boxed(r, then),
            otherwise: boxed(r, otherwise),
        },
        Expr::Cast { ty, value } => Expr::Cast {
            ty,
            value: boxed(r, value),
        },
        Expr::Broadcast { value, elems } => Expr::Broadcast {
            value: boxed(r, value),
            elems,
        },
    }
}

/// Rebuild `s` with every child statement and expression rewritten.
pub fn walk_stmt<R: Rewriter + ?Sized>(r: &mut R, s: Stmt) -> Stmt {
    match s {
        Stmt::Seq(items) => Stmt::Seq(items.into_iter().map(|s| r.rewrite_stmt(s)).collect()),
        Stmt::Let { var, value, body } => Stmt::Let {
            var,
            value: r.rewrite_expr(value),
            body: body.map(|b| boxed_stmt(r, b)),
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
            body: boxed_stmt(r, body),
        },
        Stmt::Store { buf, off, value } => Stmt::Store {
            buf: r.rewrite_expr(buf),
            off,
            value: r.rewrite_expr(value),
        },
        Stmt::Access(a) => Stmt::Access(Access {
            mem_buf: r.rewrite_expr(a.mem_buf),
            mem_off: r.rewrite_expr(a.mem_off),
            reg_buf: a.reg_buf.map(|b| r.rewrite_expr(b)),
            ..a
        }),
        Stmt::Call(c) => Stmt::Call(Call {
            args: c.args.into_iter().map(|a| r.rewrite_expr(a)).collect(),
            ..c
        }),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => Stmt::If {
            cond: r.rewrite_expr(cond),
            then: boxed_stmt(r, then),
            otherwise: otherwise.map(|o| boxed_stmt(r, o)),
        },
        Stmt::For {
            var,
            init,
            bound,
            body,
        } => Stmt::For {
            var,
            init: r.rewrite_expr(init),
            bound: r.rewrite_expr(bound),
            body: boxed_stmt(r, body),
        },
        Stmt::While { cond, body } => Stmt::While {
            cond: r.rewrite_expr(cond),
            body: boxed_stmt(r, body),
        },
    }
}

// ─── Visitor ──────────────────────────────────────────────────────

pub trait Visitor {
    fn visit_expr(&mut self, e: &Expr) {
        visit_expr_children(self, e)
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        visit_stmt_children(self, s)
    }
}

pub fn visit_expr_children<V: Visitor + ?Sized>(v: &mut V, e: &Expr) {
    match e {
        Expr::Int(..)
        | Expr::Float(_)
        | Expr::Bool(_)
        | Expr::Var(_)
        | Expr::ConstVar(_)
        | Expr::Arg { .. } => {}
        Expr::Load { buf, .. } | Expr::Offset { buf, .. } => v.visit_expr(buf),
        Expr::Binary { a, b, .. } => {
            v.visit_expr(a);
            v.visit_expr(b);
        }
        Expr::Ternary { a, b, c, .. } => {
            v.visit_expr(a);
            v.visit_expr(b);
            v.visit_expr(c);
        }
        Expr::Iif {
            cond,
            then,
            otherwise,
        } => {
            v.visit_expr(cond);
            v.visit_expr(then);
            v.visit_expr(otherwise);
        }
        Expr::Cast { value, .. } | Expr::Broadcast { value, .. } => v.visit_expr(value),
    }
}

pub fn visit_stmt_children<V: Visitor + ?Sized>(v: &mut V, s: &Stmt) {
    match s {
        Stmt::Seq(items) => items.iter().for_each(|s| v.visit_stmt(s)),
        Stmt::Let { value, body, .. } => {
            v.visit_expr(value);
            if let Some(b) = body {
                v.visit_stmt(b);
            }
        }
        Stmt::Alloc { body, .. } => v.visit_stmt(body),
        Stmt::Store { buf, value, .. } => {
            v.visit_expr(buf);
            v.visit_expr(value);
        }
        Stmt::Access(a) => {
            v.visit_expr(&a.mem_buf);
            v.visit_expr(&a.mem_off);
            if let Some(b) = &a.reg_buf {
                v.visit_expr(b);
            }
        }
        Stmt::Call(c) => c.args.iter().for_each(|a| v.visit_expr(a)),
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            v.visit_expr(cond);
            v.visit_stmt(then);
            if let Some(o) = otherwise {
                v.visit_stmt(o);
            }
        }
        Stmt::For {
            init, bound, body, ..
        } => {
            v.visit_expr(init);
            v.visit_expr(bound);
            v.visit_stmt(body);
        }
        Stmt::While { cond, body } => {
            v.visit_expr(cond);
            v.visit_stmt(body);
        }
    }
}

// ─── Use queries ──────────────────────────────────────────────────

struct NameCollector {
    names: BTreeSet<String>,
}

impl Visitor for NameCollector {
    fn visit_expr(&mut self, e: &Expr) {
        match e {
            Expr::Var(v) | Expr::ConstVar(v) => {
                self.names.insert(v.name.clone());
            }
            Expr::Arg { name, .. } => {
                self.names.insert(name.clone());
            }
            _ => visit_expr_children(self, e),
        }
    }
}

/// Names of all variables and arguments referenced by `s`.
pub fn collect_vars(s: &Stmt) -> BTreeSet<String> {
    let mut c = NameCollector {
        names: BTreeSet::new(),
    };
    c.visit_stmt(s);
    c.names
}

/// Names referenced by a single expression.
pub fn collect_expr_vars(e: &Expr) -> BTreeSet<String> {
    let mut c = NameCollector {
        names: BTreeSet::new(),
    };
    c.visit_expr(e);
    c.names
}

struct UseFinder<'a> {
    name: &'a str,
    found: bool,
}

impl Visitor for UseFinder<'_> {
    fn visit_expr(&mut self, e: &Expr) {
        if self.found {
            return;
        }
        match e {
            Expr::Var(v) | Expr::ConstVar(v) if v.name == self.name => self.found = true,
            Expr::Arg { name, .. } if name == self.name => self.found = true,
            _ => visit_expr_children(self, e),
        }
    }

    fn visit_stmt(&mut self, s: &Stmt) {
        if !self.found {
            visit_stmt_children(self, s);
        }
    }
}

/// True if `s` references a variable or argument called `name`.
pub fn uses_var(s: &Stmt, name: &str) -> bool {
    let mut f = UseFinder { name, found: false };
    f.visit_stmt(s);
    f.found
}
