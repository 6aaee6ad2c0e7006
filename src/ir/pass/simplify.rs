//! Constant folding and structural cleanup.

use crate::ir::{walk_expr, walk_stmt, BinOp, Expr, Rewriter, ScalarType, Stmt, Type};

use super::PassCtx;

// ─── simplify ─────────────────────────────────────────────────────

/// Fold constant expressions, remove algebraic identities and drop
/// statements that provably do nothing.
pub fn simplify(stmt: Stmt, _ctx: &mut PassCtx) -> Stmt {
    Simplifier.rewrite_stmt(stmt)
}

struct Simplifier;

impl Rewriter for Simplifier {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        match walk_expr(self, e) {
            Expr::Binary { op, a, b } => fold_binary(op, *a, *b),
            Expr::Iif {
                cond,
                then,
                otherwise,
            } => match *cond {
                Expr::Bool(true) => *then,
                Expr::Bool(false) => *otherwise,
                cond => Expr::Iif {
                    cond: Box::new(cond),
                    then,
                    otherwise,
                },
            },
            Expr::Cast { ty, value } => fold_cast(ty, *value),
            other => other,
        }
    }

    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match walk_stmt(self, s) {
            Stmt::Seq(items) => Stmt::Seq(
                items
                    .into_iter()
                    .flat_map(Stmt::into_items)
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            Stmt::If {
                cond,
                then,
                otherwise,
            } => match const_truth(&cond) {
                Some(true) => *then,
                Some(false) => otherwise.map(|o| *o).unwrap_or_else(Stmt::empty),
                None => {
                    let otherwise = otherwise.filter(|o| !o.is_empty());
                    if then.is_empty() && otherwise.is_none() {
                        Stmt::empty()
                    } else {
                        Stmt::If {
                            cond,
                            then,
                            otherwise,
                        }
                    }
                }
            },
            Stmt::While { cond, body } => match const_truth(&cond) {
                Some(false) => Stmt::empty(),
                _ => Stmt::While { cond, body },
            },
            Stmt::For {
                var,
                init,
                bound,
                body,
            } => {
                let trivially_empty = match (init.as_int(), bound.as_int()) {
                    (Some(i), Some(b)) => b <= i,
                    _ => false,
                };
                if trivially_empty || body.is_empty() {
                    Stmt::empty()
                } else {
                    Stmt::For {
                        var,
                        init,
                        bound,
                        body,
                    }
                }
            }
            Stmt::Let {
                body: Some(body), ..
            }
            | Stmt::Alloc { body, .. }
                if body.is_empty() =>
            {
                Stmt::empty()
            }
            other => other,
        }
    }
}

fn const_truth(e: &Expr) -> Option<bool> {
    match e {
        Expr::Bool(b) => Some(*b),
        Expr::Int(v, _) => Some(*v != 0),
        _ => None,
    }
}

fn fold_int(op: BinOp, x: i64, y: i64) -> Option<i64> {
    Some(match op {
        BinOp::Add => x.wrapping_add(y),
        BinOp::Sub => x.wrapping_sub(y),
        BinOp::Mul => x.wrapping_mul(y),
        BinOp::Div if y != 0 => x / y,
        BinOp::Mod if y != 0 => x % y,
        BinOp::DivUp if y > 0 => (x + y - 1).div_euclid(y),
        BinOp::Min => x.min(y),
        BinOp::Max => x.max(y),
        BinOp::Shl if (0..64).contains(&y) => x << y,
        BinOp::Shr if (0..64).contains(&y) => x >> y,
        _ => return None,
    })
}

fn fold_cmp<T: PartialOrd>(op: BinOp, x: T, y: T) -> bool {
    match op {
        BinOp::Lt => x < y,
        BinOp::Le => x <= y,
        BinOp::Gt => x > y,
        BinOp::Ge => x >= y,
        BinOp::Eq => x == y,
        _ => x != y,
    }
}

fn fold_binary(op: BinOp, a: Expr, b: Expr) -> Expr {
    match (&a, &b) {
        (Expr::Int(x, sa), Expr::Int(y, _)) => {
            if op.is_cmp() {
                return Expr::Bool(fold_cmp(op, *x, *y));
            }
            match op {
                BinOp::And => return Expr::Bool(*x != 0 && *y != 0),
                BinOp::Or => return Expr::Bool(*x != 0 || *y != 0),
                _ => {}
            }
            if let Some(v) = fold_int(op, *x, *y) {
                return Expr::Int(v, *sa);
            }
        }
        (Expr::Float(_), Expr::Float(_)) => {
            let (x, y) = (a.as_f32().unwrap_or(0.0), b.as_f32().unwrap_or(0.0));
            if op.is_cmp() {
                return Expr::Bool(fold_cmp(op, x, y));
            }
            let v = match op {
                BinOp::Add => Some(x + y),
                BinOp::Sub => Some(x - y),
                BinOp::Mul => Some(x * y),
                BinOp::Div => Some(x / y),
                BinOp::Min => Some(x.min(y)),
                BinOp::Max => Some(x.max(y)),
                _ => None,
            };
            if let Some(v) = v {
                return Expr::f32(v);
            }
        }
        (Expr::Bool(x), Expr::Bool(y)) => match op {
            BinOp::And => return Expr::Bool(*x && *y),
            BinOp::Or => return Expr::Bool(*x || *y),
            BinOp::Eq => return Expr::Bool(x == y),
            BinOp::Ne => return Expr::Bool(x != y),
            _ => {}
        },
        _ => {}
    }
    match op {
        BinOp::And => match (const_truth(&a), const_truth(&b)) {
            (Some(false), _) | (_, Some(false)) => return Expr::Bool(false),
            (Some(true), _) if b.ty().is_bool() => return b,
            (_, Some(true)) if a.ty().is_bool() => return a,
            _ => {}
        },
        BinOp::Or => match (const_truth(&a), const_truth(&b)) {
            (Some(true), _) | (_, Some(true)) => return Expr::Bool(true),
            (Some(false), _) if b.ty().is_bool() => return b,
            (_, Some(false)) if a.ty().is_bool() => return a,
            _ => {}
        },
        _ => {}
    }
    if let Some(e) = identity(op, &a, &b) {
        return e;
    }
    Expr::binary(op, a, b)
}

fn identity(op: BinOp, a: &Expr, b: &Expr) -> Option<Expr> {
    let scalar_int = |e: &Expr| {
        let ty = e.ty();
        ty.is_int() && ty.elems == 1
    };
    match op {
        BinOp::Add if b.is_int_value(0) => Some(a.clone()),
        BinOp::Add if a.is_int_value(0) && scalar_int(b) => Some(b.clone()),
        BinOp::Sub if b.is_int_value(0) => Some(a.clone()),
        BinOp::Mul | BinOp::Div if b.is_int_value(1) => Some(a.clone()),
        BinOp::Mul if a.is_int_value(1) && scalar_int(b) => Some(b.clone()),
        BinOp::Mul if b.is_int_value(0) && scalar_int(a) => Some(Expr::Int(0, a.ty().scalar)),
        BinOp::Mul if a.is_int_value(0) && scalar_int(b) => Some(Expr::Int(0, b.ty().scalar)),
        BinOp::Mod if b.is_int_value(1) && scalar_int(a) => Some(Expr::Int(0, a.ty().scalar)),
        _ => None,
    }
}

fn fold_cast(ty: Type, value: Expr) -> Expr {
    if ty.elems == 1 {
        match (&value, ty.scalar) {
            (Expr::Int(v, _), s) if s.is_int() => return Expr::Int(*v, s),
            (Expr::Int(v, _), ScalarType::F32) => return Expr::f32(*v as f32),
            (Expr::Int(v, _), ScalarType::Bool) => return Expr::Bool(*v != 0),
            (Expr::Bool(b), s) if s.is_int() => return Expr::Int(i64::from(*b), s),
            (Expr::Float(_), ScalarType::F32) => return value,
            _ => {}
        }
    }
    value.cast(ty)
}

// ─── fixup_if_conditions ──────────────────────────────────────────

/// Make every branch condition a boolean by comparing integer
/// conditions against zero.
pub fn fixup_if_conditions(stmt: Stmt, _ctx: &mut PassCtx) -> Stmt {
    IfConditions.rewrite_stmt(stmt)
}

struct IfConditions;

fn to_bool(cond: Expr) -> Expr {
    if cond.ty().is_bool() {
        cond
    } else {
        let zero = Expr::Int(0, cond.ty().scalar);
        cond.cmp_ne(zero)
    }
}

impl Rewriter for IfConditions {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match walk_stmt(self, s) {
            Stmt::If {
                cond,
                then,
                otherwise,
            } => Stmt::If {
                cond: to_bool(cond),
                then,
                otherwise,
            },
            Stmt::While { cond, body } => Stmt::While {
                cond: to_bool(cond),
                body,
            },
            other => other,
        }
    }
}
