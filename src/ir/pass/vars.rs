use crate::ir::builder::VarManager;
use crate::ir::{walk_expr, BinOp, Expr, Rewriter, Stmt, TernOp, Type};

use super::PassCtx;

// ─── fixup_idiv ───────────────────────────────────────────────────

/// Rewrite integer division and modulo by a runtime argument into magic
/// number form. Each divisor gets a companion `X_magic` argument.
pub fn fixup_idiv(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    IdivFixup {
        vars: &mut ctx.vars,
    }
    .rewrite_stmt(stmt)
}

struct IdivFixup<'a> {
    vars: &'a mut VarManager,
}

impl Rewriter for IdivFixup<'_> {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        match walk_expr(self, e) {
            Expr::Binary {
                op: op @ (BinOp::Div | BinOp::Mod),
                a,
                b,
            } if a.ty().is_int() => match self.vars.get_idiv_magic(&b) {
                Some(magic) => {
                    let tern = if op == BinOp::Div {
                        TernOp::IDiv
                    } else {
                        TernOp::IMod
                    };
                    Expr::ternary(tern, *a, b.cast(Type::u32()), magic)
                }
                None => Expr::Binary { op, a, b },
            },
            other => other,
        }
    }
}

// ─── finalize_vars ────────────────────────────────────────────────

/// Resolve runtime constants and argument-named variables into argument
/// references and expand rounding-up division.
pub fn finalize_vars(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    VarFinalizer {
        vars: &mut ctx.vars,
    }
    .rewrite_stmt(stmt)
}

struct VarFinalizer<'a> {
    vars: &'a mut VarManager,
}

impl VarFinalizer<'_> {
    fn arg(&mut self, name: &str, ty: Type) -> Expr {
        if !self.vars.is_arg(name) {
            self.vars.add_scalar_arg(name, ty);
        }
        let slot = self.vars.slot(name).unwrap_or(0);
        Expr::Arg {
            name: name.to_string(),
            ty,
            slot,
        }
    }
}

impl Rewriter for VarFinalizer<'_> {
    fn rewrite_expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::ConstVar(v) => self.arg(&v.name, v.ty),
            Expr::Var(v) if self.vars.is_arg(&v.name) => self.arg(&v.name, v.ty),
            Expr::Binary {
                op: BinOp::DivUp,
                a,
                b,
            } => {
                let a = self.rewrite_expr(*a);
                let b = self.rewrite_expr(*b);
                (a + b.clone() - 1) / b
            }
            other => walk_expr(self, other),
        }
    }
}
