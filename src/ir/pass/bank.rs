use crate::ir::{walk_stmt, Attr, Expr, Rewriter, Stmt};

use super::PassCtx;

/// Mark multiply calls whose two multiplicand operands start in the same
/// register bank. Banks alternate per register.
pub fn inject_bank_conflict_attrs(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    BankConflicts {
        grf_size: i64::from(ctx.opts.hw.grf_size),
    }
    .rewrite_stmt(stmt)
}

struct BankConflicts {
    grf_size: i64,
}

impl BankConflicts {
    fn bank(&self, e: &Expr) -> Option<i64> {
        let off = match e {
            Expr::Var(_) => 0,
            Expr::Offset { buf, off } if matches!(buf.as_ref(), Expr::Var(_)) => *off,
            _ => return None,
        };
        Some(off.div_euclid(self.grf_size) % 2)
    }
}

impl Rewriter for BankConflicts {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Call(mut call) if call.func.is_multiply() && call.args.len() == 4 => {
                if let (Some(b1), Some(b2)) = (self.bank(&call.args[2]), self.bank(&call.args[3])) {
                    if b1 == b2 {
                        call.add_attr(Attr::BankConflict);
                    }
                }
                Stmt::Call(call)
            }
            other => walk_stmt(self, other),
        }
    }
}
