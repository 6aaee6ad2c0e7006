//! Memory access lowering and register store splitting.

use crate::ir::{walk_stmt, Access, AccessOp, Expr, Func, Rewriter, Stmt};

use super::PassCtx;

// ─── inject_send ──────────────────────────────────────────────────

/// Lower abstract accesses into transfer messages of at most
/// `max_send_bytes` each.
pub fn inject_send(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    SendLowering {
        max_bytes: ctx.opts.hw.max_send_bytes,
    }
    .rewrite_stmt(stmt)
}

struct SendLowering {
    max_bytes: u32,
}

impl SendLowering {
    fn lower(&self, a: Access) -> Stmt {
        let mut items = Vec::new();
        let mut done = 0;
        while done < a.bytes {
            let bytes = (a.bytes - done).min(self.max_bytes);
            let off = i64::from(done);
            let mem_off = if off == 0 {
                a.mem_off.clone()
            } else {
                a.mem_off.clone() + off
            };
            let mut args = vec![a.mem_buf.clone(), mem_off];
            if a.op != AccessOp::Prefetch {
                if let Some(reg) = &a.reg_buf {
                    args.push(reg.clone().offset(a.reg_off + off));
                }
            }
            items.push(Stmt::call(
                Func::Send {
                    op: a.op,
                    ty: a.ty,
                    bytes,
                },
                args,
            ));
            done += bytes;
        }
        Stmt::Seq(items)
    }
}

impl Rewriter for SendLowering {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Access(a) => self.lower(a),
            other => walk_stmt(self, other),
        }
    }
}

// ─── split_wide_stores ────────────────────────────────────────────

/// Split register stores wider than `max_store_bytes` into several
/// narrower stores. Stores whose value cannot be sliced are kept whole.
pub fn split_wide_stores(stmt: Stmt, ctx: &mut PassCtx) -> Stmt {
    StoreSplitter {
        max_bytes: ctx.opts.max_store_bytes(),
    }
    .rewrite_stmt(stmt)
}

struct StoreSplitter {
    max_bytes: u32,
}

impl StoreSplitter {
    fn split(&self, buf: Expr, off: i64, value: Expr) -> Stmt {
        let ty = value.ty();
        let esize = ty.scalar.size();
        if ty.size() <= self.max_bytes || esize > self.max_bytes {
            return Stmt::store(buf, off, value);
        }
        let chunk = self.max_bytes / esize;
        let mut items = Vec::new();
        let mut lane = 0;
        while lane < ty.elems {
            let n = chunk.min(ty.elems - lane);
            match slice(&value, lane, n) {
                Some(part) => items.push(Stmt::store(
                    buf.clone(),
                    off + i64::from(lane * esize),
                    part,
                )),
                None => return Stmt::store(buf, off, value),
            }
            lane += n;
        }
        Stmt::Seq(items)
    }
}

impl Rewriter for StoreSplitter {
    fn rewrite_stmt(&mut self, s: Stmt) -> Stmt {
        match s {
            Stmt::Store { buf, off, value } => self.split(buf, off, value),
            other => walk_stmt(self, other),
        }
    }
}

/// Lanes `[lane, lane + n)` of a vector expression.
fn slice(e: &Expr, lane: u32, n: u32) -> Option<Expr> {
    let ty = e.ty();
    if ty.elems == 1 {
        return Some(e.clone());
    }
    match e {
        Expr::Load { ty, buf, off } => Some(Expr::load(
            ty.with_elems(n),
            (**buf).clone(),
            off + i64::from(lane * ty.scalar.size()),
        )),
        Expr::Broadcast { value, .. } => Some((**value).clone().broadcast(n)),
        Expr::Binary { op, a, b } => Some(Expr::binary(
            *op,
            slice(a, lane, n)?,
            slice(b, lane, n)?,
        )),
        Expr::Cast { ty, value } => Some(Expr::Cast {
            ty: ty.with_elems(n),
            value: Box::new(slice(value, lane, n)?),
        }),
        Expr::Iif {
            cond,
            then,
            otherwise,
        } => Some(Expr::iif(
            slice(cond, lane, n)?,
            slice(then, lane, n)?,
            slice(otherwise, lane, n)?,
        )),
        _ => None,
    }
}

