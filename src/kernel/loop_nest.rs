//! Reduction loop nest and the mixed-radix iterator over it.

use crate::ir::builder::BufferManager;
use crate::ir::{Dim, Expr, Stmt, Type, Var};

use super::offset::OffsetCtx;
use super::plan::CoordInfo;

#[derive(Clone, Debug, PartialEq)]
pub struct Loop {
    pub dim: Dim,
    pub var: Var,
    pub init: Expr,
    pub bound: Expr,
}

/// Loops innermost first, plus the total number of iterations.
#[derive(Clone, Debug, PartialEq)]
pub struct LoopNest {
    loops: Vec<Loop>,
    linear_bound: Expr,
}

impl Default for LoopNest {
    fn default() -> Self {
        Self {
            loops: Vec::new(),
            linear_bound: Expr::int(1),
        }
    }
}

impl LoopNest {
    /// Build the nest for `loop_desc` (innermost first). Dimensions with a
    /// static trip count of 1 are skipped. With `dynamic`, each loop starts
    /// at its `(dim, init)` entry and the linear bound is the given
    /// expression; otherwise loops start at 0 and the bound is the product
    /// of the trip counts.
    pub fn build(
        loop_desc: &[Dim],
        coord_info: &CoordInfo,
        dynamic: Option<(&[(Dim, Var)], Expr)>,
    ) -> Self {
        let mut loops = Vec::new();
        let mut linear_bound = Expr::int(1);
        for dim in loop_desc {
            let size = coord_info.loop_size(dim);
            if size.is_int_value(1) {
                continue;
            }
            let init = match &dynamic {
                Some((inits, _)) => inits
                    .iter()
                    .find(|(d, _)| d == dim)
                    .map(|(_, v)| v.expr())
                    .unwrap_or_else(|| Expr::int(0)),
                None => {
                    linear_bound = mul_static(linear_bound, size.clone());
                    Expr::int(0)
                }
            };
            loops.push(Loop {
                dim: dim.clone(),
                var: coord_info.loop_index(dim),
                init,
                bound: size,
            });
        }
        if let Some((_, bound)) = dynamic {
            linear_bound = bound;
        }
        Self {
            loops,
            linear_bound,
        }
    }

    pub fn nloops(&self) -> usize {
        self.loops.len()
    }

    pub fn loops(&self) -> &[Loop] {
        &self.loops
    }

    pub fn get(&self, i: usize) -> Option<&Loop> {
        self.loops.get(i)
    }

    pub fn linear_bound(&self) -> &Expr {
        &self.linear_bound
    }

    /// The linear bound when it is known at build time.
    pub fn static_bound(&self) -> Option<i64> {
        self.linear_bound.as_int()
    }
}

fn mul_static(a: Expr, b: Expr) -> Expr {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => Expr::int(x * y),
        (Some(1), None) => b,
        _ => a * b,
    }
}

// ─── LoopIterator ─────────────────────────────────────────────────

/// Mixed-radix counter over a loop nest, kept in registers, plus a linear
/// countdown of the remaining iterations.
#[derive(Clone, Debug)]
pub struct LoopIterator {
    nest: LoopNest,
    idxs: Vec<Expr>,
    linear: Expr,
}

impl LoopIterator {
    /// Registers are named `{prefix}_idx{i}` and `{prefix}_linear`.
    pub fn new(bufs: &mut BufferManager, nest: &LoopNest, prefix: &str) -> Self {
        let idxs = (0..nest.nloops())
            .map(|i| bufs.get(&format!("{}_idx{}", prefix, i), 4))
            .collect();
        let linear = bufs.get(&format!("{}_linear", prefix), 4);
        Self {
            nest: nest.clone(),
            idxs,
            linear,
        }
    }

    fn idx(&self, i: usize) -> Expr {
        Expr::load(Type::s32(), self.idxs[i].clone(), 0)
    }

    fn linear_idx(&self) -> Expr {
        Expr::load(Type::s32(), self.linear.clone(), 0)
    }

    pub fn init_stmt(&self) -> Stmt {
        let mut stmts = vec![Stmt::store(
            self.linear.clone(),
            0,
            self.nest.linear_bound().clone() - 1,
        )];
        for (buf, l) in self.idxs.iter().zip(self.nest.loops()) {
            stmts.push(Stmt::store(buf.clone(), 0, l.init.clone()));
        }
        Stmt::seq(stmts)
    }

    pub fn in_bounds(&self) -> Expr {
        self.linear_idx().cmp_ge(Expr::int(0))
    }

    pub fn check_bounds_stmt(&self, body: Stmt) -> Stmt {
        Stmt::if_then(self.in_bounds(), body)
    }

    /// Advance by one iteration: bump the innermost index and carry into
    /// outer levels, updating `off` at every level touched.
    pub fn inc_stmt(&self, off: &OffsetCtx) -> Stmt {
        let mut body = Stmt::empty();
        for i in (0..self.nest.nloops()).rev() {
            let mut stmts = Vec::new();
            if i > 0 {
                stmts.push(Stmt::store(self.idxs[i - 1].clone(), 0, Expr::int(0)));
            }
            stmts.push(Stmt::store(self.idxs[i].clone(), 0, self.idx(i) + 1));
            stmts.push(off.inc_loop_stmt(i));
            if i + 1 < self.nest.nloops() && !body.is_empty() {
                let bound = self.nest.loops()[i].bound.clone();
                stmts.push(Stmt::if_then(self.idx(i).cmp_ge(bound), body));
            }
            body = Stmt::seq(stmts);
        }
        Stmt::store(self.linear.clone(), 0, self.linear_idx() - 1).append(body)
    }
}
