//! Stream-K: thread groups take contiguous windows of the flattened
//! (tile, reduction iteration) space instead of whole tiles.
//!
//! Reduction iterations of every tile are split into `k_batches` batches
//! (grid axis 1). Within a batch the `tiles * iters_per_tile` iterations
//! are spread over `groups` thread groups (grid axis 0). The last batch
//! may be shorter, so every per-batch quantity exists in a `main` and a
//! `tail` regime, each with the magic value for dividing by it.

use serde::Serialize;

use crate::diagnostic::{CompileError, Phase, Result};
use crate::ir::builder::{builtin, BuildCtx, IrBuilder, MAGIC_SUFFIX};
use crate::ir::magic::{idiv_magic, FastDiv, MAX_NUMERATOR};
use crate::ir::{Expr, Stmt, TernOp, Type};

const TOTAL_ITERS: &str = "sk_total_iters";
const ITERS_PER_TG: &str = "sk_iters_per_tg";
const ITERS_PER_TILE: &str = "sk_iters_per_tile";
const K_BATCHES: &str = "sk_k_batches";

fn regime_name(name: &str, tail: bool) -> String {
    format!("{}_{}", name, if tail { "tail" } else { "main" })
}

fn magic_name(name: &str) -> String {
    format!("{}{}", name, MAGIC_SUFFIX)
}

fn idiv(x: Expr, d: Expr, magic: Expr) -> Expr {
    Expr::ternary(TernOp::IDiv, x, d.cast(Type::u32()), magic)
}

// ─── Kernel side ──────────────────────────────────────────────────

/// The piece of work a thread group handles in one trip of the Stream-K
/// loop: one output tile, reduction iterations `[local_beg, local_end)`.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamKWindow {
    pub tile_idx: Expr,
    pub k_batch_idx: Expr,
    pub k_batches: Expr,
    pub local_beg: Expr,
    pub local_end: Expr,
    /// Thread groups of this batch contributing to the tile.
    pub tg_beg: Expr,
    pub tg_end: Expr,
}

impl StreamKWindow {
    pub fn local_size(&self) -> Expr {
        self.local_end.clone() - self.local_beg.clone()
    }

    /// True when partial sums of the tile come from more than one group.
    pub fn is_shared(&self) -> Expr {
        let groups = self.tg_end.clone() - self.tg_beg.clone();
        self.k_batches
            .clone()
            .cmp_gt(Expr::int(1))
            .or(groups.cmp_gt(Expr::int(1)))
    }
}

/// Emit the Stream-K loop. `tile_body` builds the reduction and epilogue
/// for one window.
pub fn build_stream_k<'h, F>(ctx: &mut BuildCtx<'h>, tile_body: F) -> Result<Stmt>
where
    F: FnOnce(&mut BuildCtx<'h>, &StreamKWindow) -> Result<Stmt>,
{
    let s32 = Type::s32();
    let u64 = Type::u64();
    let mut b = IrBuilder::new();

    let tg_idx = builtin("group_id0");
    let k_batch_idx = builtin("group_id1");
    let k_batches = ctx.vars.add_scalar_arg(K_BATCHES, s32);
    let is_tail = k_batch_idx.clone().cmp_eq(k_batches.clone() - 1);

    let mut regime = |b: &mut IrBuilder, name: &str, ty: Type| {
        let main = ctx.vars.add_scalar_arg(&regime_name(name, false), ty);
        let tail = ctx.vars.add_scalar_arg(&regime_name(name, true), ty);
        b.let_(name, Expr::iif(is_tail.clone(), tail, main))
    };
    let total = regime(&mut b, TOTAL_ITERS, s32);
    let ipt_tg = regime(&mut b, ITERS_PER_TG, s32);
    let ipt_tg_magic = regime(&mut b, &magic_name(ITERS_PER_TG), u64);
    let ipt_tile = regime(&mut b, ITERS_PER_TILE, s32);
    let ipt_tile_magic = regime(&mut b, &magic_name(ITERS_PER_TILE), u64);
    let ipt_tile_main = ctx
        .vars
        .add_scalar_arg(&regime_name(ITERS_PER_TILE, false), s32);

    let iter_buf = ctx.bufs.get("sk_iter", 4);
    let iter = Expr::load(s32, iter_buf.clone(), 0);
    let iter_beg = b.let_("sk_iter_beg", tg_idx * ipt_tg.clone());
    b.store(&iter_buf, 0, iter_beg.clone());
    let iter_end = b.let_(
        "sk_iter_end",
        Expr::min_of(total, iter_beg + ipt_tg.clone()),
    );

    let mut body = IrBuilder::new();
    let tile_idx = body.let_(
        "sk_tile_idx",
        idiv(iter.clone(), ipt_tile.clone(), ipt_tile_magic),
    );
    let global_beg = body.let_("sk_global_beg", tile_idx.clone() * ipt_tile.clone());
    let global_end = body.let_("sk_global_end", global_beg.clone() + ipt_tile);
    let batch_off = k_batch_idx.clone() * ipt_tile_main;
    let local_beg = body.let_(
        "sk_local_beg",
        iter.clone() - global_beg.clone() + batch_off.clone(),
    );
    let local_end = body.let_(
        "sk_local_end",
        Expr::min_of(iter_end.clone(), global_end.clone()) - global_beg.clone() + batch_off,
    );
    let tg_beg = body.let_(
        "sk_tg_beg",
        idiv(global_beg, ipt_tg.clone(), ipt_tg_magic.clone()),
    );
    let tg_end = body.let_(
        "sk_tg_end",
        idiv(global_end.clone() - 1, ipt_tg, ipt_tg_magic) + 1,
    );
    let window = StreamKWindow {
        tile_idx,
        k_batch_idx,
        k_batches,
        local_beg,
        local_end,
        tg_beg,
        tg_end,
    };
    body.emit(tile_body(ctx, &window)?);
    body.store(&iter_buf, 0, global_end);

    b.while_(iter.cmp_lt(iter_end), body.finish());
    Ok(b.finish())
}

// ─── Host side ────────────────────────────────────────────────────

/// Per-batch iteration counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Regime {
    pub iters_per_tile: u32,
    pub total_iters: u32,
    pub iters_per_tg: u32,
}

/// Launch parameters and kernel arguments of a Stream-K kernel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct StreamKSchedule {
    pub tiles: u32,
    pub iters_per_tile: u32,
    pub k_batches: u32,
    /// Thread groups per batch.
    pub groups: u32,
    pub main: Regime,
    pub tail: Regime,
}

/// One trip of the Stream-K loop, as executed by group `group` of batch
/// `k_batch`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WorkItem {
    pub group: u32,
    pub k_batch: u32,
    pub tile: u32,
    pub local_beg: u32,
    pub local_end: u32,
    pub tg_beg: u32,
    pub tg_end: u32,
}

impl StreamKSchedule {
    /// `groups == 0` gives one group per tile. `k_batches` is clamped to
    /// the number of batches that receive at least one iteration.
    pub fn new(tiles: u32, iters_per_tile: u32, k_batches: u32, groups: u32) -> Result<Self> {
        if tiles == 0 || iters_per_tile == 0 {
            return Err(CompileError::invariant(
                Phase::StreamK,
                format!("empty iteration space: {} tiles x {} iterations", tiles, iters_per_tile),
            ));
        }
        let groups = if groups == 0 { tiles } else { groups };
        let main_ipt = iters_per_tile.div_ceil(k_batches.max(1));
        // Batches past the last non-empty one would get no iterations.
        let k_batches = iters_per_tile.div_ceil(main_ipt);
        let tail_ipt = iters_per_tile - (k_batches - 1) * main_ipt;
        let regime = |ipt: u32| -> Result<Regime> {
            let total = u64::from(tiles) * u64::from(ipt);
            if total > u64::from(MAX_NUMERATOR) {
                return Err(CompileError::unsupported(
                    Phase::StreamK,
                    format!("{} iterations exceed the fast division range", total),
                ));
            }
            let total = total as u32;
            Ok(Regime {
                iters_per_tile: ipt,
                total_iters: total,
                iters_per_tg: total.div_ceil(groups),
            })
        };
        Ok(Self {
            tiles,
            iters_per_tile,
            k_batches,
            groups,
            main: regime(main_ipt)?,
            tail: regime(tail_ipt)?,
        })
    }

    pub fn regime(&self, k_batch: u32) -> &Regime {
        if k_batch + 1 == self.k_batches {
            &self.tail
        } else {
            &self.main
        }
    }

    /// Thread-group grid: `(groups, k_batches)`.
    pub fn thread_groups(&self) -> (u32, u32) {
        (self.groups, self.k_batches)
    }

    /// Values of every scalar argument the Stream-K loop reads, magic
    /// values included.
    pub fn kernel_args(&self) -> Vec<(String, i64)> {
        let mut args = vec![(K_BATCHES.to_string(), i64::from(self.k_batches))];
        for (tail, r) in [(false, &self.main), (true, &self.tail)] {
            args.push((regime_name(TOTAL_ITERS, tail), i64::from(r.total_iters)));
            for (name, value) in [(ITERS_PER_TG, r.iters_per_tg), (ITERS_PER_TILE, r.iters_per_tile)] {
                args.push((regime_name(name, tail), i64::from(value)));
                args.push((
                    regime_name(&magic_name(name), tail),
                    idiv_magic(value) as i64,
                ));
            }
        }
        args
    }

    /// Replay the generated loop for every group of every batch.
    pub fn work_items(&self) -> Vec<WorkItem> {
        let mut items = Vec::new();
        for k_batch in 0..self.k_batches {
            let r = self.regime(k_batch);
            let per_tile = FastDiv::new(r.iters_per_tile);
            let per_tg = FastDiv::new(r.iters_per_tg);
            let batch_off = k_batch * self.main.iters_per_tile;
            for group in 0..self.groups {
                let mut iter = group * r.iters_per_tg;
                let iter_end = r.total_iters.min(iter + r.iters_per_tg);
                while iter < iter_end {
                    let tile = per_tile.div(iter);
                    let global_beg = tile * r.iters_per_tile;
                    let global_end = global_beg + r.iters_per_tile;
                    items.push(WorkItem {
                        group,
                        k_batch,
                        tile,
                        local_beg: iter - global_beg + batch_off,
                        local_end: iter_end.min(global_end) - global_beg + batch_off,
                        tg_beg: per_tg.div(global_beg),
                        tg_end: per_tg.div(global_end - 1) + 1,
                    });
                    iter = global_end;
                }
            }
        }
        items
    }
}
