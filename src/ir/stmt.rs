//! Statements, intrinsic functions and memory accesses.

use serde::{Deserialize, Serialize};

use super::{Expr, Layout, ScalarType, Var};

/// Where an allocation lives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AllocKind {
    /// Register file.
    Grf,
    /// Shared scratch memory of the thread group.
    Slm,
    /// Global memory (kernel pointer argument).
    Global,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AccessOp {
    Load,
    Store,
    /// Warm caches only; no destination register.
    Prefetch,
    /// Read-modify-write add into memory.
    AtomicAdd,
}

impl AccessOp {
    pub fn name(self) -> &'static str {
        match self {
            AccessOp::Load => "load",
            AccessOp::Store => "store",
            AccessOp::Prefetch => "prefetch",
            AccessOp::AtomicAdd => "atomic_add",
        }
    }
}

/// Abstract memory access of `bytes` contiguous bytes. Lowered into
/// hardware transfer instructions by `pass::inject_send`.
#[derive(Clone, Debug, PartialEq)]
pub struct Access {
    pub op: AccessOp,
    pub ty: ScalarType,
    pub mem_buf: Expr,
    /// Byte offset into `mem_buf`.
    pub mem_off: Expr,
    /// Register side; absent for prefetches.
    pub reg_buf: Option<Expr>,
    pub reg_off: i64,
    pub bytes: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EltwiseAlg {
    Relu,
    /// `alpha * x + beta`
    Linear,
    Abs,
    Square,
    Sqrt,
    Exp,
    Logistic,
    Tanh,
    /// `min(max(x, alpha), beta)`
    Clip,
    /// `x * logistic(alpha * x)`
    Swish,
}

impl EltwiseAlg {
    /// Reference scalar semantics.
    pub fn apply(self, x: f32, alpha: f32, beta: f32) -> f32 {
        match self {
            EltwiseAlg::Relu => {
                if x > 0.0 {
                    x
                } else {
                    alpha * x
                }
            }
            EltwiseAlg::Linear => alpha * x + beta,
            EltwiseAlg::Abs => x.abs(),
            EltwiseAlg::Square => x * x,
            EltwiseAlg::Sqrt => x.sqrt(),
            EltwiseAlg::Exp => x.exp(),
            EltwiseAlg::Logistic => 1.0 / (1.0 + (-x).exp()),
            EltwiseAlg::Tanh => x.tanh(),
            EltwiseAlg::Clip => x.max(alpha).min(beta),
            EltwiseAlg::Swish => x / (1.0 + (-alpha * x).exp()),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EltwiseAlg::Relu => "relu",
            EltwiseAlg::Linear => "linear",
            EltwiseAlg::Abs => "abs",
            EltwiseAlg::Square => "square",
            EltwiseAlg::Sqrt => "sqrt",
            EltwiseAlg::Exp => "exp",
            EltwiseAlg::Logistic => "logistic",
            EltwiseAlg::Tanh => "tanh",
            EltwiseAlg::Clip => "clip",
            EltwiseAlg::Swish => "swish",
        }
    }
}

/// Intrinsic functions invoked by `Stmt::Call`.
///
/// Argument conventions:
/// - `Mad`, `Dpas`: `[dst, src0, src1, src2]` register pointers
/// - `Eltwise`: `[elems, buf]`
/// - `Reorder`, `Reduce`: `[src, dst]`
/// - `ZeroOut`: `[buf]`
/// - `Send`: `[mem_buf, mem_off]` plus the register pointer unless prefetching
#[derive(Clone, Debug, PartialEq)]
pub enum Func {
    /// Per-lane multiply-add: `dst = src0 + src1 * src2` on `simd` lanes.
    /// A stride of 0 broadcasts the operand.
    Mad {
        simd: u32,
        dst: ScalarType,
        a: ScalarType,
        a_stride: i64,
        b: ScalarType,
        b_stride: i64,
    },
    /// Systolic multiply-add over a fixed `depth x repeat` shape.
    Dpas {
        simd: u32,
        depth: u32,
        repeat: u32,
        dst: ScalarType,
        src1: ScalarType,
        src2: ScalarType,
    },
    Eltwise {
        alg: EltwiseAlg,
        scale: f32,
        alpha: f32,
        beta: f32,
    },
    /// Copy between register layouts, converting element types.
    Reorder { src: Layout, dst: Layout },
    /// Sum `src` into `dst`, reducing over dimensions absent from `dst`.
    Reduce { src: Layout, dst: Layout },
    ZeroOut { bytes: u32 },
    /// Thread-group barrier.
    Barrier,
    /// Hardware memory transfer of at most one message.
    Send {
        op: AccessOp,
        ty: ScalarType,
        bytes: u32,
    },
}

impl Func {
    pub fn name(&self) -> &'static str {
        match self {
            Func::Mad { .. } => "mad",
            Func::Dpas { .. } => "dpas",
            Func::Eltwise { .. } => "eltwise",
            Func::Reorder { .. } => "reorder",
            Func::Reduce { .. } => "reduce",
            Func::ZeroOut { .. } => "zero_out",
            Func::Barrier => "barrier",
            Func::Send { .. } => "send",
        }
    }

    pub fn is_multiply(&self) -> bool {
        matches!(self, Func::Mad { .. } | Func::Dpas { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Attr {
    /// Issue together with the next instruction, without interruption.
    Atomic,
    /// Source operands may hit the same register bank.
    BankConflict,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Call {
    pub func: Func,
    pub args: Vec<Expr>,
    pub attrs: Vec<Attr>,
}

impl Call {
    pub fn new(func: Func, args: Vec<Expr>) -> Self {
        Self {
            func,
            args,
            attrs: Vec::new(),
        }
    }

    pub fn has_attr(&self, attr: Attr) -> bool {
        self.attrs.contains(&attr)
    }

    pub fn add_attr(&mut self, attr: Attr) {
        if !self.has_attr(attr) {
            self.attrs.push(attr);
        }
    }
}

/// A statement of the instruction tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    Seq(Vec<Stmt>),
    /// `body == None` is a dangling let: it scopes over the rest of the
    /// enclosing sequence until `pass::inject_dangling_lets` runs.
    Let {
        var: Var,
        value: Expr,
        body: Option<Box<Stmt>>,
    },
    Alloc {
        buf: Var,
        size: u32,
        kind: AllocKind,
        body: Box<Stmt>,
    },
    /// Register store of `value` at a constant byte offset.
    Store { buf: Expr, off: i64, value: Expr },
    Access(Access),
    Call(Call),
    If {
        cond: Expr,
        then: Box<Stmt>,
        otherwise: Option<Box<Stmt>>,
    },
    /// `for (var = init; var < bound; var++)`
    For {
        var: Var,
        init: Expr,
        bound: Expr,
        body: Box<Stmt>,
    },
    While { cond: Expr, body: Box<Stmt> },
}

impl Stmt {
    pub fn empty() -> Self {
        Stmt::Seq(Vec::new())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Stmt::Seq(v) => v.iter().all(Stmt::is_empty),
            _ => false,
        }
    }

    /// Sequence `self` then `other`, flattening nested sequences.
    pub fn append(self, other: Stmt) -> Stmt {
        let mut items = self.into_items();
        items.extend(other.into_items());
        Stmt::Seq(items)
    }

    pub fn into_items(self) -> Vec<Stmt> {
        match self {
            Stmt::Seq(v) => v,
            s => vec![s],
        }
    }

    pub fn seq(items: Vec<Stmt>) -> Stmt {
        let mut out = Vec::with_capacity(items.len());
        for s in items {
            out.extend(s.into_items());
        }
        Stmt::Seq(out)
    }

    pub fn store(buf: Expr, off: i64, value: Expr) -> Stmt {
        Stmt::Store { buf, off, value }
    }

    pub fn call(func: Func, args: Vec<Expr>) -> Stmt {
        Stmt::Call(Call::new(func, args))
    }

    pub fn if_then(cond: Expr, then: Stmt) -> Stmt {
        Stmt::If {
            cond,
            then: Box::new(then),
            otherwise: None,
        }
    }

    pub fn let_in(var: Var, value: Expr, body: Stmt) -> Stmt {
        Stmt::Let {
            var,
            value,
            body: Some(Box::new(body)),
        }
    }

    pub fn alloc(buf: Var, size: u32, kind: AllocKind, body: Stmt) -> Stmt {
        Stmt::Alloc {
            buf,
            size,
            kind,
            body: Box::new(body),
        }
    }

    /// Number of statements in the tree, counting nested bodies.
    pub fn count(&self) -> usize {
        match self {
            Stmt::Seq(v) => v.iter().map(Stmt::count).sum(),
            Stmt::Let { body, .. } => 1 + body.as_ref().map_or(0, |b| b.count()),
            Stmt::Alloc { body, .. } | Stmt::For { body, .. } | Stmt::While { body, .. } => {
                1 + body.count()
            }
            Stmt::If {
                then, otherwise, ..
            } => 1 + then.count() + otherwise.as_ref().map_or(0, |o| o.count()),
            _ => 1,
        }
    }

    /// All calls in execution order of the tree text.
    pub fn calls(&self) -> Vec<&Call> {
        let mut out = Vec::new();
        self.collect_calls(&mut out);
        out
    }

    fn collect_calls<'a>(&'a self, out: &mut Vec<&'a Call>) {
        match self {
            Stmt::Seq(v) => v.iter().for_each(|s| s.collect_calls(out)),
            Stmt::Let { body, .. } => {
                if let Some(b) = body {
                    b.collect_calls(out);
                }
            }
            Stmt::Alloc { body, .. } | Stmt::For { body, .. } | Stmt::While { body, .. } => {
                body.collect_calls(out)
            }
            Stmt::If {
                then, otherwise, ..
            } => {
                then.collect_calls(out);
                if let Some(o) = otherwise {
                    o.collect_calls(out);
                }
            }
            Stmt::Call(c) => out.push(c),
            Stmt::Store { .. } | Stmt::Access(_) => {}
        }
    }
}
