//! Instruction tree for generated kernels.
//!
//! A kernel body is one `Stmt` tree. Expressions are pure values
//! (constants, variables, register loads, arithmetic); statements carry
//! effects (register stores, abstract memory accesses, intrinsic calls)
//! and structure (sequences, lets, allocations, loops, conditionals).
//!
//! Pipeline:
//! ```text
//! KernelDesc + Plan → kernel builders → Stmt ─→ pass pipeline → Stmt (final)
//! ```
//!
//! Every node kind is a closed enum variant; passes are functions over the
//! tree built on the `Rewriter`/`Visitor` fold helpers in `visit`.

pub mod builder;
mod display;
pub mod eval;
pub mod layout;
pub mod magic;
pub mod pass;
mod stmt;
mod visit;

#[cfg(test)]
mod tests;

use std::ops;

use serde::{Deserialize, Serialize};

pub use layout::{for_each, Block, Coord, Dim, Layout, Tile};
pub use stmt::{Access, AccessOp, AllocKind, Attr, Call, EltwiseAlg, Func, Stmt};
pub use visit::{
    collect_expr_vars, collect_vars, uses_var, visit_expr_children, visit_stmt_children, walk_expr,
    walk_stmt, Rewriter, Visitor,
};

// ─── Types ────────────────────────────────────────────────────────

/// Element type of a value, a register buffer or a memory tensor.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ScalarType {
    Bool,
    S8,
    U8,
    S16,
    U16,
    S32,
    U32,
    S64,
    U64,
    F16,
    Bf16,
    F32,
    /// Buffer handle (register, shared scratch or global memory).
    Ptr,
}

impl ScalarType {
    /// Size in bytes.
    pub fn size(self) -> u32 {
        match self {
            ScalarType::Bool | ScalarType::S8 | ScalarType::U8 => 1,
            ScalarType::S16 | ScalarType::U16 | ScalarType::F16 | ScalarType::Bf16 => 2,
            ScalarType::S32 | ScalarType::U32 | ScalarType::F32 => 4,
            ScalarType::S64 | ScalarType::U64 | ScalarType::Ptr => 8,
        }
    }

    pub fn is_int(self) -> bool {
        matches!(
            self,
            ScalarType::S8
                | ScalarType::U8
                | ScalarType::S16
                | ScalarType::U16
                | ScalarType::S32
                | ScalarType::U32
                | ScalarType::S64
                | ScalarType::U64
        )
    }

    pub fn is_float(self) -> bool {
        matches!(self, ScalarType::F16 | ScalarType::Bf16 | ScalarType::F32)
    }

    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::S8 => "s8",
            ScalarType::U8 => "u8",
            ScalarType::S16 => "s16",
            ScalarType::U16 => "u16",
            ScalarType::S32 => "s32",
            ScalarType::U32 => "u32",
            ScalarType::S64 => "s64",
            ScalarType::U64 => "u64",
            ScalarType::F16 => "f16",
            ScalarType::Bf16 => "bf16",
            ScalarType::F32 => "f32",
            ScalarType::Ptr => "ptr",
        }
    }
}

/// A scalar type with a lane count (`elems == 1` for scalars).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Type {
    pub scalar: ScalarType,
    pub elems: u32,
}

impl Type {
    pub const fn new(scalar: ScalarType) -> Self {
        Self { scalar, elems: 1 }
    }

    pub const fn s32() -> Self {
        Self::new(ScalarType::S32)
    }

    pub const fn u32() -> Self {
        Self::new(ScalarType::U32)
    }

    pub const fn u16() -> Self {
        Self::new(ScalarType::U16)
    }

    pub const fn s64() -> Self {
        Self::new(ScalarType::S64)
    }

    pub const fn u64() -> Self {
        Self::new(ScalarType::U64)
    }

    pub const fn f32() -> Self {
        Self::new(ScalarType::F32)
    }

    pub const fn bool() -> Self {
        Self::new(ScalarType::Bool)
    }

    pub const fn ptr() -> Self {
        Self::new(ScalarType::Ptr)
    }

    pub fn with_elems(self, elems: u32) -> Self {
        Self { elems, ..self }
    }

    /// Size in bytes of all lanes.
    pub fn size(self) -> u32 {
        self.scalar.size() * self.elems
    }

    pub fn is_int(self) -> bool {
        self.scalar.is_int()
    }

    pub fn is_bool(self) -> bool {
        self.scalar == ScalarType::Bool
    }

    pub fn is_ptr(self) -> bool {
        self.scalar == ScalarType::Ptr
    }
}

// ─── Variables ────────────────────────────────────────────────────

/// A named value. Register buffers are variables of pointer type.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    pub fn s32(name: impl Into<String>) -> Self {
        Self::new(name, Type::s32())
    }

    pub fn ptr(name: impl Into<String>) -> Self {
        Self::new(name, Type::ptr())
    }

    pub fn expr(&self) -> Expr {
        Expr::Var(self.clone())
    }
}

// ─── Expressions ──────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    /// Rounding-up division; expanded during variable finalization.
    DivUp,
    Min,
    Max,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_cmp(self) -> bool {
        matches!(
            self,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge | BinOp::Eq | BinOp::Ne
        )
    }

    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::DivUp => "div_up",
            BinOp::Min => "min",
            BinOp::Max => "max",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
        }
    }
}

/// Division and modulo by a runtime divisor using a packed magic number
/// (see `magic::idiv_magic`). Operands: `(x, divisor as u32, magic)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TernOp {
    IDiv,
    IMod,
}

/// A pure expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Expr {
    Int(i64, ScalarType),
    /// IEEE-754 bits, so trees stay hashable.
    Float(u32),
    Bool(bool),
    Var(Var),
    /// Kernel-level runtime constant supplied by the host.
    ConstVar(Var),
    /// Resolved kernel argument.
    Arg { name: String, ty: Type, slot: u32 },
    /// Read `ty` from a register buffer at a constant byte offset.
    Load { ty: Type, buf: Box<Expr>, off: i64 },
    /// Register buffer displaced by a constant byte offset.
    Offset { buf: Box<Expr>, off: i64 },
    Binary { op: BinOp, a: Box<Expr>, b: Box<Expr> },
    Ternary { op: TernOp, a: Box<Expr>, b: Box<Expr>, c: Box<Expr> },
    Iif { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
    Cast { ty: Type, value: Box<Expr> },
    Broadcast { value: Box<Expr>, elems: u32 },
}

impl Expr {
    /// A 32-bit signed integer constant.
    pub fn int(v: i64) -> Self {
        Expr::Int(v, ScalarType::S32)
    }

    pub fn i64(v: i64) -> Self {
        Expr::Int(v, ScalarType::S64)
    }

    pub fn f32(v: f32) -> Self {
        Expr::Float(v.to_bits())
    }

    pub fn const_var(name: impl Into<String>, ty: Type) -> Self {
        Expr::ConstVar(Var::new(name, ty))
    }

    pub fn binary(op: BinOp, a: Expr, b: Expr) -> Self {
        Expr::Binary {
            op,
            a: Box::new(a),
            b: Box::new(b),
        }
    }

    pub fn ternary(op: TernOp, a: Expr, b: Expr, c: Expr) -> Self {
        Expr::Ternary {
            op,
            a: Box::new(a),
            b: Box::new(b),
            c: Box::new(c),
        }
    }

    pub fn iif(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::Iif {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        }
    }

    pub fn cast(self, ty: Type) -> Self {
        if self.ty() == ty {
            return self;
        }
        Expr::Cast {
            ty,
            value: Box::new(self),
        }
    }

    pub fn broadcast(self, elems: u32) -> Self {
        if elems == 1 {
            return self;
        }
        Expr::Broadcast {
            value: Box::new(self),
            elems,
        }
    }

    pub fn load(ty: Type, buf: Expr, off: i64) -> Self {
        Expr::Load {
            ty,
            buf: Box::new(buf),
            off,
        }
    }

    /// `buf + off` for a register buffer; folds nested offsets.
    pub fn offset(self, off: i64) -> Self {
        match self {
            Expr::Offset { buf, off: base } => Expr::Offset {
                buf,
                off: base + off,
            },
            buf if off == 0 => buf,
            buf => Expr::Offset {
                buf: Box::new(buf),
                off,
            },
        }
    }

    pub fn min_of(a: Expr, b: Expr) -> Self {
        Expr::binary(BinOp::Min, a, b)
    }

    pub fn div_up(self, b: Expr) -> Self {
        Expr::binary(BinOp::DivUp, self, b)
    }

    pub fn cmp_lt(self, b: impl Into<Expr>) -> Self {
        Expr::binary(BinOp::Lt, self, b.into())
    }

    pub fn cmp_ge(self, b: impl Into<Expr>) -> Self {
        Expr::binary(BinOp::Ge, self, b.into())
    }

    pub fn cmp_gt(self, b: impl Into<Expr>) -> Self {
        Expr::binary(BinOp::Gt, self, b.into())
    }

    pub fn cmp_eq(self, b: impl Into<Expr>) -> Self {
        Expr::binary(BinOp::Eq, self, b.into())
    }

    pub fn cmp_ne(self, b: impl Into<Expr>) -> Self {
        Expr::binary(BinOp::Ne, self, b.into())
    }

    pub fn or(self, b: Expr) -> Self {
        Expr::binary(BinOp::Or, self, b)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expr::Int(v, _) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Expr::Float(bits) => Some(f32::from_bits(*bits)),
            _ => None,
        }
    }

    pub fn is_const(&self) -> bool {
        matches!(self, Expr::Int(..) | Expr::Float(_) | Expr::Bool(_))
    }

    pub fn is_int_value(&self, v: i64) -> bool {
        self.as_int() == Some(v)
    }

    /// The variable this expression names, if it is a plain variable.
    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Expr::Var(v) | Expr::ConstVar(v) => Some(v),
            _ => None,
        }
    }

    pub fn ty(&self) -> Type {
        match self {
            Expr::Int(_, s) => Type::new(*s),
            Expr::Float(_) => Type::f32(),
            Expr::Bool(_) => Type::bool(),
            Expr::Var(v) | Expr::ConstVar(v) => v.ty,
            Expr::Arg { ty, .. } => *ty,
            Expr::Load { ty, .. } => *ty,
            Expr::Offset { .. } => Type::ptr(),
            Expr::Binary { op, a, b } => {
                let operand = match a.as_ref() {
                    Expr::Int(..) => b.ty(),
                    _ => a.ty(),
                };
                if op.is_cmp() {
                    Type::bool().with_elems(operand.elems)
                } else {
                    operand
                }
            }
            Expr::Ternary { a, .. } => a.ty(),
            Expr::Iif { then, .. } => then.ty(),
            Expr::Cast { ty, .. } => *ty,
            Expr::Broadcast { value, elems } => value.ty().with_elems(*elems),
        }
    }
}

impl From<i64> for Expr {
    fn from(v: i64) -> Self {
        Expr::int(v)
    }
}

impl From<&Var> for Expr {
    fn from(v: &Var) -> Self {
        v.expr()
    }
}

macro_rules! impl_arith {
    ($trait:ident, $method:ident, $op:expr) => {
        impl ops::$trait<Expr> for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary($op, self, rhs)
            }
        }

        impl ops::$trait<i64> for Expr {
            type Output = Expr;
            fn $method(self, rhs: i64) -> Expr {
                let rhs = match self.ty().scalar {
                    s if s.is_int() => Expr::Int(rhs, s),
                    _ => Expr::int(rhs),
                };
                Expr::binary($op, self, rhs)
            }
        }
    };
}

impl_arith!(Add, add, BinOp::Add);
impl_arith!(Sub, sub, BinOp::Sub);
impl_arith!(Mul, mul, BinOp::Mul);
impl_arith!(Div, div, BinOp::Div);
impl_arith!(Rem, rem, BinOp::Mod);
