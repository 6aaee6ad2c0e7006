//! Reference interpreter for instruction trees.
//!
//! Executes one thread of one thread group. Memory, shared scratch and
//! register buffers are byte arrays; barriers are no-ops. Used to check
//! generated kernels against scalar oracles.

use std::collections::HashMap;

use thiserror::Error;

use super::magic;
use super::{
    for_each, AccessOp, AllocKind, BinOp, Coord, Expr, Func, Layout, ScalarType, Stmt, TernOp,
    Tile,
};

#[derive(Debug, Error, PartialEq)]
pub enum EvalError {
    #[error("unbound variable `{0}`")]
    Unbound(String),
    #[error("access out of bounds: {buf}[{off}..+{len}]")]
    OutOfBounds { buf: String, off: i64, len: usize },
    #[error("unsupported in evaluator: {0}")]
    Unsupported(String),
    #[error("integer division by zero")]
    DivByZero,
    #[error("lane count mismatch: {0} vs {1}")]
    LaneMismatch(usize, usize),
    #[error("expected a buffer, got `{0}`")]
    NotPointer(String),
    #[error("magic value does not divide {x} by {divisor}")]
    InvalidMagic { x: i64, divisor: i64 },
    #[error("step limit exceeded")]
    StepLimit,
}

type Result<T> = std::result::Result<T, EvalError>;

// ─── Values ───────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Scalar {
    Int(i64),
    Float(f32),
    Bool(bool),
}

impl Scalar {
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Int(v) => v,
            Scalar::Float(f) => f as i64,
            Scalar::Bool(b) => b as i64,
        }
    }

    pub fn as_f32(self) -> f32 {
        match self {
            Scalar::Int(v) => v as f32,
            Scalar::Float(f) => f,
            Scalar::Bool(b) => b as i64 as f32,
        }
    }

    pub fn as_bool(self) -> bool {
        match self {
            Scalar::Int(v) => v != 0,
            Scalar::Float(f) => f != 0.0,
            Scalar::Bool(b) => b,
        }
    }

    fn convert(self, ty: ScalarType) -> Scalar {
        match ty {
            ScalarType::Bool => Scalar::Bool(self.as_bool()),
            t if t.is_float() => Scalar::Float(self.as_f32()),
            ScalarType::S8 => Scalar::Int(self.as_i64() as i8 as i64),
            ScalarType::U8 => Scalar::Int(self.as_i64() as u8 as i64),
            ScalarType::S16 => Scalar::Int(self.as_i64() as i16 as i64),
            ScalarType::U16 => Scalar::Int(self.as_i64() as u16 as i64),
            ScalarType::S32 => Scalar::Int(self.as_i64() as i32 as i64),
            ScalarType::U32 => Scalar::Int(self.as_i64() as u32 as i64),
            _ => Scalar::Int(self.as_i64()),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Space {
    Reg,
    Slm,
    Global,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ptr {
    pub space: Space,
    pub name: String,
    pub off: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Lanes(Vec<Scalar>),
    Ptr(Ptr),
}

impl Value {
    fn scalar(s: Scalar) -> Self {
        Value::Lanes(vec![s])
    }

    fn lanes(self) -> Result<Vec<Scalar>> {
        match self {
            Value::Lanes(l) => Ok(l),
            Value::Ptr(p) => Err(EvalError::Unsupported(format!("pointer `{}` as value", p.name))),
        }
    }

    fn first(self) -> Result<Scalar> {
        self.lanes()?
            .into_iter()
            .next()
            .ok_or(EvalError::LaneMismatch(0, 1))
    }
}

/// Counters of side effects observed while running.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EvalStats {
    pub calls: usize,
    pub barriers: usize,
    pub prefetches: usize,
    pub atomics: usize,
    pub sends: usize,
}

// ─── Evaluator ────────────────────────────────────────────────────

pub struct Evaluator {
    scalars: HashMap<String, Value>,
    regs: HashMap<String, Vec<u8>>,
    mem: HashMap<String, Vec<u8>>,
    slm: HashMap<String, Vec<u8>>,
    steps: u64,
    max_steps: u64,
    stats: EvalStats,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self {
            scalars: HashMap::new(),
            regs: HashMap::new(),
            mem: HashMap::new(),
            slm: HashMap::new(),
            steps: 0,
            max_steps: 10_000_000,
            stats: EvalStats::default(),
        }
    }

    pub fn with_step_limit(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }

    pub fn bind_int(&mut self, name: &str, v: i64) {
        self.scalars
            .insert(name.to_string(), Value::scalar(Scalar::Int(v)));
    }

    pub fn bind_f32(&mut self, name: &str, v: f32) {
        self.scalars
            .insert(name.to_string(), Value::scalar(Scalar::Float(v)));
    }

    pub fn bind_memory(&mut self, name: &str, bytes: Vec<u8>) {
        self.mem.insert(name.to_string(), bytes);
    }

    pub fn bind_f32s(&mut self, name: &str, data: &[f32]) {
        self.bind_memory(name, data.iter().flat_map(|v| v.to_le_bytes()).collect());
    }

    pub fn read_f32s(&self, name: &str) -> Option<Vec<f32>> {
        self.mem.get(name).map(|b| bytes_to_f32s(b))
    }

    pub fn register(&self, name: &str) -> Option<&[u8]> {
        self.regs.get(name).map(Vec::as_slice)
    }

    pub fn register_f32s(&self, name: &str) -> Option<Vec<f32>> {
        self.regs.get(name).map(|b| bytes_to_f32s(b))
    }

    pub fn write_register_f32s(&mut self, name: &str, data: &[f32]) {
        self.regs.insert(
            name.to_string(),
            data.iter().flat_map(|v| v.to_le_bytes()).collect(),
        );
    }

    /// Drop register and shared scratch contents, keeping memory and
    /// bindings. Models a fresh thread on the same memory.
    pub fn reset_thread(&mut self) {
        self.regs.clear();
        self.slm.clear();
    }

    pub fn stats(&self) -> &EvalStats {
        &self.stats
    }

    pub fn run(&mut self, s: &Stmt) -> Result<()> {
        self.steps += 1;
        if self.steps > self.max_steps {
            return Err(EvalError::StepLimit);
        }
        match s {
            Stmt::Seq(items) => {
                for item in items {
                    self.run(item)?;
                }
                Ok(())
            }
            Stmt::Let { var, value, body } => {
                let v = self.eval(value)?;
                match body {
                    Some(b) => {
                        let old = self.scalars.insert(var.name.clone(), v);
                        let ret = self.run(b);
                        self.restore(&var.name, old);
                        ret
                    }
                    None => {
                        self.scalars.insert(var.name.clone(), v);
                        Ok(())
                    }
                }
            }
            Stmt::Alloc {
                buf,
                size,
                kind,
                body,
            } => {
                match kind {
                    AllocKind::Grf => {
                        let r = self.regs.entry(buf.name.clone()).or_default();
                        if r.len() < *size as usize {
                            r.resize(*size as usize, 0);
                        }
                    }
                    AllocKind::Slm => {
                        self.slm.insert(buf.name.clone(), vec![0; *size as usize]);
                    }
                    AllocKind::Global => {}
                }
                self.run(body)
            }
            Stmt::Store { buf, off, value } => {
                let ptr = self.eval_ptr(buf)?;
                let ty = value.ty().scalar;
                let lanes = self.eval(value)?.lanes()?;
                for (i, lane) in lanes.into_iter().enumerate() {
                    self.write_elem(&ptr, off + (i as i64) * ty.size() as i64, ty, lane)?;
                }
                Ok(())
            }
            Stmt::Access(a) => {
                let mem = self.eval_ptr(&a.mem_buf)?;
                let off = self.eval(&a.mem_off)?.first()?.as_i64();
                let reg = match &a.reg_buf {
                    Some(r) => Some(self.eval_ptr(r)?.shifted(a.reg_off)),
                    None => None,
                };
                self.transfer(a.op, a.ty, mem.shifted(off), reg, a.bytes)
            }
            Stmt::Call(c) => {
                self.stats.calls += 1;
                self.call(&c.func, &c.args)
            }
            Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                if self.eval(cond)?.first()?.as_bool() {
                    self.run(then)
                } else if let Some(o) = otherwise {
                    self.run(o)
                } else {
                    Ok(())
                }
            }
            Stmt::For {
                var,
                init,
                bound,
                body,
            } => {
                let init = self.eval(init)?.first()?.as_i64();
                let bound = self.eval(bound)?.first()?.as_i64();
                let old = self.scalars.remove(&var.name);
                let mut ret = Ok(());
                for i in init..bound {
                    self.scalars
                        .insert(var.name.clone(), Value::scalar(Scalar::Int(i)));
                    ret = self.run(body);
                    if ret.is_err() {
                        break;
                    }
                }
                self.restore(&var.name, old);
                ret
            }
            Stmt::While { cond, body } => {
                while self.eval(cond)?.first()?.as_bool() {
                    self.run(body)?;
                    self.steps += 1;
                    if self.steps > self.max_steps {
                        return Err(EvalError::StepLimit);
                    }
                }
                Ok(())
            }
        }
    }

    fn restore(&mut self, name: &str, old: Option<Value>) {
        match old {
            Some(v) => {
                self.scalars.insert(name.to_string(), v);
            }
            None => {
                self.scalars.remove(name);
            }
        }
    }

    // ─── Expressions ──────────────────────────────────────────────

    pub fn eval(&mut self, e: &Expr) -> Result<Value> {
        match e {
            Expr::Int(v, _) => Ok(Value::scalar(Scalar::Int(*v))),
            Expr::Float(bits) => Ok(Value::scalar(Scalar::Float(f32::from_bits(*bits)))),
            Expr::Bool(b) => Ok(Value::scalar(Scalar::Bool(*b))),
            Expr::Var(v) | Expr::ConstVar(v) => self.lookup(&v.name, v.ty.is_ptr()),
            Expr::Arg { name, ty, .. } => self.lookup(name, ty.is_ptr()),
            Expr::Offset { buf, off } => Ok(Value::Ptr(self.eval_ptr(buf)?.shifted(*off))),
            Expr::Load { ty, buf, off } => {
                let ptr = self.eval_ptr(buf)?;
                let size = ty.scalar.size() as i64;
                let mut lanes = Vec::with_capacity(ty.elems as usize);
                for i in 0..ty.elems as i64 {
                    lanes.push(self.read_elem(&ptr, off + i * size, ty.scalar)?);
                }
                Ok(Value::Lanes(lanes))
            }
            Expr::Binary { op, a, b } => {
                let a = self.eval(a)?.lanes()?;
                let b = self.eval(b)?.lanes()?;
                let lanes = zip_lanes(&a, &b)?
                    .map(|(x, y)| binary(*op, x, y))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Value::Lanes(lanes))
            }
            Expr::Ternary { op, a, b, c } => {
                let x = self.eval(a)?.first()?.as_i64();
                let d = self.eval(b)?.first()?.as_i64();
                let m = self.eval(c)?.first()?.as_i64() as u64;
                if d <= 0 {
                    return Err(EvalError::DivByZero);
                }
                if x < 0 || x > magic::MAX_NUMERATOR as i64 {
                    return Err(EvalError::InvalidMagic { x, divisor: d });
                }
                let q = magic::div_by_magic(x as u32, m) as i64;
                if q != x / d {
                    return Err(EvalError::InvalidMagic { x, divisor: d });
                }
                let v = match op {
                    TernOp::IDiv => q,
                    TernOp::IMod => x - q * d,
                };
                Ok(Value::scalar(Scalar::Int(v)))
            }
            Expr::Iif {
                cond,
                then,
                otherwise,
            } => {
                let c = self.eval(cond)?.lanes()?;
                let t = self.eval(then)?.lanes()?;
                let o = self.eval(otherwise)?.lanes()?;
                let to = zip_lanes(&t, &o)?.collect::<Vec<_>>();
                if c.len() == 1 {
                    let pick = c[0].as_bool();
                    return Ok(Value::Lanes(
                        to.into_iter().map(|(x, y)| if pick { x } else { y }).collect(),
                    ));
                }
                if c.len() != to.len() {
                    return Err(EvalError::LaneMismatch(c.len(), to.len()));
                }
                Ok(Value::Lanes(
                    c.iter()
                        .zip(to)
                        .map(|(c, (x, y))| if c.as_bool() { x } else { y })
                        .collect(),
                ))
            }
            Expr::Cast { ty, value } => {
                let mut lanes: Vec<Scalar> = self
                    .eval(value)?
                    .lanes()?
                    .into_iter()
                    .map(|s| s.convert(ty.scalar))
                    .collect();
                if lanes.len() == 1 && ty.elems > 1 {
                    lanes = vec![lanes[0]; ty.elems as usize];
                }
                Ok(Value::Lanes(lanes))
            }
            Expr::Broadcast { value, elems } => {
                let s = self.eval(value)?.first()?;
                Ok(Value::Lanes(vec![s; *elems as usize]))
            }
        }
    }

    fn lookup(&mut self, name: &str, is_ptr: bool) -> Result<Value> {
        if let Some(v) = self.scalars.get(name) {
            return Ok(v.clone());
        }
        if !is_ptr {
            return Err(EvalError::Unbound(name.to_string()));
        }
        let space = if self.mem.contains_key(name) {
            Space::Global
        } else if self.slm.contains_key(name) {
            Space::Slm
        } else {
            Space::Reg
        };
        Ok(Value::Ptr(Ptr {
            space,
            name: name.to_string(),
            off: 0,
        }))
    }

    fn eval_ptr(&mut self, e: &Expr) -> Result<Ptr> {
        match self.eval(e)? {
            Value::Ptr(p) => Ok(p),
            Value::Lanes(_) => Err(EvalError::NotPointer(e.to_string())),
        }
    }

    // ─── Buffers ──────────────────────────────────────────────────

    fn buffer(&mut self, ptr: &Ptr, off: i64, len: usize) -> Result<&mut [u8]> {
        let oob = || EvalError::OutOfBounds {
            buf: ptr.name.clone(),
            off,
            len,
        };
        if off < 0 {
            return Err(oob());
        }
        let end = off as usize + len;
        let buf = match ptr.space {
            Space::Reg => {
                let r = self.regs.entry(ptr.name.clone()).or_default();
                if r.len() < end {
                    r.resize(end, 0);
                }
                r
            }
            Space::Slm => self.slm.get_mut(&ptr.name).ok_or_else(oob)?,
            Space::Global => self.mem.get_mut(&ptr.name).ok_or_else(oob)?,
        };
        if buf.len() < end {
            return Err(oob());
        }
        Ok(&mut buf[off as usize..end])
    }

    fn read_elem(&mut self, ptr: &Ptr, off: i64, ty: ScalarType) -> Result<Scalar> {
        let bytes = self.buffer(ptr, ptr.off + off, ty.size() as usize)?;
        decode(bytes, ty)
    }

    fn write_elem(&mut self, ptr: &Ptr, off: i64, ty: ScalarType, v: Scalar) -> Result<()> {
        let enc = encode(v, ty)?;
        let bytes = self.buffer(ptr, ptr.off + off, enc.len())?;
        bytes.copy_from_slice(&enc);
        Ok(())
    }

    fn transfer(
        &mut self,
        op: AccessOp,
        ty: ScalarType,
        mem: Ptr,
        reg: Option<Ptr>,
        bytes: u32,
    ) -> Result<()> {
        let n = bytes as usize;
        let need_reg = || EvalError::Unsupported(format!("{} without register", op.name()));
        match op {
            AccessOp::Load => {
                let data = self.buffer(&mem, mem.off, n)?.to_vec();
                let reg = reg.ok_or_else(need_reg)?;
                self.buffer(&reg, reg.off, n)?.copy_from_slice(&data);
            }
            AccessOp::Store => {
                let reg = reg.ok_or_else(need_reg)?;
                let data = self.buffer(&reg, reg.off, n)?.to_vec();
                self.buffer(&mem, mem.off, n)?.copy_from_slice(&data);
            }
            AccessOp::Prefetch => {
                self.buffer(&mem, mem.off, n)?;
                self.stats.prefetches += 1;
            }
            AccessOp::AtomicAdd => {
                let reg = reg.ok_or_else(need_reg)?;
                let size = ty.size() as i64;
                for i in 0..(bytes as i64 / size) {
                    let m = self.read_elem(&mem, i * size, ty)?;
                    let r = self.read_elem(&reg, i * size, ty)?;
                    self.write_elem(&mem, i * size, ty, binary(BinOp::Add, m, r)?)?;
                }
                self.stats.atomics += 1;
            }
        }
        Ok(())
    }

    // ─── Intrinsics ───────────────────────────────────────────────

    fn call(&mut self, func: &Func, args: &[Expr]) -> Result<()> {
        let arg = |i: usize| {
            args.get(i)
                .ok_or_else(|| EvalError::Unsupported(format!("{}: missing argument {}", func, i)))
        };
        match func {
            Func::Mad {
                simd,
                dst,
                a,
                a_stride,
                b,
                b_stride,
            } => {
                let d = self.eval_ptr(arg(0)?)?;
                let s0 = self.eval_ptr(arg(1)?)?;
                let s1 = self.eval_ptr(arg(2)?)?;
                let s2 = self.eval_ptr(arg(3)?)?;
                for l in 0..*simd as i64 {
                    let acc = self.read_elem(&s0, l * dst.size() as i64, *dst)?;
                    let x = self.read_elem(&s1, l * a_stride * a.size() as i64, *a)?;
                    let y = self.read_elem(&s2, l * b_stride * b.size() as i64, *b)?;
                    let r = if dst.is_float() {
                        Scalar::Float(acc.as_f32() + x.as_f32() * y.as_f32())
                    } else {
                        Scalar::Int(acc.as_i64() + x.as_i64() * y.as_i64())
                    };
                    self.write_elem(&d, l * dst.size() as i64, *dst, r)?;
                }
                Ok(())
            }
            Func::Dpas { .. } => Err(EvalError::Unsupported("dpas".into())),
            Func::Eltwise {
                alg,
                scale,
                alpha,
                beta,
            } => {
                let elems = self.eval(arg(0)?)?.first()?.as_i64();
                let buf = self.eval_ptr(arg(1)?)?;
                for i in 0..elems {
                    let x = self.read_elem(&buf, i * 4, ScalarType::F32)?.as_f32();
                    let y = scale * alg.apply(x, *alpha, *beta);
                    self.write_elem(&buf, i * 4, ScalarType::F32, Scalar::Float(y))?;
                }
                Ok(())
            }
            Func::Reorder { src, dst } => {
                let s = self.eval_ptr(arg(0)?)?;
                let d = self.eval_ptr(arg(1)?)?;
                self.each_coord(src, |ev, c| {
                    let v = ev.read_elem(&s, src.offset_in_bytes(c), src.ty)?;
                    ev.write_elem(&d, dst.offset_in_bytes(c), dst.ty, v.convert(dst.ty))
                })
            }
            Func::Reduce { src, dst } => {
                let s = self.eval_ptr(arg(0)?)?;
                let d = self.eval_ptr(arg(1)?)?;
                self.each_coord(src, |ev, c| {
                    let v = ev.read_elem(&s, src.offset_in_bytes(c), src.ty)?;
                    let off = dst.offset_in_bytes(c);
                    let acc = ev.read_elem(&d, off, dst.ty)?;
                    let sum = binary(BinOp::Add, acc, v.convert(dst.ty))?;
                    ev.write_elem(&d, off, dst.ty, sum.convert(dst.ty))
                })
            }
            Func::ZeroOut { bytes } => {
                let buf = self.eval_ptr(arg(0)?)?;
                self.buffer(&buf, buf.off, *bytes as usize)?.fill(0);
                Ok(())
            }
            Func::Barrier => {
                self.stats.barriers += 1;
                Ok(())
            }
            Func::Send { op, ty, bytes } => {
                self.stats.sends += 1;
                let mem = self.eval_ptr(arg(0)?)?;
                let off = self.eval(arg(1)?)?.first()?.as_i64();
                let reg = match args.get(2) {
                    Some(r) => Some(self.eval_ptr(r)?),
                    None => None,
                };
                self.transfer(*op, *ty, mem.shifted(off), reg, *bytes)
            }
        }
    }

    fn each_coord(
        &mut self,
        layout: &Layout,
        mut f: impl FnMut(&mut Self, &Coord) -> Result<()>,
    ) -> Result<()> {
        let mut ret = Ok(());
        for_each(&layout.dim_sizes(), &Tile::new(), &[], |c| {
            if ret.is_ok() {
                ret = f(self, c);
            }
        });
        ret
    }
}

impl Ptr {
    fn shifted(mut self, off: i64) -> Self {
        self.off += off;
        self
    }
}

// ─── Scalar helpers ───────────────────────────────────────────────

fn bytes_to_f32s(b: &[u8]) -> Vec<f32> {
    b.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn zip_lanes<'a>(
    a: &'a [Scalar],
    b: &'a [Scalar],
) -> Result<impl Iterator<Item = (Scalar, Scalar)> + 'a> {
    let n = a.len().max(b.len());
    if a.is_empty() || b.is_empty() || (a.len() != b.len() && a.len() != 1 && b.len() != 1) {
        return Err(EvalError::LaneMismatch(a.len(), b.len()));
    }
    Ok((0..n).map(move |i| (a[i.min(a.len() - 1)], b[i.min(b.len() - 1)])))
}

fn binary(op: BinOp, a: Scalar, b: Scalar) -> Result<Scalar> {
    use Scalar::{Bool, Float, Int};
    if matches!(op, BinOp::And | BinOp::Or) {
        let (x, y) = (a.as_bool(), b.as_bool());
        return Ok(Bool(if op == BinOp::And { x && y } else { x || y }));
    }
    if matches!(a, Float(_)) || matches!(b, Float(_)) {
        let (x, y) = (a.as_f32(), b.as_f32());
        return Ok(match op {
            BinOp::Add => Float(x + y),
            BinOp::Sub => Float(x - y),
            BinOp::Mul => Float(x * y),
            BinOp::Div => Float(x / y),
            BinOp::Min => Float(x.min(y)),
            BinOp::Max => Float(x.max(y)),
            BinOp::Lt => Bool(x < y),
            BinOp::Le => Bool(x <= y),
            BinOp::Gt => Bool(x > y),
            BinOp::Ge => Bool(x >= y),
            BinOp::Eq => Bool(x == y),
            BinOp::Ne => Bool(x != y),
            _ => return Err(EvalError::Unsupported(format!("float {}", op.symbol()))),
        });
    }
    let (x, y) = (a.as_i64(), b.as_i64());
    let nonzero = |y: i64| if y == 0 { Err(EvalError::DivByZero) } else { Ok(y) };
    Ok(match op {
        BinOp::Add => Int(x.wrapping_add(y)),
        BinOp::Sub => Int(x.wrapping_sub(y)),
        BinOp::Mul => Int(x.wrapping_mul(y)),
        BinOp::Div => Int(x / nonzero(y)?),
        BinOp::Mod => Int(x % nonzero(y)?),
        BinOp::DivUp => Int((x + y - 1) / nonzero(y)?),
        BinOp::Min => Int(x.min(y)),
        BinOp::Max => Int(x.max(y)),
        BinOp::Lt => Bool(x < y),
        BinOp::Le => Bool(x <= y),
        BinOp::Gt => Bool(x > y),
        BinOp::Ge => Bool(x >= y),
        BinOp::Eq => Bool(x == y),
        BinOp::Ne => Bool(x != y),
        BinOp::Shl => Int(x << (y & 63)),
        BinOp::Shr => Int(x >> (y & 63)),
        BinOp::And => Bool(x != 0 && y != 0),
        BinOp::Or => Bool(x != 0 || y != 0),
    })
}

fn decode(b: &[u8], ty: ScalarType) -> Result<Scalar> {
    let arr = |n: usize| -> [u8; 8] {
        let mut a = [0u8; 8];
        a[..n].copy_from_slice(&b[..n]);
        a
    };
    Ok(match ty {
        ScalarType::Bool => Scalar::Bool(b[0] != 0),
        ScalarType::S8 => Scalar::Int(b[0] as i8 as i64),
        ScalarType::U8 => Scalar::Int(b[0] as i64),
        ScalarType::S16 => Scalar::Int(i16::from_le_bytes([b[0], b[1]]) as i64),
        ScalarType::U16 => Scalar::Int(u16::from_le_bytes([b[0], b[1]]) as i64),
        ScalarType::S32 => Scalar::Int(i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
        ScalarType::U32 => Scalar::Int(u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64),
        ScalarType::S64 | ScalarType::U64 | ScalarType::Ptr => {
            Scalar::Int(i64::from_le_bytes(arr(8)))
        }
        ScalarType::F32 => Scalar::Float(f32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        ScalarType::Bf16 => {
            let bits = u16::from_le_bytes([b[0], b[1]]) as u32;
            Scalar::Float(f32::from_bits(bits << 16))
        }
        ScalarType::F16 => return Err(EvalError::Unsupported("f16 element".into())),
    })
}

fn encode(v: Scalar, ty: ScalarType) -> Result<Vec<u8>> {
    let v = v.convert(ty);
    Ok(match ty {
        ScalarType::Bool => vec![v.as_bool() as u8],
        ScalarType::S8 | ScalarType::U8 => vec![v.as_i64() as u8],
        ScalarType::S16 | ScalarType::U16 => (v.as_i64() as u16).to_le_bytes().to_vec(),
        ScalarType::S32 | ScalarType::U32 => (v.as_i64() as u32).to_le_bytes().to_vec(),
        ScalarType::S64 | ScalarType::U64 | ScalarType::Ptr => v.as_i64().to_le_bytes().to_vec(),
        ScalarType::F32 => v.as_f32().to_le_bytes().to_vec(),
        ScalarType::Bf16 => ((v.as_f32().to_bits() >> 16) as u16).to_le_bytes().to_vec(),
        ScalarType::F16 => return Err(EvalError::Unsupported("f16 element".into())),
    })
}
