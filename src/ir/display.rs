use std::fmt;

use super::{AllocKind, Attr, BinOp, Expr, Func, Stmt, TernOp, Type, Var};

// ─── Display ──────────────────────────────────────────────────────

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.elems == 1 {
            write!(f, "{}", self.scalar.name())
        } else {
            write!(f, "{}x{}", self.scalar.name(), self.elems)
        }
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Int(v, _) => write!(f, "{}", v),
            Expr::Float(bits) => write!(f, "{:?}f", f32::from_bits(*bits)),
            Expr::Bool(b) => write!(f, "{}", b),
            Expr::Var(v) => write!(f, "{}", v),
            Expr::ConstVar(v) => write!(f, "${}", v),
            Expr::Arg { name, slot, .. } => write!(f, "arg{}:{}", slot, name),
            Expr::Load { ty, buf, off } => write!(f, "{}.{}[{}]", buf, ty, off),
            Expr::Offset { buf, off } => write!(f, "{}+{}", buf, off),
            Expr::Binary { op, a, b } => match op {
                BinOp::Min | BinOp::Max | BinOp::DivUp => {
                    write!(f, "{}({}, {})", op.symbol(), a, b)
                }
                _ => write!(f, "({} {} {})", a, op.symbol(), b),
            },
            Expr::Ternary { op, a, b, c } => {
                let name = match op {
                    TernOp::IDiv => "idiv",
                    TernOp::IMod => "imod",
                };
                write!(f, "{}({}, {}, {})", name, a, b, c)
            }
            Expr::Iif {
                cond,
                then,
                otherwise,
            } => write!(f, "({} ? {} : {})", cond, then, otherwise),
            Expr::Cast { ty, value } => write!(f, "{}({})", ty, value),
            Expr::Broadcast { value, elems } => write!(f, "bcast{}({})", elems, value),
        }
    }
}

impl fmt::Display for Attr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attr::Atomic => f.write_str("atomic"),
            Attr::BankConflict => f.write_str("bank_conflict"),
        }
    }
}

impl fmt::Display for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Func::Mad {
                simd,
                a_stride,
                b_stride,
                ..
            } => write!(f, "mad.{}<{},{}>", simd, a_stride, b_stride),
            Func::Dpas {
                simd,
                depth,
                repeat,
                ..
            } => write!(f, "dpas.{}x{}.{}", depth, repeat, simd),
            Func::Eltwise {
                alg,
                scale,
                alpha,
                beta,
            } => write!(f, "eltwise.{}<{}, {}, {}>", alg.name(), scale, alpha, beta),
            Func::Reorder { src, dst } => write!(f, "reorder<{} -> {}>", src, dst),
            Func::Reduce { src, dst } => write!(f, "reduce<{} -> {}>", src, dst),
            Func::ZeroOut { bytes } => write!(f, "zero_out.{}", bytes),
            Func::Barrier => f.write_str("barrier"),
            Func::Send { op, ty, bytes } => write!(f, "send.{}.{}.{}", op.name(), ty.name(), bytes),
        }
    }
}

fn alloc_kind(kind: AllocKind) -> &'static str {
    match kind {
        AllocKind::Grf => "grf",
        AllocKind::Slm => "slm",
        AllocKind::Global => "global",
    }
}

fn write_stmt(s: &Stmt, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    let pad = "  ".repeat(depth);
    match s {
        Stmt::Seq(items) => {
            for item in items {
                write_stmt(item, f, depth)?;
            }
            Ok(())
        }
        Stmt::Let { var, value, body } => {
            writeln!(f, "{}let {}: {} = {}", pad, var, var.ty, value)?;
            match body {
                Some(b) => write_stmt(b, f, depth + 1),
                None => Ok(()),
            }
        }
        Stmt::Alloc {
            buf,
            size,
            kind,
            body,
        } => {
            writeln!(f, "{}alloc {}[{}] {}", pad, buf, size, alloc_kind(*kind))?;
            write_stmt(body, f, depth + 1)
        }
        Stmt::Store { buf, off, value } => {
            writeln!(f, "{}{}.{}[{}] = {}", pad, buf, value.ty(), off, value)
        }
        Stmt::Access(a) => {
            write!(
                f,
                "{}{}.{}.{} {}[{}]",
                pad,
                a.op.name(),
                a.ty.name(),
                a.bytes,
                a.mem_buf,
                a.mem_off
            )?;
            if let Some(reg) = &a.reg_buf {
                write!(f, ", {}+{}", reg, a.reg_off)?;
            }
            writeln!(f)
        }
        Stmt::Call(c) => {
            write!(f, "{}{}(", pad, c.func)?;
            for (i, a) in c.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", a)?;
            }
            write!(f, ")")?;
            for a in &c.attrs {
                write!(f, " {{{}}}", a)?;
            }
            writeln!(f)
        }
        Stmt::If {
            cond,
            then,
            otherwise,
        } => {
            writeln!(f, "{}if ({}) {{", pad, cond)?;
            write_stmt(then, f, depth + 1)?;
            if let Some(o) = otherwise {
                writeln!(f, "{}}} else {{", pad)?;
                write_stmt(o, f, depth + 1)?;
            }
            writeln!(f, "{}}}", pad)
        }
        Stmt::For {
            var,
            init,
            bound,
            body,
        } => {
            writeln!(f, "{}for ({} = {}; {} < {}) {{", pad, var, init, var, bound)?;
            write_stmt(body, f, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
        Stmt::While { cond, body } => {
            writeln!(f, "{}while ({}) {{", pad, cond)?;
            write_stmt(body, f, depth + 1)?;
            writeln!(f, "{}}}", pad)
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(self, f, 0)
    }
}
