//! Kernel arguments: pointer tensors, host-supplied runtime constants and
//! the magic values for dividing by them.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::ir::{Dim, Expr, Type, Var};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArgKind {
    Scalar,
    Pointer,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KernelArg {
    pub name: String,
    #[serde(serialize_with = "serialize_type")]
    pub ty: Type,
    pub kind: ArgKind,
}

fn serialize_type<S: serde::Serializer>(ty: &Type, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ty.to_string())
}

/// Hardware-provided index variables. Never kernel arguments.
pub const BUILTINS: [&str; 6] = [
    "local_id0",
    "local_id1",
    "local_id2",
    "group_id0",
    "group_id1",
    "group_id2",
];

pub fn builtin(name: &str) -> Expr {
    Var::s32(name).expr()
}

/// Suffix of the argument holding the magic value for a divisor argument.
pub const MAGIC_SUFFIX: &str = "_magic";

#[derive(Clone, Debug, Default)]
pub struct VarManager {
    args: Vec<KernelArg>,
    index: BTreeMap<String, usize>,
}

impl VarManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, name: &str, ty: Type, kind: ArgKind) -> u32 {
        if let Some(&i) = self.index.get(name) {
            return i as u32;
        }
        let slot = self.args.len();
        self.index.insert(name.to_string(), slot);
        self.args.push(KernelArg {
            name: name.to_string(),
            ty,
            kind,
        });
        slot as u32
    }

    /// Register a pointer argument; returns the buffer variable.
    pub fn add_ptr_arg(&mut self, name: &str) -> Expr {
        self.add(name, Type::ptr(), ArgKind::Pointer);
        Var::ptr(name).expr()
    }

    /// Register a scalar runtime constant; returns its reference.
    pub fn add_scalar_arg(&mut self, name: &str, ty: Type) -> Expr {
        self.add(name, ty, ArgKind::Scalar);
        Expr::const_var(name, ty)
    }

    pub fn get_arg(&self, name: &str) -> Option<Expr> {
        let arg = &self.args[*self.index.get(name)?];
        Some(match arg.kind {
            ArgKind::Pointer => Var::ptr(&arg.name).expr(),
            ArgKind::Scalar => Expr::const_var(&arg.name, arg.ty),
        })
    }

    /// Runtime size of the thread-group grid along `dim`.
    pub fn get_grid_size(&mut self, dim: &Dim) -> Expr {
        self.add_scalar_arg(&grid_size_name(dim), Type::s32())
    }

    /// Magic value argument for dividing by `divisor`, when the divisor is
    /// a host-supplied constant. Registers both arguments.
    pub fn get_idiv_magic(&mut self, divisor: &Expr) -> Option<Expr> {
        let name = match divisor {
            Expr::ConstVar(v) => {
                self.add(&v.name, v.ty, ArgKind::Scalar);
                v.name.clone()
            }
            Expr::Arg { name, ty, .. } if !ty.is_ptr() => name.clone(),
            _ => return None,
        };
        Some(self.add_scalar_arg(&format!("{}{}", name, MAGIC_SUFFIX), Type::u64()))
    }

    pub fn slot(&self, name: &str) -> Option<u32> {
        self.index.get(name).map(|&i| i as u32)
    }

    pub fn is_arg(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn args(&self) -> &[KernelArg] {
        &self.args
    }

    pub fn ptr_args(&self) -> impl Iterator<Item = &KernelArg> {
        self.args.iter().filter(|a| a.kind == ArgKind::Pointer)
    }

    pub fn into_args(self) -> Vec<KernelArg> {
        self.args
    }
}

pub fn grid_size_name(dim: &Dim) -> String {
    format!("{}_grid_size", dim)
}
