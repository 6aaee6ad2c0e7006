//! Memory and register buffers of every tensor role.
//!
//! Roles are the memory tensor names (`src`, `wei`, `dst`, `bias`,
//! `{src,wei,dst}_scales`, `binary_{i}`) and the GEMM aliases `a`, `b`,
//! `c`, which resolve to the same entry as the tensor they name under
//! the propagation kind.

use std::collections::BTreeMap;

use crate::diagnostic::{CompileError, Phase, Result};
use crate::ir::builder::BuildCtx;
use crate::ir::Expr;

use super::desc::{pick_abc, KernelDesc, PostOp};
use super::plan::{TensorKind, X2rFmaPlan};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BufferEntry {
    pub mem_buf: Option<Expr>,
    pub reg_buf: Option<Expr>,
}

#[derive(Clone, Debug, Default)]
pub struct BufferInfo {
    entries: BTreeMap<String, BufferEntry>,
    aliases: BTreeMap<String, String>,
}

/// Name of the memory argument of binary post-op `idx`.
pub fn binary_arg_name(idx: usize) -> String {
    format!("binary_{}", idx)
}

impl BufferInfo {
    pub fn build(ctx: &mut BuildCtx<'_>, desc: &KernelDesc, plan: &X2rFmaPlan) -> Result<Self> {
        let mut info = Self::default();
        for name in ["src", "wei", "dst"] {
            let mem = ctx.vars.add_ptr_arg(name);
            info.entry(name).mem_buf = Some(mem);
        }
        let (a, b, c) = pick_abc(desc.prop, "src", "wei", "dst");
        for (kind, target) in [(TensorKind::A, a), (TensorKind::B, b), (TensorKind::C, c)] {
            info.aliases.insert(kind.name().to_string(), target.to_string());
        }

        for kind in [TensorKind::A, TensorKind::B] {
            let size = plan.x2r(kind).map(|x| x.reg_bytes()).max();
            if let Some(size) = size {
                let reg = ctx.bufs.get(kind.name(), size);
                info.entry(kind.name()).reg_buf = Some(reg);
            }
        }
        let c_reg = ctx.bufs.get(TensorKind::C.name(), plan.c_layout.size());
        info.entry(TensorKind::C.name()).reg_buf = Some(c_reg);

        // Backward data has no bias gradient to produce.
        if desc.with_bias_fwd() || desc.with_bias_bwd_w() {
            let mem = ctx.vars.add_ptr_arg("bias");
            info.entry("bias").mem_buf = Some(mem);
        }
        if let Some(layout) = &plan.bias_layout {
            if !desc.with_bias_bwd_w() {
                return Err(CompileError::invariant(
                    Phase::BufferInfo,
                    format!("bias reduction planned for {}", desc.prop.name()),
                ));
            }
            let reg = ctx.bufs.get("bias_reduced", layout.size());
            info.entry("bias").reg_buf = Some(reg);
        }
        let scales = [
            ("src_scales", desc.scales.src.is_some()),
            ("wei_scales", desc.scales.wei.is_some()),
            ("dst_scales", desc.scales.dst.is_some()),
        ];
        for (name, present) in scales {
            if present {
                let mem = ctx.vars.add_ptr_arg(name);
                info.entry(name).mem_buf = Some(mem);
            }
        }
        for (i, po) in desc.post_ops.iter().enumerate() {
            if let PostOp::Binary { .. } = po {
                let name = binary_arg_name(i);
                let mem = ctx.vars.add_ptr_arg(&name);
                info.entry(&name).mem_buf = Some(mem);
            }
        }
        Ok(info)
    }

    fn entry(&mut self, role: &str) -> &mut BufferEntry {
        let key = self.resolve(role).to_string();
        self.entries.entry(key).or_default()
    }

    fn resolve<'a>(&'a self, role: &'a str) -> &'a str {
        self.aliases.get(role).map(String::as_str).unwrap_or(role)
    }

    pub fn get(&self, role: &str) -> Option<&BufferEntry> {
        self.entries.get(self.resolve(role))
    }

    pub fn mem_buf(&self, role: &str) -> Option<&Expr> {
        self.get(role)?.mem_buf.as_ref()
    }

    pub fn reg_buf(&self, role: &str) -> Option<&Expr> {
        self.get(role)?.reg_buf.as_ref()
    }

    /// Memory buffer of `role`, failing in `phase` when absent.
    pub fn require_mem(&self, role: &str, phase: Phase) -> Result<&Expr> {
        self.mem_buf(role).ok_or_else(|| {
            CompileError::invariant(phase, format!("no memory buffer for '{}'", role))
        })
    }

    /// Register buffer of `role`, failing in `phase` when absent.
    pub fn require_reg(&self, role: &str, phase: Phase) -> Result<&Expr> {
        self.reg_buf(role).ok_or_else(|| {
            CompileError::invariant(phase, format!("no register buffer for '{}'", role))
        })
    }

    /// Every concrete role with its entry.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &BufferEntry)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}
