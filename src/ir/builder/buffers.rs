//! Register and shared-scratch buffer bookkeeping.

use std::collections::BTreeMap;

use crate::ir::{AllocKind, Expr, Var};

/// Generates `prefix_N` names, counting per prefix.
#[derive(Clone, Debug, Default)]
pub struct NameGen {
    counters: BTreeMap<String, u32>,
}

impl NameGen {
    pub fn fresh(&mut self, prefix: &str) -> String {
        let n = self.counters.entry(prefix.to_string()).or_insert(0);
        let name = format!("{}_{}", prefix, n);
        *n += 1;
        name
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BufferDecl {
    pub var: Var,
    pub size: u32,
    pub kind: AllocKind,
}

/// Owns every buffer a kernel allocates. Requesting an existing name
/// returns the same buffer, grown to the largest requested size.
#[derive(Clone, Debug, Default)]
pub struct BufferManager {
    bufs: Vec<BufferDecl>,
    index: BTreeMap<String, usize>,
    names: NameGen,
}

impl BufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn get_kind(&mut self, name: &str, size: u32, kind: AllocKind) -> Expr {
        match self.index.get(name) {
            Some(&i) => {
                let decl = &mut self.bufs[i];
                decl.size = decl.size.max(size);
                decl.var.expr()
            }
            None => {
                let var = Var::ptr(name);
                self.index.insert(name.to_string(), self.bufs.len());
                self.bufs.push(BufferDecl {
                    var: var.clone(),
                    size,
                    kind,
                });
                var.expr()
            }
        }
    }

    /// Register buffer `name` of at least `size` bytes.
    pub fn get(&mut self, name: &str, size: u32) -> Expr {
        self.get_kind(name, size, AllocKind::Grf)
    }

    /// Shared scratch buffer `name` of at least `size` bytes.
    pub fn get_slm(&mut self, name: &str, size: u32) -> Expr {
        self.get_kind(name, size, AllocKind::Slm)
    }

    /// Fresh register buffer named `prefix_N`.
    pub fn tmp(&mut self, prefix: &str, size: u32) -> Expr {
        let name = self.names.fresh(prefix);
        self.get(&name, size)
    }

    pub fn find(&self, name: &str) -> Option<&BufferDecl> {
        self.index.get(name).map(|&i| &self.bufs[i])
    }

    pub fn size(&self, name: &str) -> Option<u32> {
        self.find(name).map(|d| d.size)
    }

    /// All buffers in creation order.
    pub fn decls(&self) -> &[BufferDecl] {
        &self.bufs
    }

    /// Total register bytes requested.
    pub fn grf_bytes(&self) -> u32 {
        self.bufs
            .iter()
            .filter(|d| d.kind == AllocKind::Grf)
            .map(|d| d.size)
            .sum()
    }
}
