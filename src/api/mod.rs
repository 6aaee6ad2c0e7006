//! Public entry points: compile one descriptor, or many in parallel.

mod planner;

#[cfg(test)]
mod tests;

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::debug;

pub use planner::{Launch, Planner, StaticGemmPlanner};

use crate::config::CompileOptions;
use crate::diagnostic::{CompileError, Result};
use crate::ir::builder::{ArgKind, BufferDecl, KernelArg, MAGIC_SUFFIX};
use crate::ir::magic::idiv_magic;
use crate::ir::Stmt;
use crate::kernel::{KernelBuilder, KernelDesc, Plan, StreamKSchedule};

/// A generated kernel and its launch information.
#[derive(Clone, Debug)]
pub struct CompiledKernel {
    pub desc: KernelDesc,
    pub plan: Plan,
    /// Final instruction tree.
    pub body: Stmt,
    /// Kernel arguments in slot order.
    pub args: Vec<KernelArg>,
    pub buffers: Vec<BufferDecl>,
    pub local_size: [u32; 3],
    pub groups: [u32; 3],
    /// Host values of the scalar arguments, magic values included.
    pub scalars: BTreeMap<String, i64>,
    pub stream_k: Option<StreamKSchedule>,
    /// blake3 hash of the printed final tree.
    pub fingerprint: String,
}

impl CompiledKernel {
    pub fn scalar(&self, name: &str) -> Option<i64> {
        self.scalars.get(name).copied()
    }

    /// Names of the pointer arguments, in slot order.
    pub fn ptr_args(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter(|a| a.kind == ArgKind::Pointer)
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Scalar arguments with no host value.
    pub fn missing_scalars(&self) -> Vec<&str> {
        self.args
            .iter()
            .filter(|a| a.kind == ArgKind::Scalar && !self.scalars.contains_key(&a.name))
            .map(|a| a.name.as_str())
            .collect()
    }

    /// Printed final tree.
    pub fn listing(&self) -> String {
        self.body.to_string()
    }
}

/// Compile with the built-in static GEMM planner.
pub fn compile(desc: &KernelDesc, opts: &CompileOptions) -> Result<CompiledKernel> {
    compile_with_planner(desc, opts, &StaticGemmPlanner::default())
}

pub fn compile_with_planner(
    desc: &KernelDesc,
    opts: &CompileOptions,
    planner: &dyn Planner,
) -> Result<CompiledKernel> {
    debug!(desc = %desc.summary(), hw = %opts.hw.name, planner = planner.name(), "compiling");
    opts.hw.validate()?;
    let plan = planner.plan(desc, &opts.hw).ok_or_else(|| {
        CompileError::plan_unavailable(format!("{} has no plan for {}", planner.name(), desc.summary()))
    })?;
    let launch = planner.launch(desc, &plan)?;
    let built = KernelBuilder::new(opts, desc, &plan).build()?;

    let mut scalars = launch.scalars;
    fill_magics(&built.args, &mut scalars);
    let fingerprint = blake3::hash(built.body.to_string().as_bytes())
        .to_hex()
        .to_string();
    debug!(fingerprint = %fingerprint, stmts = built.body.count(), "compiled");
    Ok(CompiledKernel {
        desc: desc.clone(),
        plan,
        body: built.body,
        args: built.args,
        buffers: built.buffers,
        local_size: launch.local_size,
        groups: launch.groups,
        scalars,
        stream_k: launch.stream_k,
        fingerprint,
    })
}

/// Compile independent requests in parallel. Results keep request order.
pub fn compile_batch(
    descs: &[KernelDesc],
    opts: &CompileOptions,
    planner: &dyn Planner,
) -> Vec<Result<CompiledKernel>> {
    descs
        .par_iter()
        .map(|desc| compile_with_planner(desc, opts, planner))
        .collect()
}

/// Add the magic value of every `X_magic` argument whose divisor `X` has
/// a host value.
fn fill_magics(args: &[KernelArg], scalars: &mut BTreeMap<String, i64>) {
    for arg in args {
        if scalars.contains_key(&arg.name) {
            continue;
        }
        let Some(divisor) = arg.name.strip_suffix(MAGIC_SUFFIX) else {
            continue;
        };
        if let Some(&d) = scalars.get(divisor) {
            if d > 0 {
                scalars.insert(arg.name.clone(), idiv_magic(d as u32) as i64);
            }
        }
    }
}
