use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::diagnostic::{CompileError, Phase, Result};

/// Hardware configuration of the accelerator a kernel is generated for.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HwConfig {
    /// Short identifier (e.g. "xe_hpc").
    pub name: String,
    /// Bytes per general register.
    pub grf_size: u32,
    /// Number of general registers per thread.
    pub regs: u32,
    /// Native SIMD width.
    pub simd: u32,
    /// Largest single memory transfer in bytes.
    pub max_send_bytes: u32,
    /// Shared scratch memory per thread group in bytes.
    pub slm_size: u32,
    /// Systolic depth; 0 when the hardware has no systolic unit.
    pub systolic_depth: u32,
}

impl HwConfig {
    pub fn xe_lp() -> Self {
        Self {
            name: "xe_lp".to_string(),
            grf_size: 32,
            regs: 128,
            simd: 8,
            max_send_bytes: 256,
            slm_size: 64 * 1024,
            systolic_depth: 0,
        }
    }

    pub fn xe_hp() -> Self {
        Self {
            name: "xe_hp".to_string(),
            grf_size: 32,
            regs: 128,
            simd: 8,
            max_send_bytes: 256,
            slm_size: 64 * 1024,
            systolic_depth: 8,
        }
    }

    pub fn xe_hpc() -> Self {
        Self {
            name: "xe_hpc".to_string(),
            grf_size: 64,
            regs: 128,
            simd: 16,
            max_send_bytes: 512,
            slm_size: 128 * 1024,
            systolic_depth: 8,
        }
    }

    /// Built-in configuration by name.
    pub fn resolve(name: &str) -> Result<Self> {
        match name {
            "xe_lp" => Ok(Self::xe_lp()),
            "xe_hp" => Ok(Self::xe_hp()),
            "xe_hpc" => Ok(Self::xe_hpc()),
            _ => Err(CompileError::invariant(
                Phase::Config,
                format!("unknown hardware '{}'", name),
            )
            .with_note("available: xe_lp, xe_hp, xe_hpc")),
        }
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CompileError::invariant(
                Phase::Config,
                format!("cannot read hardware config '{}': {}", path.display(), e),
            )
        })?;
        let hw: Self = serde_json::from_str(&content).map_err(|e| {
            CompileError::invariant(Phase::Config, format!("{}: {}", path.display(), e))
        })?;
        hw.validate()?;
        Ok(hw)
    }

    pub fn validate(&self) -> Result<()> {
        let pow2 = |field: &str, v: u32| {
            if v == 0 || !v.is_power_of_two() {
                Err(CompileError::invariant(
                    Phase::Config,
                    format!("{}: {} must be a non-zero power of two, got {}", self.name, field, v),
                ))
            } else {
                Ok(())
            }
        };
        pow2("grf_size", self.grf_size)?;
        pow2("max_send_bytes", self.max_send_bytes)?;
        pow2("simd", self.simd)?;
        Ok(())
    }

    /// Register file size in bytes.
    pub fn grf_bytes(&self) -> u32 {
        self.grf_size * self.regs
    }
}
