//! Hardware description and compile options.

mod hw;

#[cfg(test)]
mod tests;

pub use hw::HwConfig;

/// Options for one compilation request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompileOptions {
    pub hw: HwConfig,
    /// Statements per common-subexpression window.
    pub cse_window: usize,
    /// Widest register store, in registers; wider stores are split.
    pub store_split_regs: u32,
}

impl CompileOptions {
    pub fn new(hw: HwConfig) -> Self {
        Self {
            hw,
            cse_window: 16,
            store_split_regs: 2,
        }
    }

    pub fn with_cse_window(mut self, window: usize) -> Self {
        self.cse_window = window.max(1);
        self
    }

    pub fn with_store_split_regs(mut self, regs: u32) -> Self {
        self.store_split_regs = regs.max(1);
        self
    }

    /// Widest register store in bytes.
    pub fn max_store_bytes(&self) -> u32 {
        self.store_split_regs * self.hw.grf_size
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new(HwConfig::xe_hpc())
    }
}
