//! Tile kernel compiler: turns a kernel descriptor and a plan into an
//! instruction tree for a SIMD accelerator.

pub mod api;
pub mod config;
pub mod diagnostic;
pub mod ir;
pub mod kernel;

// Re-export the public API: `tilejit::compile()` etc.
pub use api::*;
pub use config::{CompileOptions, HwConfig};
pub use diagnostic::{CompileError, Phase};
pub use kernel::{KernelDesc, Plan};
