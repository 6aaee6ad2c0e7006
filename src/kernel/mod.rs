//! Kernel construction: from a descriptor and a plan to an instruction
//! tree.
//!
//! ```text
//! KernelDesc + Plan
//!   → BufferInfo (roles → buffers)
//!   → thread / thread-group index lets
//!   → [Stream-K window loop]
//!       → LoopNest → prefetch + load/multiply fragments → reduction loop
//!       → epilogue (scratch reduce, post-ops, store)
//!   → pass pipeline
//! ```
//!
//! Sub-builders are plain functions over an explicit `BuildCtx`; each
//! returns a `Fragment` or a `Stmt` that the orchestrator places.

pub mod buffer_info;
pub mod builder;
pub mod desc;
pub mod epilogue;
pub mod gemm;
pub mod loop_nest;
pub mod offset;
pub mod plan;
pub mod post_op;
pub mod prefetch;
pub mod stream_k;
pub mod x2r;


pub use buffer_info::{BufferEntry, BufferInfo};
pub use builder::{BuiltKernel, KernelBuilder};
pub use desc::{BinaryAlg, KernelDesc, PostOp, Prop, ScaleDesc, Scales, TensorTag};
pub use gemm::Bmnk;
pub use loop_nest::{Loop, LoopIterator, LoopNest};
pub use plan::{
    CoordEntry, CoordInfo, EpiloguePlan, FmaKind, FmaPlan, Grid, GridAxis, Plan, PrefetchPlan,
    ReorderPlan, SendBlock, SendPlan, SlmReducePlan, Stage, StorePlan, TensorKind, X2rFmaPlan,
    X2rPlan,
};
pub use stream_k::{StreamKSchedule, StreamKWindow, WorkItem};
