//! Compilation errors.
//!
//! Every failure aborts the compilation request; there is no local
//! recovery. The error names the stage that detected the problem.

use std::fmt;

use thiserror::Error;

/// Compilation stage that reported an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Phase {
    Plan,
    BufferInfo,
    LoadMultiply,
    Prefetch,
    Epilogue,
    StreamK,
    Pipeline,
    Config,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Plan => "plan",
            Phase::BufferInfo => "buffer-info",
            Phase::LoadMultiply => "load-multiply",
            Phase::Prefetch => "prefetch",
            Phase::Epilogue => "epilogue",
            Phase::StreamK => "stream-k",
            Phase::Pipeline => "pipeline",
            Phase::Config => "config",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The planner produced no plan for the descriptor.
    #[error("no kernel could be generated: {reason}")]
    PlanUnavailable { reason: String },
    /// An instruction, post-op or propagation kind this compiler does not handle.
    #[error("{phase}: unsupported {what}")]
    UnsupportedInstruction { phase: Phase, what: String },
    /// An internal consistency check failed (planner/builder mismatch).
    #[error("{phase}: invariant violated: {message}")]
    InvariantViolation { phase: Phase, message: String },
}

impl CompileError {
    pub fn plan_unavailable(reason: impl Into<String>) -> Self {
        CompileError::PlanUnavailable {
            reason: reason.into(),
        }
    }

    pub fn unsupported(phase: Phase, what: impl Into<String>) -> Self {
        CompileError::UnsupportedInstruction {
            phase,
            what: what.into(),
        }
    }

    pub fn invariant(phase: Phase, message: impl Into<String>) -> Self {
        CompileError::InvariantViolation {
            phase,
            message: message.into(),
        }
    }

    /// The failing stage. Planner failures report `Phase::Plan`.
    pub fn phase(&self) -> Phase {
        match self {
            CompileError::PlanUnavailable { .. } => Phase::Plan,
            CompileError::UnsupportedInstruction { phase, .. }
            | CompileError::InvariantViolation { phase, .. } => *phase,
        }
    }

    /// Append context to the message.
    pub fn with_note(self, note: impl fmt::Display) -> Self {
        match self {
            CompileError::PlanUnavailable { reason } => CompileError::PlanUnavailable {
                reason: format!("{} ({})", reason, note),
            },
            CompileError::UnsupportedInstruction { phase, what } => {
                CompileError::UnsupportedInstruction {
                    phase,
                    what: format!("{} ({})", what, note),
                }
            }
            CompileError::InvariantViolation { phase, message } => {
                CompileError::InvariantViolation {
                    phase,
                    message: format!("{} ({})", message, note),
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_and_message() {
        let e = CompileError::invariant(Phase::LoadMultiply, "k mismatch: 4 vs 8");
        assert_eq!(e.phase(), Phase::LoadMultiply);
        assert_eq!(
            e.to_string(),
            "load-multiply: invariant violated: k mismatch: 4 vs 8"
        );
    }

    #[test]
    fn test_with_note_keeps_class() {
        let e = CompileError::unsupported(Phase::Epilogue, "post-op").with_note("stream-k");
        assert_eq!(e.phase(), Phase::Epilogue);
        assert_eq!(e.to_string(), "epilogue: unsupported post-op (stream-k)");
        let e = CompileError::plan_unavailable("tile does not divide m");
        assert_eq!(e.phase(), Phase::Plan);
        assert!(e.to_string().starts_with("no kernel could be generated"));
    }
}
