//! Error types for the orchestrator and step executor
//! (`spec.md` §7 "Error kinds").

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Core(#[from] flowctl_core::error::CoreError),

    #[error(transparent)]
    Mcp(#[from] flowctl_mcp::error::McpError),

    #[error(transparent)]
    Provider(#[from] flowctl_providers::error::ProviderError),

    #[error("step '{step}' timed out after {timeout_secs}s")]
    StepTimeout { step: String, timeout_secs: u64 },

    #[error("workflow run was cancelled")]
    Cancelled,

    #[error("step '{step}' exceeded max_iterations ({max})")]
    MaxIterationsExceeded { step: String, max: u32 },

    #[error("consensus step '{step}' did not reach quorum: {detail}")]
    ConsensusNoQuorum { step: String, detail: String },

    #[error("loop step '{step}' item '{item}' failed: {message}")]
    LoopItemFailed {
        step: String,
        item: String,
        message: String,
    },

    #[error("loop step '{step}' fell below min_success_rate: {actual:.2} < {required:.2}")]
    LoopSuccessRateUnmet {
        step: String,
        actual: f64,
        required: f64,
    },

    #[error("step '{step}' failed: {message}")]
    StepFailed { step: String, message: String },

    #[error("child workflow '{workflow}' invoked from step '{step}' failed: {message}")]
    ChildWorkflowFailed {
        step: String,
        workflow: String,
        message: String,
    },
}

impl EngineError {
    /// Spec §7's short error-kind code, used in CLI diagnostics and exit-code
    /// mapping.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Core(e) => e.code(),
            EngineError::Mcp(_) => "tool-transport",
            EngineError::Provider(_) => "provider-exhausted",
            EngineError::StepTimeout { .. } => "step-timeout",
            EngineError::Cancelled => "cancelled",
            EngineError::MaxIterationsExceeded { .. } => "max-iterations-exceeded",
            EngineError::ConsensusNoQuorum { .. } => "consensus-no-quorum",
            EngineError::LoopItemFailed { .. } => "loop-item-failed",
            EngineError::LoopSuccessRateUnmet { .. } => "loop-success-rate-unmet",
            EngineError::StepFailed { .. } => "step-failed",
            EngineError::ChildWorkflowFailed { .. } => "child-workflow-failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_error_code_passes_through() {
        let err = EngineError::Core(flowctl_core::error::CoreError::CyclicGraph("a -> b -> a".into()));
        assert_eq!(err.code(), "cyclic-graph");
    }
}
