//! Typed failures of the pipeline controller.
//!
//! Orchestration returns `anyhow::Result`; these variants travel inside it so
//! callers can classify an outcome with `err.downcast_ref::<PipelineError>()`.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Stage;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("cannot start {stage} for '{feature_id}': {missing} artifact is missing")]
    DependencyViolation {
        feature_id: String,
        stage: Stage,
        missing: Stage,
    },

    #[error("review {review_id} for '{feature_id}' is already merged or closed; rerun rejected")]
    ReviewFinalized {
        feature_id: String,
        review_id: String,
    },

    #[error("agent failed during {stage}: {message}")]
    AgentFailed { stage: Stage, message: String },

    #[error("no pipeline run owns review {review_id}")]
    UnknownReview { review_id: String },

    #[error("illegal stage transition from {from} after completing {completed}")]
    IllegalTransition { from: Stage, completed: Stage },

    #[error("artifact {path} is unreadable: {reason}")]
    ArtifactUnreadable { path: PathBuf, reason: String },

    #[error("pipeline run for '{feature_id}' is already active")]
    RunAlreadyActive { feature_id: String },
}

impl PipelineError {
    /// True for conditions the requester caused (as opposed to execution failures).
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::DependencyViolation { .. }
                | PipelineError::ReviewFinalized { .. }
                | PipelineError::UnknownReview { .. }
                | PipelineError::RunAlreadyActive { .. }
        )
    }
}

/// Classify an error chain produced by orchestration.
pub fn pipeline_error(err: &anyhow::Error) -> Option<&PipelineError> {
    err.chain().find_map(|cause| cause.downcast_ref::<PipelineError>())
}
