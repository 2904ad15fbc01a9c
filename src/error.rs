//! Error kinds raised by the orchestration engine.
//!
//! Task-level errors (render, agent, approval) are caught by the orchestrator
//! and turned into a failed outcome. Config, precondition and storage errors
//! stop the run outright.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::{ApprovalStatus, Phase};

/// Result alias for engine operations
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Precondition not met: {phase}/{artifact} is {reason}")]
    PreconditionNotMet {
        phase: Phase,
        artifact: String,
        reason: String,
    },

    #[error("Failed to render template '{template}': {message}")]
    Render { template: String, message: String },

    #[error("Agent '{role}' failed: {message}")]
    AgentInvocation { role: String, message: String },

    #[error("Invalid approval transition for {phase}/{artifact}: {from} -> {to}")]
    InvalidApprovalTransition {
        phase: Phase,
        artifact: String,
        from: ApprovalStatus,
        to: ApprovalStatus,
    },

    #[error("Artifact not found: {phase}/{artifact}")]
    NotFound { phase: Phase, artifact: String },

    #[error("Approval aborted by operator for {phase}/{artifact}")]
    ApprovalAborted { phase: Phase, artifact: String },

    #[error("Approval not resolved within {seconds}s")]
    ApprovalTimeout { seconds: u64 },

    #[error("Storage error at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Wrap an I/O failure with the path it happened on
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }

    pub fn render(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Render {
            template: template.into(),
            message: message.into(),
        }
    }

    pub fn agent(role: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentInvocation {
            role: role.into(),
            message: message.into(),
        }
    }

    /// Whether the error aborts only the current task.
    ///
    /// Task-level errors move the pipeline to `Failed` and keep every artifact
    /// already on disk. Everything else is fatal for the run.
    pub fn is_task_level(&self) -> bool {
        matches!(
            self,
            Self::Render { .. }
                | Self::AgentInvocation { .. }
                | Self::InvalidApprovalTransition { .. }
                | Self::NotFound { .. }
                | Self::ApprovalAborted { .. }
                | Self::ApprovalTimeout { .. }
        )
    }
}
