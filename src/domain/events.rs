//! Audit events recorded by the orchestrator.
//!
//! Events are an append-only trail of what the orchestrator did. They are not
//! used to rebuild pipeline state; the artifacts on disk are the source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::Phase;

/// A single entry in the audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred (ISO 8601)
    pub timestamp: DateTime<Utc>,

    /// The run this event belongs to
    pub run_id: Uuid,

    pub phase: Option<Phase>,

    /// Artifact name (for task and approval events)
    pub artifact: Option<String>,

    pub event_type: EventType,

    /// Human-readable summary (NO prompt or content bodies)
    pub summary: String,

    /// Time taken in milliseconds (for completed tasks)
    pub duration_ms: Option<u64>,

    /// Error message if failed
    pub error: Option<String>,

    /// Tokens reported by the agent backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

impl Event {
    /// Create a new event with the current timestamp
    pub fn new(run_id: Uuid, event_type: EventType, summary: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            run_id,
            phase: None,
            artifact: None,
            event_type,
            summary: summary.into(),
            duration_ms: None,
            error: None,
            tokens_used: None,
        }
    }

    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    pub fn with_artifact(mut self, artifact: impl Into<String>) -> Self {
        self.artifact = Some(artifact.into());
        self
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_tokens(mut self, tokens_used: Option<u64>) -> Self {
        self.tokens_used = tokens_used;
        self
    }
}

/// Types of events recorded during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    RunCompleted,
    RunFailed,
    PhaseStarted,
    PhaseCompleted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,

    /// Pipeline suspended on the approval gate
    ApprovalRequested,

    ArtifactApproved,

    /// Operator supplied edited content; a new pending version was written
    ArtifactRevised,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RunStarted => "run_started",
            Self::RunCompleted => "run_completed",
            Self::RunFailed => "run_failed",
            Self::PhaseStarted => "phase_started",
            Self::PhaseCompleted => "phase_completed",
            Self::TaskStarted => "task_started",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::ApprovalRequested => "approval_requested",
            Self::ArtifactApproved => "artifact_approved",
            Self::ArtifactRevised => "artifact_revised",
        }
    }
}
