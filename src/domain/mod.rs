//! Domain types for the research pipeline.
//!
//! This module contains the core data structures:
//! - Project: The research configuration record
//! - Phase: Pipeline stages and their task table
//! - Artifact: Task outputs and approval status
//! - Events: Audit log entries
//! - State: Pipeline snapshots recomputed from disk

pub mod artifact;
pub mod events;
pub mod phase;
pub mod project;
pub mod state;

// Re-export commonly used types
pub use artifact::{ApprovalStatus, Artifact, ArtifactRef, VersionRecord};
pub use events::{Event, EventType};
pub use phase::{ArtifactKey, Phase, TaskSpec, TASKS};
pub use project::ResearchProject;
pub use state::{PipelineStage, PipelineState};
