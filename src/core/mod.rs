//! Core orchestration logic.
//!
//! This module contains:
//! - ArtifactStore: Versioned, phase-scoped document storage
//! - EventLog: Append-only audit trail
//! - Prompts: Template loading, validation and rendering
//! - Approval: The human checkpoint after design
//! - Orchestrator: Main execution engine

pub mod approval;
pub mod artifact_store;
pub mod event_log;
pub mod orchestrator;
pub mod prompts;

// Re-export commonly used types
pub use approval::{
    await_approval, ApprovalGate, AutoApproveGate, Resolution, ReviewDecision, RevisionHook,
};
pub use artifact_store::{content_hash, ArtifactStore, RunLock};
pub use event_log::EventLog;
pub use orchestrator::{preflight, PhaseOrchestrator, TaskFailure, TerminalOutcome};
pub use prompts::{PromptRenderer, TemplateRenderer};
