//! labflow - Checkpointed research pipeline runner
//!
//! Drives a research project through four ordered phases (design, experiment
//! design, execution and analysis, reporting) with a human approval
//! checkpoint after design. Each task hands a rendered prompt to an agent
//! backend and stores the result as a versioned markdown artifact.
//!
//! # Architecture
//!
//! The filesystem is the source of truth:
//! - Every artifact is persisted before the next task starts
//! - Pipeline state is recomputed from the output directory, never cached
//! - A failed or interrupted run resumes from the first incomplete phase
//!
//! # Modules
//!
//! - `adapters`: Agent backends (OpenAI-compatible HTTP, subprocess) and the terminal gate
//! - `core`: Orchestration logic (ArtifactStore, EventLog, prompts, approval)
//! - `domain`: Data structures (Project, Phase, Artifact, Event, State)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Run every phase, prompting for design approval
//! labflow run --project project_config.yaml
//!
//! # Resume after the design phase was approved
//! labflow run --skip-planning
//!
//! # Inspect progress
//! labflow status
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;

// Re-export main types at crate root for convenience
pub use crate::core::{ArtifactStore, PhaseOrchestrator, TerminalOutcome};
pub use domain::{Phase, PipelineStage, PipelineState, ResearchProject};
pub use error::{PipelineError, Result};
