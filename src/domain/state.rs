//! Pipeline state snapshots.
//!
//! `PipelineState` is never stored. It is recomputed from whatever artifacts
//! exist on disk, so resuming is a pure function of the output directory.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::artifact::{ApprovalStatus, ArtifactRef};
use super::phase::{Phase, TASKS};
use crate::core::ArtifactStore;
use crate::error::{PipelineError, Result};

/// State-machine position of the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    Design,
    AwaitingApproval,
    ExperimentDesign,
    ExecutionAnalysis,
    Reporting,
    Done,
    Failed,
}

impl PipelineStage {
    /// Stage that runs the tasks of `phase`
    pub fn for_phase(phase: Phase) -> Self {
        match phase {
            Phase::Design => Self::Design,
            Phase::ExperimentDesign => Self::ExperimentDesign,
            Phase::ExecutionAnalysis => Self::ExecutionAnalysis,
            Phase::Reporting => Self::Reporting,
        }
    }

    /// Phase executed in this stage, if any
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Self::Design => Some(Phase::Design),
            Self::ExperimentDesign => Some(Phase::ExperimentDesign),
            Self::ExecutionAnalysis => Some(Phase::ExecutionAnalysis),
            Self::Reporting => Some(Phase::Reporting),
            Self::AwaitingApproval | Self::Done | Self::Failed => None,
        }
    }

    /// Successor after the stage's work succeeds
    pub fn next(&self) -> Self {
        match self {
            Self::Design => Self::AwaitingApproval,
            Self::AwaitingApproval => Self::ExperimentDesign,
            Self::ExperimentDesign => Self::ExecutionAnalysis,
            Self::ExecutionAnalysis => Self::Reporting,
            Self::Reporting => Self::Done,
            Self::Done => Self::Done,
            Self::Failed => Self::Failed,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Design => "design",
            Self::AwaitingApproval => "awaiting_approval",
            Self::ExperimentDesign => "experiment_design",
            Self::ExecutionAnalysis => "execution_analysis",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Immutable view of pipeline progress derived from the artifact store
#[derive(Debug, Clone)]
pub struct PipelineState {
    /// First stage with outstanding work
    pub stage: PipelineStage,

    /// Latest version of every artifact present, keyed by (phase, name)
    pub artifacts: BTreeMap<(Phase, String), ArtifactRef>,

    pub skip_planning: bool,
}

impl PipelineState {
    /// Rebuild the snapshot by scanning the store
    pub async fn scan(store: &ArtifactStore, skip_planning: bool) -> Result<Self> {
        let mut artifacts = BTreeMap::new();
        for task in TASKS.iter() {
            if let Some(latest) = store.latest_ref(task.phase, task.artifact).await? {
                artifacts.insert((task.phase, task.artifact.to_string()), latest);
            }
        }

        let stage = Self::derive_stage(&artifacts);

        Ok(Self {
            stage,
            artifacts,
            skip_planning,
        })
    }

    fn derive_stage(artifacts: &BTreeMap<(Phase, String), ArtifactRef>) -> PipelineStage {
        for phase in Phase::ALL {
            let mut pending = false;
            for name in phase.required_artifacts() {
                match artifacts.get(&(phase, name.to_string())) {
                    None => return PipelineStage::for_phase(phase),
                    Some(a) if a.status == ApprovalStatus::Pending => pending = true,
                    Some(_) => {}
                }
            }
            if pending {
                return PipelineStage::AwaitingApproval;
            }
        }
        PipelineStage::Done
    }

    pub fn get(&self, phase: Phase, name: &str) -> Option<&ArtifactRef> {
        self.artifacts.get(&(phase, name.to_string()))
    }

    /// Verify every phase before `start` is complete and cleared.
    ///
    /// Fails with `PreconditionNotMet` naming the first offending artifact.
    pub fn check_ready_for(&self, start: Phase) -> Result<()> {
        for phase in Phase::ALL.into_iter().take_while(|p| *p < start) {
            for name in phase.required_artifacts() {
                let reason = match self.get(phase, name) {
                    None => "missing",
                    Some(a) if phase.requires_approval() && a.status != ApprovalStatus::Approved => {
                        "not approved"
                    }
                    Some(_) => continue,
                };
                return Err(PipelineError::PreconditionNotMet {
                    phase,
                    artifact: name.to_string(),
                    reason: reason.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Design artifacts still waiting for a decision
    pub fn pending_approvals(&self) -> Vec<&ArtifactRef> {
        self.artifacts
            .values()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .collect()
    }
}
