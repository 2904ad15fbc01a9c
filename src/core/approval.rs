//! Human approval checkpoint.
//!
//! A gate presents one artifact at a time and returns a decision. The loop in
//! [`await_approval`] keeps presenting an artifact until it is approved; each
//! rejection with edits becomes a new pending version in the store, and the
//! [`RevisionHook`] gets a chance to rebuild whatever was derived from it.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::{ApprovalStatus, Artifact, ArtifactRef, Phase};
use crate::error::{PipelineError, Result};

use super::artifact_store::ArtifactStore;

/// Operator decision for one artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewDecision {
    Approve,

    /// Replace the content; the artifact stays pending
    Reject { edited_content: String },
}

/// The human boundary: shows an artifact and returns a decision
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    fn name(&self) -> &str;

    async fn review(&self, artifact: &Artifact) -> Result<ReviewDecision>;
}

/// Called after an operator edit is stored, before the next artifact is shown
#[async_trait]
pub trait RevisionHook: Send + Sync {
    /// Returns the versions written as a consequence of `revision`
    async fn revised(&self, revision: &ArtifactRef) -> Result<Vec<ArtifactRef>>;
}

/// Outcome of a cleared checkpoint
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Final approved version of every artifact
    pub approved: Vec<ArtifactRef>,

    /// Versions written from operator edits, in order
    pub revisions: Vec<ArtifactRef>,

    /// Versions regenerated from edited inputs
    pub regenerated: Vec<ArtifactRef>,
}

/// Block until every artifact in `names` is approved.
///
/// Already-approved artifacts are skipped. A blank edit is discarded and the
/// artifact is presented again.
pub async fn await_approval(
    gate: &dyn ApprovalGate,
    store: &ArtifactStore,
    phase: Phase,
    names: &[&str],
    hook: &dyn RevisionHook,
) -> Result<Resolution> {
    let mut resolution = Resolution::default();

    for name in names {
        loop {
            let artifact = store
                .latest(phase, name)
                .await?
                .ok_or_else(|| PipelineError::NotFound {
                    phase,
                    artifact: name.to_string(),
                })?;

            if artifact.status.is_cleared() {
                if let Some(r) = store.latest_ref(phase, name).await? {
                    resolution.approved.push(r);
                }
                break;
            }

            match gate.review(&artifact).await? {
                ReviewDecision::Approve => {
                    let approved = store
                        .set_approval_status(phase, name, ApprovalStatus::Approved)
                        .await?;
                    info!(%phase, artifact = %name, version = approved.version, "Artifact approved");
                    resolution.approved.push(approved);
                    break;
                }
                ReviewDecision::Reject { edited_content } if edited_content.trim().is_empty() => {
                    warn!(%phase, artifact = %name, "Ignoring empty edit");
                }
                ReviewDecision::Reject { edited_content } => {
                    let revised = store.put(phase, name, &edited_content).await?;
                    info!(%phase, artifact = %name, version = revised.version, "Artifact revised by operator");
                    let regenerated = hook.revised(&revised).await?;
                    resolution.revisions.push(revised);
                    resolution.regenerated.extend(regenerated);
                }
            }
        }
    }

    Ok(resolution)
}

/// Gate that approves everything it is shown
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveGate;

#[async_trait]
impl ApprovalGate for AutoApproveGate {
    fn name(&self) -> &str {
        "auto"
    }

    async fn review(&self, artifact: &Artifact) -> Result<ReviewDecision> {
        info!(phase = %artifact.phase, artifact = %artifact.name, "Auto-approving (--yes)");
        Ok(ReviewDecision::Approve)
    }
}
