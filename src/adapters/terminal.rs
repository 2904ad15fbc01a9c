//! Interactive approval gate on the controlling terminal.

use async_trait::async_trait;
use dialoguer::{theme::ColorfulTheme, Editor, Select};
use tracing::warn;

use crate::core::approval::{ApprovalGate, ReviewDecision};
use crate::domain::Artifact;
use crate::error::{PipelineError, Result};

/// Shows each artifact and asks the operator to approve, edit or abort
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalGate;

impl TerminalGate {
    pub fn new() -> Self {
        Self
    }

    fn prompt(artifact: &Artifact) -> Result<ReviewDecision> {
        let aborted = || PipelineError::ApprovalAborted {
            phase: artifact.phase,
            artifact: artifact.name.clone(),
        };

        eprintln!();
        eprintln!(
            "=== {}/{} (version {}) ===",
            artifact.phase, artifact.name, artifact.version
        );
        eprintln!("{}", artifact.content.trim_end());
        eprintln!("=== end of {} ===", artifact.name);

        let options = &["Approve", "Edit and resubmit", "Abort (keep pending)"];

        loop {
            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Review {}", artifact.name))
                .items(options)
                .default(0)
                .interact()
                .map_err(|e| {
                    warn!(error = %e, "Terminal prompt failed");
                    aborted()
                })?;

            match selection {
                0 => return Ok(ReviewDecision::Approve),
                1 => {
                    let edited = Editor::new()
                        .extension(".md")
                        .edit(&artifact.content)
                        .map_err(|e| {
                            warn!(error = %e, "Editor failed");
                            aborted()
                        })?;

                    match edited {
                        Some(content) if content != artifact.content => {
                            return Ok(ReviewDecision::Reject {
                                edited_content: content,
                            })
                        }
                        _ => eprintln!("No changes saved; choose again."),
                    }
                }
                _ => return Err(aborted()),
            }
        }
    }
}

#[async_trait]
impl ApprovalGate for TerminalGate {
    fn name(&self) -> &str {
        "terminal"
    }

    async fn review(&self, artifact: &Artifact) -> Result<ReviewDecision> {
        let artifact = artifact.clone();
        let phase = artifact.phase;
        let name = artifact.name.clone();

        tokio::task::spawn_blocking(move || Self::prompt(&artifact))
            .await
            .map_err(|e| {
                warn!(error = %e, "Approval prompt task failed");
                PipelineError::ApprovalAborted {
                    phase,
                    artifact: name,
                }
            })?
    }
}
