//! Phase orchestrator.
//!
//! Drives a project through design, approval, experiment design, execution and
//! reporting. Tasks run strictly in sequence because each one consumes the
//! previous task's artifact. Every artifact is persisted before the next task
//! starts, so a failed run can be inspected and resumed from disk.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{error, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

use crate::adapters::{AgentInvoker, AgentOutput};
use crate::domain::{
    ArtifactRef, Event, EventType, Phase, PipelineStage, PipelineState, ResearchProject, TaskSpec,
    TASKS,
};
use crate::error::{PipelineError, Result};

use super::approval::{await_approval, ApprovalGate, Resolution, RevisionHook};
use super::artifact_store::ArtifactStore;
use super::event_log::EventLog;
use super::prompts::PromptRenderer;

const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(600);

/// Where and why a run stopped
#[derive(Debug)]
pub struct TaskFailure {
    /// Stage that was executing
    pub stage: PipelineStage,
    pub phase: Phase,
    /// Artifact that could not be produced or approved
    pub artifact: Option<String>,
    pub error: PipelineError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.artifact {
            Some(ref artifact) => write!(f, "{}/{}: {}", self.phase, artifact, self.error),
            None => write!(f, "{} ({}): {}", self.phase, self.stage, self.error),
        }
    }
}

/// Result of a run that reached a terminal stage
#[derive(Debug)]
pub struct TerminalOutcome {
    pub run_id: Uuid,

    /// `Done` or `Failed`
    pub stage: PipelineStage,

    /// Latest version of every artifact produced during this run, in task order
    pub artifacts: Vec<ArtifactRef>,

    pub failure: Option<TaskFailure>,
}

impl TerminalOutcome {
    pub fn is_done(&self) -> bool {
        self.stage == PipelineStage::Done
    }
}

/// Error while producing one artifact
struct TaskError {
    artifact: Option<String>,
    source: PipelineError,
}

impl TaskError {
    fn new(artifact: Option<&str>, source: PipelineError) -> Self {
        Self {
            artifact: artifact.map(str::to_string),
            source,
        }
    }
}

/// Artifact a task-level error refers to
fn failed_artifact(error: &PipelineError) -> Option<String> {
    match error {
        PipelineError::ApprovalAborted { artifact, .. }
        | PipelineError::NotFound { artifact, .. }
        | PipelineError::InvalidApprovalTransition { artifact, .. } => Some(artifact.clone()),
        PipelineError::AgentInvocation { role, .. } => TASKS
            .iter()
            .find(|t| t.role == role.as_str())
            .map(|t| t.artifact.to_string()),
        PipelineError::Render { template, .. } => TASKS
            .iter()
            .find(|t| t.template == template.as_str())
            .map(|t| t.artifact.to_string()),
        _ => None,
    }
}

/// Checks a run makes before touching the output directory.
///
/// Validates the project and every task template, then verifies that all
/// phases before `start` are complete (and approved where gated) on disk.
pub async fn preflight(
    store: &ArtifactStore,
    project: &ResearchProject,
    renderer: &dyn PromptRenderer,
    start: Phase,
) -> Result<PipelineState> {
    project.validate()?;
    renderer.validate(&TASKS)?;

    let state = PipelineState::scan(store, start != Phase::Design).await?;
    state.check_ready_for(start)?;
    Ok(state)
}

/// Re-runs the tasks downstream of an operator edit within the same phase
struct Regenerate<'a> {
    orchestrator: &'a PhaseOrchestrator,
    run_id: Uuid,
    project: &'a ResearchProject,
}

#[async_trait]
impl<'a> RevisionHook for Regenerate<'a> {
    async fn revised(&self, revision: &ArtifactRef) -> Result<Vec<ArtifactRef>> {
        let Some(edited) = TASKS
            .iter()
            .find(|t| t.phase == revision.phase && t.artifact == revision.name)
        else {
            return Ok(Vec::new());
        };

        let mut written = Vec::new();
        let mut upstream = edited.key();
        while let Some(task) = TASKS
            .iter()
            .find(|t| t.phase == revision.phase && t.consumes == Some(upstream))
        {
            info!(
                edited = %revision,
                artifact = task.artifact,
                "Regenerating from edited input"
            );
            written.push(
                self.orchestrator
                    .run_task(self.run_id, self.project, task)
                    .await?,
            );
            upstream = task.key();
        }
        Ok(written)
    }
}

/// Main pipeline orchestrator
pub struct PhaseOrchestrator {
    store: ArtifactStore,
    events: EventLog,
    invoker: Arc<dyn AgentInvoker>,
    renderer: Arc<dyn PromptRenderer>,
    gate: Arc<dyn ApprovalGate>,
    task_timeout: Duration,
    approval_timeout: Option<Duration>,
}

impl PhaseOrchestrator {
    pub fn new(
        store: ArtifactStore,
        events: EventLog,
        invoker: Arc<dyn AgentInvoker>,
        renderer: Arc<dyn PromptRenderer>,
        gate: Arc<dyn ApprovalGate>,
    ) -> Self {
        Self {
            store,
            events,
            invoker,
            renderer,
            gate,
            task_timeout: DEFAULT_TASK_TIMEOUT,
            approval_timeout: None,
        }
    }

    /// Upper bound for a single agent call
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Upper bound for the approval checkpoint (`None` blocks indefinitely)
    pub fn with_approval_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.approval_timeout = timeout;
        self
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// Run the full pipeline, or resume after design approval when
    /// `skip_planning` is set.
    pub async fn run(&self, project: &ResearchProject, skip_planning: bool) -> Result<TerminalOutcome> {
        let start = if skip_planning {
            Phase::ExperimentDesign
        } else {
            Phase::Design
        };
        self.run_from(project, start).await
    }

    /// Run every phase from `start` onward.
    ///
    /// All phases before `start` must already be complete (and approved where
    /// gated) on disk; nothing earlier is regenerated.
    #[instrument(skip_all, fields(project = %project.slug(), start = %start))]
    pub async fn run_from(&self, project: &ResearchProject, start: Phase) -> Result<TerminalOutcome> {
        preflight(&self.store, project, self.renderer.as_ref(), start).await?;

        // Readiness is checked again under the lock before each phase
        let _lock = self.store.lock()?;

        let run_id = Uuid::new_v4();
        info!(%run_id, "Starting pipeline");
        self.record(Event::new(
            run_id,
            EventType::RunStarted,
            format!("Project '{}' starting at {}", project.project_name, start),
        ))
        .await;

        let mut touched: Vec<&'static TaskSpec> = Vec::new();
        let mut stage = PipelineStage::for_phase(start);

        while !stage.is_terminal() {
            let step = match stage.phase() {
                Some(phase) => {
                    self.execute_phase(run_id, project, phase, &mut touched)
                        .instrument(info_span!("phase", %phase))
                        .await
                }
                None => self.execute_checkpoint(run_id, project).await.map(|_| ()),
            };

            match step {
                Ok(()) => {
                    let next = stage.next();
                    info!(from = %stage, to = %next, "Stage transition");
                    stage = next;
                }
                Err(e) if e.source.is_task_level() => {
                    let failure = TaskFailure {
                        stage,
                        phase: stage.phase().unwrap_or(Phase::Design),
                        artifact: e.artifact,
                        error: e.source,
                    };
                    return self.fail(run_id, failure, &touched).await;
                }
                Err(e) => {
                    error!(%stage, error = %e.source, "Fatal error; halting run");
                    self.record(
                        Event::new(run_id, EventType::RunFailed, "Run halted")
                            .with_error(e.source.to_string()),
                    )
                    .await;
                    return Err(e.source);
                }
            }
        }

        info!(%run_id, "Pipeline completed");
        self.record(Event::new(run_id, EventType::RunCompleted, "All phases completed"))
            .await;

        Ok(TerminalOutcome {
            run_id,
            stage: PipelineStage::Done,
            artifacts: self.collect_refs(&touched).await?,
            failure: None,
        })
    }

    /// Run the tasks of one phase in order
    async fn execute_phase(
        &self,
        run_id: Uuid,
        project: &ResearchProject,
        phase: Phase,
        touched: &mut Vec<&'static TaskSpec>,
    ) -> Result<(), TaskError> {
        // Ordering invariant, checked against disk rather than memory
        PipelineState::scan(&self.store, phase != Phase::Design)
            .await
            .and_then(|state| state.check_ready_for(phase))
            .map_err(|e| TaskError::new(None, e))?;

        info!("Phase started");
        self.record(
            Event::new(run_id, EventType::PhaseStarted, format!("Phase {} started", phase))
                .with_phase(phase),
        )
        .await;

        for task in phase.tasks() {
            self.run_task(run_id, project, task)
                .await
                .map_err(|e| TaskError::new(Some(task.artifact), e))?;
            touched.push(task);
        }

        self.record(
            Event::new(run_id, EventType::PhaseCompleted, format!("Phase {} completed", phase))
                .with_phase(phase),
        )
        .await;

        Ok(())
    }

    /// Produce and persist one artifact
    #[instrument(skip_all, fields(artifact = task.artifact))]
    async fn run_task(
        &self,
        run_id: Uuid,
        project: &ResearchProject,
        task: &TaskSpec,
    ) -> Result<ArtifactRef> {
        info!(artifact = task.artifact, role = task.role, "Task started");
        self.record(
            Event::new(run_id, EventType::TaskStarted, format!("{} started", task.artifact))
                .with_phase(task.phase)
                .with_artifact(task.artifact),
        )
        .await;

        let started = Instant::now();
        let result = self.produce(project, task).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok((artifact, tokens_used)) => {
                info!(
                    artifact = task.artifact,
                    version = artifact.version,
                    duration_ms,
                    tokens_used,
                    "Task completed"
                );
                self.record(
                    Event::new(
                        run_id,
                        EventType::TaskCompleted,
                        format!("{} v{} written in {}ms", task.artifact, artifact.version, duration_ms),
                    )
                    .with_phase(task.phase)
                    .with_artifact(task.artifact)
                    .with_duration(duration_ms)
                    .with_tokens(tokens_used),
                )
                .await;
                Ok(artifact)
            }
            Err(e) => {
                error!(artifact = task.artifact, error = %e, "Task failed");
                self.record(
                    Event::new(run_id, EventType::TaskFailed, format!("{} failed", task.artifact))
                        .with_phase(task.phase)
                        .with_artifact(task.artifact)
                        .with_duration(duration_ms)
                        .with_error(e.to_string()),
                )
                .await;
                Err(e)
            }
        }
    }

    async fn produce(
        &self,
        project: &ResearchProject,
        task: &TaskSpec,
    ) -> Result<(ArtifactRef, Option<u64>)> {
        let mut context = HashMap::new();
        if let Some(input) = task.consumes {
            let content = self.store.get(input.phase, input.name).await?;
            context.insert(format!("{}_content", input.name), content.clone());
            context.insert("previous_content".to_string(), content);
        }

        let prompt = self.renderer.render(task.template, project, &context)?;

        // No lock is held here; the call may be slow
        let output: AgentOutput = match tokio::time::timeout(
            self.task_timeout,
            self.invoker.invoke(task.role, &prompt),
        )
        .await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(PipelineError::agent(task.role, format!("{:#}", e))),
            Err(_) => {
                return Err(PipelineError::agent(
                    task.role,
                    format!("timed out after {}s", self.task_timeout.as_secs()),
                ))
            }
        };

        if output.content.trim().is_empty() {
            return Err(PipelineError::agent(task.role, "returned empty content"));
        }

        let artifact = self.store.put(task.phase, task.artifact, &output.content).await?;
        Ok((artifact, output.tokens_used))
    }

    /// Suspend until every design artifact is approved.
    ///
    /// Artifacts are reviewed in task order. An edit regenerates the later
    /// tasks of the phase that depend on it before they are shown.
    async fn execute_checkpoint(
        &self,
        run_id: Uuid,
        project: &ResearchProject,
    ) -> Result<Resolution, TaskError> {
        let phase = Phase::Design;
        let names = phase.required_artifacts();

        info!(gate = self.gate.name(), "Awaiting approval");
        self.record(
            Event::new(
                run_id,
                EventType::ApprovalRequested,
                format!("Awaiting approval of {}", names.join(", ")),
            )
            .with_phase(phase),
        )
        .await;

        let hook = Regenerate {
            orchestrator: self,
            run_id,
            project,
        };
        let review = await_approval(self.gate.as_ref(), &self.store, phase, &names, &hook);
        let resolution = match self.approval_timeout {
            Some(limit) => tokio::time::timeout(limit, review).await.unwrap_or_else(|_| {
                Err(PipelineError::ApprovalTimeout {
                    seconds: limit.as_secs(),
                })
            }),
            None => review.await,
        }
        .map_err(|e| TaskError {
            artifact: failed_artifact(&e),
            source: e,
        })?;

        for revised in &resolution.revisions {
            self.record(
                Event::new(
                    run_id,
                    EventType::ArtifactRevised,
                    format!("{} revised to v{}", revised.name, revised.version),
                )
                .with_phase(phase)
                .with_artifact(revised.name.clone()),
            )
            .await;
        }
        info!(
            revised = resolution.revisions.len(),
            regenerated = resolution.regenerated.len(),
            "Design approved"
        );
        for approved in &resolution.approved {
            self.record(
                Event::new(
                    run_id,
                    EventType::ArtifactApproved,
                    format!("{} v{} approved", approved.name, approved.version),
                )
                .with_phase(phase)
                .with_artifact(approved.name.clone()),
            )
            .await;
        }

        Ok(resolution)
    }

    async fn fail(
        &self,
        run_id: Uuid,
        failure: TaskFailure,
        touched: &[&'static TaskSpec],
    ) -> Result<TerminalOutcome> {
        error!(
            phase = %failure.phase,
            artifact = failure.artifact.as_deref().unwrap_or("-"),
            error = %failure.error,
            "Pipeline failed; persisted artifacts kept for resume"
        );
        self.record(
            Event::new(run_id, EventType::RunFailed, format!("Run failed at {}", failure.stage))
                .with_phase(failure.phase)
                .with_error(failure.error.to_string()),
        )
        .await;

        Ok(TerminalOutcome {
            run_id,
            stage: PipelineStage::Failed,
            artifacts: self.collect_refs(touched).await?,
            failure: Some(failure),
        })
    }

    async fn collect_refs(&self, touched: &[&'static TaskSpec]) -> Result<Vec<ArtifactRef>> {
        let mut refs = Vec::with_capacity(touched.len());
        for task in touched {
            if let Some(r) = self.store.latest_ref(task.phase, task.artifact).await? {
                refs.push(r);
            }
        }
        Ok(refs)
    }

    /// Append to the audit log; failures here never stop the pipeline
    async fn record(&self, event: Event) {
        if let Err(e) = self.events.append(&event).await {
            warn!(error = %e, event_type = ?event.event_type, "Failed to record event");
        }
    }
}
