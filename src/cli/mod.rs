//! Command-line interface for labflow.
//!
//! Provides commands for running the research pipeline, inspecting progress,
//! approving design artifacts out of band, validating templates and showing
//! the resolved settings.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::{AgentInvoker, CommandInvoker, OpenAiInvoker, TerminalGate};
use crate::config::{self, BackendConfig, Settings};
use crate::core::{
    preflight, ApprovalGate, ArtifactStore, AutoApproveGate, EventLog, PhaseOrchestrator,
    PromptRenderer, TemplateRenderer, TerminalOutcome,
};
use crate::domain::{
    ApprovalStatus, ArtifactRef, Phase, PipelineStage, PipelineState, ResearchProject, TASKS,
};

/// labflow - Checkpointed research pipeline runner
#[derive(Parser, Debug)]
#[command(name = "labflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Settings file (default: discovered .labflow/config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Project YAML file
    #[arg(short, long, global = true)]
    pub project: Option<PathBuf>,

    /// Output root for artifacts and logs
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the pipeline
    Run {
        /// Resume after an approved design phase
        #[arg(long, conflicts_with = "from_phase")]
        skip_planning: bool,

        /// Start at this phase; everything before it must already be on disk
        #[arg(long)]
        from_phase: Option<Phase>,

        /// Approve design artifacts without prompting
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Show pipeline progress recomputed from the output directory
    Status {
        /// Number of recent events to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    /// Approve pending design artifacts (all when none named)
    Approve {
        artifacts: Vec<String>,
    },

    /// Load the project and templates and validate placeholders
    Check,

    /// Show resolved configuration (debug)
    Config,
}

/// Inputs of `labflow run`, validated before anything is written
#[derive(Debug)]
pub struct PreparedRun {
    pub project: ResearchProject,
    pub renderer: TemplateRenderer,
    pub start: Phase,
    pub auto_approve: bool,
}

/// What `approve` did with one design artifact
#[derive(Debug)]
pub enum ApprovalChange {
    Approved(ArtifactRef),
    /// Already approved, or otherwise not pending
    Skipped(ArtifactRef),
    Missing(String),
}

impl Cli {
    /// Settings with command-line overrides applied
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = match self.config {
            Some(ref path) => config::load_settings_from(Some(path.as_path()))?,
            None => config::settings()?.clone(),
        };

        if let Some(ref project) = self.project {
            settings.project_file = project.clone();
        }
        if let Some(ref output) = self.output {
            settings.output_dir = output.clone();
        }
        Ok(settings)
    }

    /// Structured run log, written only by commands that execute tasks
    pub fn run_log_path(&self, settings: &Settings) -> Option<PathBuf> {
        match self.command {
            Commands::Run { .. } => Some(settings.logs_dir().join("run.log")),
            _ => None,
        }
    }

    /// Load and check everything `run` needs without touching the output
    /// directory. `None` for every other command.
    pub async fn prepare_run(&self, settings: &Settings) -> Result<Option<PreparedRun>> {
        let Commands::Run {
            skip_planning,
            from_phase,
            yes,
        } = self.command
        else {
            return Ok(None);
        };

        let start = from_phase.unwrap_or(if skip_planning {
            Phase::ExperimentDesign
        } else {
            Phase::Design
        });
        let project = load_project(settings)?;
        let renderer = load_renderer(settings)?;
        preflight(&ArtifactStore::new(&settings.output_dir), &project, &renderer, start).await?;

        Ok(Some(PreparedRun {
            project,
            renderer,
            start,
            auto_approve: yes,
        }))
    }

    /// Execute the CLI command
    pub async fn execute(self, settings: Settings, prepared: Option<PreparedRun>) -> Result<ExitCode> {
        match self.command {
            Commands::Run { .. } => {
                let run = match prepared {
                    Some(run) => run,
                    None => self
                        .prepare_run(&settings)
                        .await?
                        .context("Run command has no prepared inputs")?,
                };
                return run_pipeline(&settings, run).await;
            }
            Commands::Status { limit } => show_status(&settings, limit).await?,
            Commands::Approve { ref artifacts } => {
                let store = ArtifactStore::open(&settings.output_dir).await?;
                let changes = approve_pending(&store, artifacts).await?;
                print_approvals(&changes);
            }
            Commands::Check => check(&settings)?,
            Commands::Config => show_config(&settings)?,
        }
        Ok(ExitCode::SUCCESS)
    }
}

fn load_project(settings: &Settings) -> Result<ResearchProject> {
    ResearchProject::from_file(&settings.project_file)
        .with_context(|| format!("Failed to load project: {}", settings.project_file.display()))
}

fn load_renderer(settings: &Settings) -> Result<TemplateRenderer> {
    let renderer = match settings.templates_file {
        Some(ref path) => TemplateRenderer::from_file(path)?,
        None => TemplateRenderer::builtin()?,
    };
    Ok(renderer)
}

fn build_invoker(backend: &BackendConfig) -> Arc<dyn AgentInvoker> {
    match backend {
        BackendConfig::Openai(settings) => Arc::new(OpenAiInvoker::new(settings.clone())),
        BackendConfig::Command { program, args } => {
            Arc::new(CommandInvoker::new(program.clone(), args.clone()))
        }
    }
}

/// Process exit status for a finished run
pub fn exit_status(outcome: &TerminalOutcome) -> u8 {
    if outcome.is_done() {
        0
    } else {
        1
    }
}

/// Run the pipeline from a prepared start phase
async fn run_pipeline(settings: &Settings, run: PreparedRun) -> Result<ExitCode> {
    let invoker = build_invoker(&settings.backend);

    if let Err(e) = invoker.health_check().await {
        tracing::warn!(backend = invoker.name(), error = %e, "Agent backend health check failed");
    }

    let gate: Arc<dyn ApprovalGate> = if run.auto_approve {
        Arc::new(AutoApproveGate)
    } else {
        Arc::new(TerminalGate::new())
    };

    let store = ArtifactStore::open(&settings.output_dir).await?;
    let events = EventLog::open(&settings.logs_dir()).await?;

    let orchestrator = PhaseOrchestrator::new(store, events, invoker, Arc::new(run.renderer), gate)
        .with_task_timeout(settings.task_timeout)
        .with_approval_timeout(settings.approval_timeout);

    let outcome = orchestrator.run_from(&run.project, run.start).await?;

    for artifact in &outcome.artifacts {
        println!("{}  {}", artifact, artifact.path.display());
    }
    match failure_report(&outcome, orchestrator.store().root()) {
        Some(report) => eprintln!("\n{}", report),
        None => eprintln!("\n[Run {} completed successfully]", outcome.run_id),
    }

    Ok(ExitCode::from(exit_status(&outcome)))
}

/// Where a failed run stopped and how to resume it
pub fn failure_report(outcome: &TerminalOutcome, output_dir: &Path) -> Option<String> {
    let failure = outcome.failure.as_ref()?;
    let header = format!("[Run {} failed at {}]", outcome.run_id, failure);

    let hint = if failure.stage == PipelineStage::AwaitingApproval {
        format!(
            "Design artifacts remain pending under {}; approve them with `labflow approve` \
             and resume with `labflow run --skip-planning`.",
            output_dir.display()
        )
    } else {
        format!(
            "Artifacts written so far remain under {}; fix the cause and resume with \
             `labflow run --from-phase {}`.",
            output_dir.display(),
            failure.phase
        )
    };
    Some(format!("{}\n{}", header, hint))
}

/// Show progress recomputed from disk plus the latest events
async fn show_status(settings: &Settings, limit: usize) -> Result<()> {
    let store = ArtifactStore::new(&settings.output_dir);
    let state = PipelineState::scan(&store, false).await?;

    println!("Output: {}", settings.output_dir.display());
    println!("Stage:  {}", state.stage);
    println!();
    println!("Artifacts:");
    for task in TASKS.iter() {
        match state.get(task.phase, task.artifact) {
            Some(a) => println!(
                "  {:<20} {:<20} v{:<3} {:<12} {}",
                task.phase.as_str(),
                task.artifact,
                a.version,
                a.status,
                a.produced_at.format("%Y-%m-%d %H:%M:%S")
            ),
            None => println!("  {:<20} {:<20} -", task.phase.as_str(), task.artifact),
        }
    }

    let pending = state.pending_approvals();
    if !pending.is_empty() {
        println!();
        println!("Awaiting approval:");
        for a in pending {
            println!("  {}", a);
        }
        println!("Approve with `labflow approve`, then resume with `labflow run --skip-planning`.");
    }

    let logs_dir = settings.logs_dir();
    if !logs_dir.exists() {
        return Ok(());
    }
    let events = EventLog::open(&logs_dir).await?;
    let recent = events.tail(limit).await?;
    if !recent.is_empty() {
        println!();
        println!("Recent events:");
        for event in recent {
            let error = event
                .error
                .as_deref()
                .map(|e| format!(" ({})", e))
                .unwrap_or_default();
            println!(
                "  {} {}: {}{}",
                event.timestamp.format("%Y-%m-%d %H:%M:%S"),
                event.event_type.as_str(),
                event.summary,
                error
            );
        }
    }

    Ok(())
}

/// Approve pending design artifacts without running the pipeline.
///
/// With no names every design artifact is considered and missing ones are
/// reported; a named artifact must exist.
pub async fn approve_pending(store: &ArtifactStore, names: &[String]) -> Result<Vec<ApprovalChange>> {
    let phase = Phase::Design;
    let required = phase.required_artifacts();

    let targets: Vec<String> = if names.is_empty() {
        required.iter().map(|n| n.to_string()).collect()
    } else {
        if let Some(unknown) = names.iter().find(|n| !required.contains(&n.as_str())) {
            anyhow::bail!(
                "'{}' is not a design artifact (expected one of: {})",
                unknown,
                required.join(", ")
            );
        }
        names.to_vec()
    };

    let _lock = store.lock()?;

    let mut changes = Vec::with_capacity(targets.len());
    for name in &targets {
        let change = match store.latest_ref(phase, name).await? {
            Some(a) if a.status == ApprovalStatus::Pending => ApprovalChange::Approved(
                store
                    .set_approval_status(phase, name, ApprovalStatus::Approved)
                    .await?,
            ),
            Some(a) => ApprovalChange::Skipped(a),
            None if names.is_empty() => ApprovalChange::Missing(name.clone()),
            None => anyhow::bail!("{}/{} has not been produced yet", phase, name),
        };
        changes.push(change);
    }

    Ok(changes)
}

fn print_approvals(changes: &[ApprovalChange]) {
    let mut approved = 0;
    for change in changes {
        match change {
            ApprovalChange::Approved(a) => {
                println!("Approved {}", a);
                approved += 1;
            }
            ApprovalChange::Skipped(a) => println!("Skipping {}", a),
            ApprovalChange::Missing(name) => println!("Skipping {}/{} (missing)", Phase::Design, name),
        }
    }
    println!("{} artifact(s) approved", approved);
}

/// Validate project and templates without calling any agent
fn check(settings: &Settings) -> Result<()> {
    let project = load_project(settings)?;
    let renderer = load_renderer(settings)?;
    renderer.validate(&TASKS)?;

    let templates = renderer.templates();
    println!("Project:   {} ({})", project.project_name, settings.project_file.display());
    println!("Objectives: {}", project.research_objectives.len());
    println!(
        "Templates: {} ({} agents, {} tasks; {} pipeline tasks validated)",
        settings
            .templates_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "built-in".to_string()),
        templates.agents.len(),
        templates.tasks.len(),
        TASKS.len()
    );
    Ok(())
}

fn show_config(settings: &Settings) -> Result<()> {
    println!("labflow configuration");
    println!();
    println!(
        "Config file: {}",
        settings
            .config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Project:   {}", settings.project_file.display());
    println!("  Output:    {}", settings.output_dir.display());
    println!("  Logs:      {}", settings.logs_dir().display());
    println!(
        "  Templates: {}",
        settings
            .templates_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(built-in)".to_string())
    );
    println!();
    println!("Backend:");
    match settings.backend {
        BackendConfig::Openai(ref openai) => {
            println!("  Kind:        openai");
            println!("  Base URL:    {}", openai.base_url);
            println!("  Model:       {}", openai.model);
            println!(
                "  API key:     {}",
                if openai.api_key.is_some() { "(set)" } else { "(none)" }
            );
            println!("  Temperature: {}", openai.temperature);
            println!("  Max tokens:  {}", openai.max_tokens);
            println!(
                "  Retry:       {} attempts, {}ms base, x{} (max {}ms)",
                openai.retry.attempts,
                openai.retry.base_delay_ms,
                openai.retry.multiplier,
                openai.retry.max_delay_ms
            );
        }
        BackendConfig::Command { ref program, ref args } => {
            println!("  Kind:    command");
            println!("  Program: {}", program);
            println!("  Args:    {}", args.join(" "));
        }
    }
    println!();
    println!("Timeouts:");
    println!("  Task:     {}s", settings.task_timeout.as_secs());
    match settings.approval_timeout {
        Some(t) => println!("  Approval: {}s", t.as_secs()),
        None => println!("  Approval: (none)"),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskFailure;
    use crate::PipelineError;
    use tempfile::TempDir;
    use uuid::Uuid;

    const PROJECT_YAML: &str = "\
project_name: Soil Microbiome
one_liner_description: Drought response of soil bacteria
technical_stack: Python, QIIME 2
research_objectives:
  - obj-A
";

    fn settings_in(temp: &TempDir) -> Settings {
        let settings = Settings::defaults_in(temp.path());
        std::fs::write(&settings.project_file, PROJECT_YAML).unwrap();
        settings
    }

    fn outcome(stage: PipelineStage, failure: Option<TaskFailure>) -> TerminalOutcome {
        TerminalOutcome {
            run_id: Uuid::new_v4(),
            stage,
            artifacts: Vec::new(),
            failure,
        }
    }

    async fn seed_design(store: &ArtifactStore, names: &[&str]) {
        for name in names {
            store.put(Phase::Design, name, "draft").await.unwrap();
        }
    }

    #[test]
    fn test_run_flags_parse() {
        let cli = Cli::try_parse_from(["labflow", "run", "--skip-planning", "-y"]).unwrap();
        match cli.command {
            Commands::Run {
                skip_planning,
                from_phase,
                yes,
            } => {
                assert!(skip_planning);
                assert!(yes);
                assert!(from_phase.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_from_phase_accepts_dir_name() {
        let cli = Cli::try_parse_from(["labflow", "run", "--from-phase", "3_execution_analysis"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Run {
                from_phase: Some(Phase::ExecutionAnalysis),
                ..
            }
        ));
    }

    #[test]
    fn test_skip_planning_conflicts_with_from_phase() {
        let result = Cli::try_parse_from([
            "labflow",
            "run",
            "--skip-planning",
            "--from-phase",
            "reporting",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_global_overrides() {
        let cli = Cli::try_parse_from([
            "labflow",
            "approve",
            "hypothesis",
            "--output",
            "/tmp/out",
            "--config",
            "/nonexistent/config.yaml",
        ])
        .unwrap();
        assert_eq!(cli.output, Some(PathBuf::from("/tmp/out")));
        assert!(matches!(cli.command, Commands::Approve { ref artifacts } if artifacts == &["hypothesis"]));
    }

    #[test]
    fn test_run_log_only_for_run() {
        let settings = Settings::defaults_in(Path::new("/work"));
        let run = Cli::try_parse_from(["labflow", "run"]).unwrap();
        let status = Cli::try_parse_from(["labflow", "status"]).unwrap();
        assert_eq!(
            run.run_log_path(&settings),
            Some(PathBuf::from("/work/output/logs/run.log"))
        );
        assert!(status.run_log_path(&settings).is_none());
    }

    #[test]
    fn test_exit_status_follows_outcome() {
        assert_eq!(exit_status(&outcome(PipelineStage::Done, None)), 0);

        let failed = outcome(
            PipelineStage::Failed,
            Some(TaskFailure {
                stage: PipelineStage::Reporting,
                phase: Phase::Reporting,
                artifact: Some("report".to_string()),
                error: PipelineError::agent("Reporter", "boom"),
            }),
        );
        assert_eq!(exit_status(&failed), 1);
    }

    #[test]
    fn test_failure_report_names_phase_and_artifact() {
        let failed = outcome(
            PipelineStage::Failed,
            Some(TaskFailure {
                stage: PipelineStage::ExecutionAnalysis,
                phase: Phase::ExecutionAnalysis,
                artifact: Some("analysis".to_string()),
                error: PipelineError::agent("DataAnalyzer", "connection refused"),
            }),
        );

        let report = failure_report(&failed, Path::new("/runs/soil")).unwrap();
        assert!(report.contains("execution_analysis/analysis"));
        assert!(report.contains("connection refused"));
        assert!(report.contains("--from-phase execution_analysis"));
        assert!(report.contains("/runs/soil"));

        assert!(failure_report(&outcome(PipelineStage::Done, None), Path::new("/runs")).is_none());
    }

    #[test]
    fn test_failure_report_at_checkpoint_suggests_approve() {
        let failed = outcome(
            PipelineStage::Failed,
            Some(TaskFailure {
                stage: PipelineStage::AwaitingApproval,
                phase: Phase::Design,
                artifact: Some("hypothesis".to_string()),
                error: PipelineError::ApprovalAborted {
                    phase: Phase::Design,
                    artifact: "hypothesis".to_string(),
                },
            }),
        );

        let report = failure_report(&failed, Path::new("/runs")).unwrap();
        assert!(report.contains("design/hypothesis"));
        assert!(report.contains("labflow approve"));
        assert!(report.contains("--skip-planning"));
    }

    #[tokio::test]
    async fn test_approve_all_pending() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).await.unwrap();
        seed_design(&store, &["literature_review", "hypothesis", "methodology"]).await;
        store
            .set_approval_status(Phase::Design, "hypothesis", ApprovalStatus::Approved)
            .await
            .unwrap();

        let changes = approve_pending(&store, &[]).await.unwrap();

        assert_eq!(changes.len(), 3);
        assert!(matches!(changes[0], ApprovalChange::Approved(ref a) if a.name == "literature_review"));
        assert!(matches!(changes[1], ApprovalChange::Skipped(ref a) if a.name == "hypothesis"));
        assert!(matches!(changes[2], ApprovalChange::Approved(ref a) if a.version == 1));
        for name in ["literature_review", "hypothesis", "methodology"] {
            assert!(store.is_approved(Phase::Design, name).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_approve_reports_missing_when_unnamed() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).await.unwrap();
        seed_design(&store, &["literature_review"]).await;

        let changes = approve_pending(&store, &[]).await.unwrap();
        assert!(matches!(changes[1], ApprovalChange::Missing(ref n) if n == "hypothesis"));
        assert!(matches!(changes[2], ApprovalChange::Missing(ref n) if n == "methodology"));
    }

    #[tokio::test]
    async fn test_approve_named_artifacts() {
        let temp = TempDir::new().unwrap();
        let store = ArtifactStore::open(temp.path()).await.unwrap();
        seed_design(&store, &["literature_review", "hypothesis"]).await;

        let changes = approve_pending(&store, &["hypothesis".to_string()])
            .await
            .unwrap();
        assert_eq!(changes.len(), 1);
        assert!(store.is_approved(Phase::Design, "hypothesis").await.unwrap());
        assert!(!store.is_approved(Phase::Design, "literature_review").await.unwrap());

        let missing = approve_pending(&store, &["methodology".to_string()]).await;
        assert!(missing.unwrap_err().to_string().contains("has not been produced"));

        let unknown = approve_pending(&store, &["report".to_string()]).await;
        assert!(unknown.unwrap_err().to_string().contains("not a design artifact"));
    }

    #[tokio::test]
    async fn test_prepare_run_leaves_output_untouched_on_failure() {
        let temp = TempDir::new().unwrap();
        let settings = settings_in(&temp);

        let cli = Cli::try_parse_from(["labflow", "run", "--skip-planning"]).unwrap();
        let err = cli.prepare_run(&settings).await.unwrap_err();

        assert!(err.to_string().contains("design"));
        assert!(!settings.output_dir.exists());
    }

    #[tokio::test]
    async fn test_prepare_run_rejects_bad_project_before_output() {
        let temp = TempDir::new().unwrap();
        let settings = Settings::defaults_in(temp.path());
        std::fs::write(&settings.project_file, "project_name: ''\n").unwrap();

        let cli = Cli::try_parse_from(["labflow", "run", "-y"]).unwrap();
        assert!(cli.prepare_run(&settings).await.is_err());
        assert!(!settings.output_dir.exists());
    }

    #[tokio::test]
    async fn test_prepare_run_only_for_run() {
        let temp = TempDir::new().unwrap();
        let settings = settings_in(&temp);

        let status = Cli::try_parse_from(["labflow", "status"]).unwrap();
        assert!(status.prepare_run(&settings).await.unwrap().is_none());

        let run = Cli::try_parse_from(["labflow", "run", "--yes"]).unwrap();
        let prepared = run.prepare_run(&settings).await.unwrap().unwrap();
        assert_eq!(prepared.start, Phase::Design);
        assert!(prepared.auto_approve);
        assert_eq!(prepared.project.project_name, "Soil Microbiome");
        assert!(!settings.output_dir.exists());
    }

    #[test]
    fn test_build_invoker_selects_backend() {
        let command = build_invoker(&BackendConfig::Command {
            program: "cat".to_string(),
            args: Vec::new(),
        });
        assert_eq!(command.name(), "command");
        assert_eq!(build_invoker(&BackendConfig::default()).name(), "openai");
    }
}
