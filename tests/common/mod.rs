//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use labflow::adapters::{AgentInvoker, AgentOutput};
use labflow::core::{
    content_hash, ApprovalGate, ArtifactStore, EventLog, PhaseOrchestrator, PromptRenderer,
    ReviewDecision, TemplateRenderer,
};
use labflow::domain::{ApprovalStatus, Artifact, Phase, ResearchProject, TaskSpec};
use labflow::PipelineError;

pub fn project() -> ResearchProject {
    ResearchProject {
        project_name: "Soil Microbiome".to_string(),
        one_liner_description: "Drought response of soil bacteria".to_string(),
        technical_stack: "Python, QIIME 2".to_string(),
        research_objectives: vec!["obj-A".to_string(), "obj-B".to_string()],
    }
}

/// One recorded agent call
#[derive(Debug, Clone)]
pub struct Call {
    pub role: String,
    pub prompt: String,
}

/// Agent backend that records every call and answers deterministically
#[derive(Default)]
pub struct RecordingInvoker {
    calls: Mutex<Vec<Call>>,
    fail_role: Option<String>,
    empty_role: Option<String>,
    slow_role: Option<(String, Duration)>,
}

impl RecordingInvoker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(role: &str) -> Arc<Self> {
        Arc::new(Self {
            fail_role: Some(role.to_string()),
            ..Default::default()
        })
    }

    pub fn empty_on(role: &str) -> Arc<Self> {
        Arc::new(Self {
            empty_role: Some(role.to_string()),
            ..Default::default()
        })
    }

    pub fn slow_on(role: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            slow_role: Some((role.to_string(), delay)),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn roles(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.role).collect()
    }
}

#[async_trait]
impl AgentInvoker for RecordingInvoker {
    fn name(&self) -> &str {
        "recording"
    }

    async fn invoke(&self, role: &str, prompt: &str) -> anyhow::Result<AgentOutput> {
        self.calls.lock().unwrap().push(Call {
            role: role.to_string(),
            prompt: prompt.to_string(),
        });

        if self.fail_role.as_deref() == Some(role) {
            bail!("backend unavailable");
        }
        if let Some((ref slow, delay)) = self.slow_role {
            if slow == role {
                tokio::time::sleep(delay).await;
            }
        }
        if self.empty_role.as_deref() == Some(role) {
            return Ok(AgentOutput::new("  \n".to_string()));
        }

        Ok(AgentOutput::new(format!(
            "## {}\n\nFindings derived from prompt {}\n",
            role,
            content_hash(prompt)
        )))
    }
}

enum Script {
    Decisions(VecDeque<ReviewDecision>),
    Abort,
}

/// Gate that replays scripted decisions per artifact and approves otherwise
#[derive(Default)]
pub struct ScriptedGate {
    scripts: Mutex<HashMap<String, Script>>,
    reviewed: Mutex<Vec<(String, u32)>>,
}

impl ScriptedGate {
    pub fn approving() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_decisions(artifact: &str, decisions: Vec<ReviewDecision>) -> Arc<Self> {
        let gate = Self::default();
        gate.scripts
            .lock()
            .unwrap()
            .insert(artifact.to_string(), Script::Decisions(decisions.into()));
        Arc::new(gate)
    }

    pub fn aborting_on(artifact: &str) -> Arc<Self> {
        let gate = Self::default();
        gate.scripts
            .lock()
            .unwrap()
            .insert(artifact.to_string(), Script::Abort);
        Arc::new(gate)
    }

    /// (artifact, version) pairs in the order they were shown
    pub fn reviewed(&self) -> Vec<(String, u32)> {
        self.reviewed.lock().unwrap().clone()
    }
}

#[async_trait]
impl ApprovalGate for ScriptedGate {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn review(&self, artifact: &Artifact) -> labflow::Result<ReviewDecision> {
        self.reviewed
            .lock()
            .unwrap()
            .push((artifact.name.clone(), artifact.version));

        let mut scripts = self.scripts.lock().unwrap();
        match scripts.get_mut(&artifact.name) {
            Some(Script::Abort) => Err(PipelineError::ApprovalAborted {
                phase: artifact.phase,
                artifact: artifact.name.clone(),
            }),
            Some(Script::Decisions(queue)) => Ok(queue.pop_front().unwrap_or(ReviewDecision::Approve)),
            None => Ok(ReviewDecision::Approve),
        }
    }
}

/// Gate that never answers
pub struct SilentGate;

#[async_trait]
impl ApprovalGate for SilentGate {
    fn name(&self) -> &str {
        "silent"
    }

    async fn review(&self, _artifact: &Artifact) -> labflow::Result<ReviewDecision> {
        std::future::pending().await
    }
}

/// Built-in templates, except one template that cannot be rendered
pub struct BrokenRenderer {
    inner: TemplateRenderer,
    broken: &'static str,
}

impl BrokenRenderer {
    pub fn new(broken: &'static str) -> Arc<Self> {
        Arc::new(Self {
            inner: TemplateRenderer::builtin().unwrap(),
            broken,
        })
    }
}

impl PromptRenderer for BrokenRenderer {
    fn render(
        &self,
        template: &str,
        project: &ResearchProject,
        context: &HashMap<String, String>,
    ) -> labflow::Result<String> {
        if template == self.broken {
            return Err(PipelineError::render(template, "template engine crashed"));
        }
        self.inner.render(template, project, context)
    }

    fn validate(&self, tasks: &[TaskSpec]) -> labflow::Result<()> {
        self.inner.validate(tasks)
    }
}

pub async fn open_store(dir: &Path) -> ArtifactStore {
    ArtifactStore::open(dir.join("output")).await.unwrap()
}

pub async fn orchestrator(
    dir: &Path,
    invoker: Arc<dyn AgentInvoker>,
    gate: Arc<dyn ApprovalGate>,
) -> PhaseOrchestrator {
    orchestrator_with_renderer(dir, invoker, gate, Arc::new(TemplateRenderer::builtin().unwrap()))
        .await
}

pub async fn orchestrator_with_renderer(
    dir: &Path,
    invoker: Arc<dyn AgentInvoker>,
    gate: Arc<dyn ApprovalGate>,
    renderer: Arc<dyn PromptRenderer>,
) -> PhaseOrchestrator {
    let store = open_store(dir).await;
    let events = EventLog::open(&dir.join("output").join("logs")).await.unwrap();
    PhaseOrchestrator::new(store, events, invoker, renderer, gate)
}

/// Write approved design artifacts, as a finished design phase would leave them
pub async fn seed_design(store: &ArtifactStore, names: &[&str], status: ApprovalStatus) {
    for name in names {
        store
            .put(Phase::Design, name, &format!("# {}\n\nSeeded design content.\n", name))
            .await
            .unwrap();
        if status == ApprovalStatus::Approved {
            store
                .set_approval_status(Phase::Design, name, ApprovalStatus::Approved)
                .await
                .unwrap();
        }
    }
}

pub const DESIGN_ROLES: [&str; 3] = [
    "LiteratureReviewer",
    "HypothesisGenerator",
    "MethodologyDesigner",
];
