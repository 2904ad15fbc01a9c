//! Pipeline phases and the fixed task table.
//!
//! Every phase owns an ordered list of tasks. Each task produces exactly one
//! artifact and consumes at most one earlier artifact, so the whole pipeline is
//! a single linear chain.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Top-level pipeline stage with a fixed total order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Design,
    ExperimentDesign,
    ExecutionAnalysis,
    Reporting,
}

impl Phase {
    /// All phases in execution order
    pub const ALL: [Phase; 4] = [
        Phase::Design,
        Phase::ExperimentDesign,
        Phase::ExecutionAnalysis,
        Phase::Reporting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Design => "design",
            Self::ExperimentDesign => "experiment_design",
            Self::ExecutionAnalysis => "execution_analysis",
            Self::Reporting => "reporting",
        }
    }

    /// Directory name under the output root
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Design => "1_design",
            Self::ExperimentDesign => "2_experiment_design",
            Self::ExecutionAnalysis => "3_execution_analysis",
            Self::Reporting => "4_reporting",
        }
    }

    /// Per-phase human-readable log under `<output>/logs/`
    pub fn log_file_name(&self) -> &'static str {
        match self {
            Self::Design => "research_design.log",
            Self::ExperimentDesign => "experimentation.log",
            Self::ExecutionAnalysis => "execution_analysis.log",
            Self::Reporting => "reporting_dissemination.log",
        }
    }

    /// Whether artifacts of this phase need human approval before advancing
    pub fn requires_approval(&self) -> bool {
        matches!(self, Self::Design)
    }

    /// Tasks of this phase in their required order
    pub fn tasks(&self) -> impl Iterator<Item = &'static TaskSpec> + '_ {
        TASKS.iter().filter(move |t| t.phase == *self)
    }

    /// Names of the artifacts this phase must produce
    pub fn required_artifacts(&self) -> Vec<&'static str> {
        self.tasks().map(|t| t.artifact).collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Phase::ALL
            .into_iter()
            .find(|p| p.as_str() == s || p.dir_name() == s)
            .ok_or_else(|| {
                format!(
                    "unknown phase '{}' (expected one of: design, experiment_design, execution_analysis, reporting)",
                    s
                )
            })
    }
}

/// Reference to an artifact by (phase, name)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub phase: Phase,
    pub name: &'static str,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.phase, self.name)
    }
}

/// Static description of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskSpec {
    pub phase: Phase,
    /// Name of the artifact produced
    pub artifact: &'static str,
    /// Agent role the prompt is sent to
    pub role: &'static str,
    /// Template used to render the prompt
    pub template: &'static str,
    /// Artifact whose content feeds this task's prompt
    pub consumes: Option<ArtifactKey>,
}

impl TaskSpec {
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            phase: self.phase,
            name: self.artifact,
        }
    }

    /// Context keys this task passes to the prompt renderer
    pub fn context_keys(&self) -> Vec<String> {
        match self.consumes {
            Some(input) => vec![
                "previous_content".to_string(),
                format!("{}_content", input.name),
            ],
            None => Vec::new(),
        }
    }
}

/// Every task of the pipeline, in execution order
pub const TASKS: [TaskSpec; 8] = [
    TaskSpec {
        phase: Phase::Design,
        artifact: "literature_review",
        role: "LiteratureReviewer",
        template: "conduct_literature_review",
        consumes: None,
    },
    TaskSpec {
        phase: Phase::Design,
        artifact: "hypothesis",
        role: "HypothesisGenerator",
        template: "generate_hypothesis",
        consumes: Some(ArtifactKey {
            phase: Phase::Design,
            name: "literature_review",
        }),
    },
    TaskSpec {
        phase: Phase::Design,
        artifact: "methodology",
        role: "MethodologyDesigner",
        template: "design_methodology",
        consumes: Some(ArtifactKey {
            phase: Phase::Design,
            name: "hypothesis",
        }),
    },
    TaskSpec {
        phase: Phase::ExperimentDesign,
        artifact: "experiment_protocol",
        role: "ExperimentDesigner",
        template: "design_experiment_protocol",
        consumes: Some(ArtifactKey {
            phase: Phase::Design,
            name: "methodology",
        }),
    },
    TaskSpec {
        phase: Phase::ExecutionAnalysis,
        artifact: "raw_observations",
        role: "ExperimentConductor",
        template: "conduct_experiment",
        consumes: Some(ArtifactKey {
            phase: Phase::ExperimentDesign,
            name: "experiment_protocol",
        }),
    },
    TaskSpec {
        phase: Phase::ExecutionAnalysis,
        artifact: "analysis",
        role: "DataAnalyzer",
        template: "analyze_data",
        consumes: Some(ArtifactKey {
            phase: Phase::ExecutionAnalysis,
            name: "raw_observations",
        }),
    },
    TaskSpec {
        phase: Phase::Reporting,
        artifact: "report",
        role: "Reporter",
        template: "write_research_report",
        consumes: Some(ArtifactKey {
            phase: Phase::ExecutionAnalysis,
            name: "analysis",
        }),
    },
    TaskSpec {
        phase: Phase::Reporting,
        artifact: "dissemination_plan",
        role: "KnowledgeDisseminator",
        template: "create_dissemination_plan",
        consumes: Some(ArtifactKey {
            phase: Phase::Reporting,
            name: "report",
        }),
    },
];
