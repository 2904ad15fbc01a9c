//! The research project record driving a run.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Project configuration, loaded once and never mutated during a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResearchProject {
    pub project_name: String,
    pub one_liner_description: String,
    pub technical_stack: String,
    pub research_objectives: Vec<String>,
}

impl ResearchProject {
    /// Load and validate a project from a YAML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "failed to read project file {}: {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse and validate a project from YAML content
    pub fn from_yaml(content: &str) -> Result<Self> {
        let project: Self = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("malformed project config: {}", e)))?;
        project.validate()?;
        Ok(project)
    }

    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("project_name", &self.project_name),
            ("one_liner_description", &self.one_liner_description),
            ("technical_stack", &self.technical_stack),
        ];

        for (field, value) in fields {
            if value.trim().is_empty() {
                return Err(PipelineError::Config(format!("'{}' cannot be empty", field)));
            }
        }

        if self.research_objectives.is_empty() {
            return Err(PipelineError::Config(
                "'research_objectives' must list at least one objective".to_string(),
            ));
        }

        if let Some(idx) = self
            .research_objectives
            .iter()
            .position(|o| o.trim().is_empty())
        {
            return Err(PipelineError::Config(format!(
                "research objective {} is empty",
                idx + 1
            )));
        }

        Ok(())
    }

    /// Filesystem/log friendly project identifier
    pub fn slug(&self) -> String {
        self.project_name.trim().to_lowercase().replace(' ', "_")
    }

    /// Objectives rendered as a markdown bullet list
    pub fn objectives_markdown(&self) -> String {
        self.research_objectives
            .iter()
            .map(|o| format!("- {}", o))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
