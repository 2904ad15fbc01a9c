//! Prompt templates and rendering.
//!
//! Templates are YAML with an `agents` section (persona per role) and a `tasks`
//! section (description and expected output per task). Placeholders use
//! `{{ name }}` syntax. A renderer is a pure function of template, project and
//! context; every placeholder a task uses can be checked up front with
//! [`PromptRenderer::validate`].

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{ResearchProject, TaskSpec};
use crate::error::{PipelineError, Result};

/// Built-in template set shipped with the binary
const DEFAULT_TEMPLATES: &str = include_str!("../../templates/prompts.yaml");

/// Placeholders filled from the project record
pub const PROJECT_PLACEHOLDERS: [&str; 4] = [
    "project_name",
    "one_liner_description",
    "technical_stack",
    "research_objectives",
];

/// Turns a template name plus data into a prompt string
pub trait PromptRenderer: Send + Sync {
    fn render(
        &self,
        template: &str,
        project: &ResearchProject,
        context: &HashMap<String, String>,
    ) -> Result<String>;

    /// Check that every task's template exists and its placeholders are satisfiable
    fn validate(&self, _tasks: &[TaskSpec]) -> Result<()> {
        Ok(())
    }
}

/// Raw template file schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSet {
    pub agents: HashMap<String, AgentTemplate>,
    pub tasks: HashMap<String, TaskTemplate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub role: String,
    pub goal: String,
    pub backstory: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    /// Key into `agents`
    pub agent: String,
    pub description: String,
    pub expected_output: String,
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder regex is valid")
    })
}

/// Names of every placeholder in `text`
pub fn placeholders(text: &str) -> BTreeSet<String> {
    placeholder_regex()
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Renderer backed by a YAML template set
#[derive(Debug, Clone)]
pub struct TemplateRenderer {
    templates: TemplateSet,
}

impl TemplateRenderer {
    pub fn new(templates: TemplateSet) -> Self {
        Self { templates }
    }

    /// Load the built-in template set
    pub fn builtin() -> Result<Self> {
        Self::from_yaml(DEFAULT_TEMPLATES)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "failed to read templates {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let templates: TemplateSet = serde_yaml::from_str(content)
            .map_err(|e| PipelineError::Config(format!("malformed prompt templates: {}", e)))?;
        Ok(Self::new(templates))
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    fn lookup(&self, template: &str) -> Result<(&TaskTemplate, &AgentTemplate)> {
        let task = self
            .templates
            .tasks
            .get(template)
            .ok_or_else(|| PipelineError::render(template, "no such task template"))?;
        let agent = self.templates.agents.get(&task.agent).ok_or_else(|| {
            PipelineError::render(template, format!("unknown agent '{}'", task.agent))
        })?;
        Ok((task, agent))
    }

    /// Every placeholder the full prompt for `template` would use
    fn template_placeholders(&self, template: &str) -> Result<BTreeSet<String>> {
        let (task, agent) = self.lookup(template)?;
        let mut names = BTreeSet::new();
        for text in [
            &agent.role,
            &agent.goal,
            &agent.backstory,
            &task.description,
            &task.expected_output,
        ] {
            names.extend(placeholders(text));
        }
        Ok(names)
    }
}

impl PromptRenderer for TemplateRenderer {
    fn render(
        &self,
        template: &str,
        project: &ResearchProject,
        context: &HashMap<String, String>,
    ) -> Result<String> {
        let (task, agent) = self.lookup(template)?;

        let mut values: HashMap<&str, String> = HashMap::new();
        values.insert("project_name", project.project_name.clone());
        values.insert("one_liner_description", project.one_liner_description.clone());
        values.insert("technical_stack", project.technical_stack.clone());
        values.insert("research_objectives", project.objectives_markdown());
        for (k, v) in context {
            values.insert(k.as_str(), v.clone());
        }

        let fill = |text: &str| -> Result<String> {
            let mut missing = None;
            let out = placeholder_regex().replace_all(text, |caps: &regex::Captures| {
                match values.get(&caps[1]) {
                    Some(v) => v.clone(),
                    None => {
                        missing.get_or_insert_with(|| caps[1].to_string());
                        String::new()
                    }
                }
            });
            match missing {
                Some(name) => Err(PipelineError::render(
                    template,
                    format!("no value for placeholder '{}'", name),
                )),
                None => Ok(out.into_owned()),
            }
        };

        Ok(format!(
            "You are the {role}.\nGoal: {goal}\nBackground: {backstory}\n\n## Task\n{description}\n\n## Expected output\n{expected}\n",
            role = fill(&agent.role)?.trim(),
            goal = fill(&agent.goal)?.trim(),
            backstory = fill(&agent.backstory)?.trim(),
            description = fill(&task.description)?.trim(),
            expected = fill(&task.expected_output)?.trim(),
        ))
    }

    fn validate(&self, tasks: &[TaskSpec]) -> Result<()> {
        for task in tasks {
            let used = self
                .template_placeholders(task.template)
                .map_err(|e| PipelineError::Config(e.to_string()))?;

            let context = task.context_keys();
            for name in used {
                let known = PROJECT_PLACEHOLDERS.contains(&name.as_str()) || context.contains(&name);
                if !known {
                    return Err(PipelineError::Config(format!(
                        "template '{}' uses placeholder '{}' which task '{}' cannot supply",
                        task.template, name, task.artifact
                    )));
                }
            }
        }
        Ok(())
    }
}
