//! Tool settings for labflow.
//!
//! Configuration sources (highest priority first):
//! 1. Command-line flags (`--output`, `--project`)
//! 2. Environment variables (LABFLOW_OUTPUT, LABFLOW_PROJECT, OPENAI_API_BASE,
//!    OPENAI_API_KEY, LABFLOW_MODEL)
//! 3. Config file (.labflow/config.yaml, then the user config dir)
//! 4. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .labflow/config.yaml
//! - Falls back to <config_dir>/labflow/config.yaml
//! - Paths in a project config file are relative to the directory holding `.labflow/`;
//!   in any other config file they are relative to the file's own directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::adapters::openai::OpenAiSettings;

/// Global cached settings (stores Result to handle init errors)
static SETTINGS: OnceLock<Result<Settings, String>> = OnceLock::new();

const DEFAULT_TASK_TIMEOUT_SECONDS: u64 = 600;

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub backend: Option<BackendConfig>,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Artifact output root
    pub output: Option<String>,
    /// Project YAML file
    pub project: Option<String>,
    /// Prompt template YAML (built-in templates when unset)
    pub templates: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimeoutsConfig {
    pub task_timeout_seconds: Option<u64>,
    /// No timeout when unset: the gate blocks until the operator answers
    pub approval_timeout_seconds: Option<u64>,
}

/// Which agent backend to use
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    Openai(OpenAiSettings),
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Openai(OpenAiSettings::default())
    }
}

/// Resolved settings with absolute paths
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub project_file: PathBuf,
    pub templates_file: Option<PathBuf>,
    pub backend: BackendConfig,
    pub task_timeout: Duration,
    pub approval_timeout: Option<Duration>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Settings {
    /// Settings with defaults rooted at `base`
    pub fn defaults_in(base: &Path) -> Self {
        Self {
            output_dir: base.join("output"),
            project_file: base.join("project_config.yaml"),
            templates_file: None,
            backend: BackendConfig::default(),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECONDS),
            approval_timeout: None,
            config_file: None,
        }
    }

    /// Directory for logs and the event trail
    pub fn logs_dir(&self) -> PathBuf {
        self.output_dir.join("logs")
    }

    fn apply_file(&mut self, config: ConfigFile, base: &Path) {
        if let Some(ref output) = config.paths.output {
            self.output_dir = resolve_path(base, output);
        }
        if let Some(ref project) = config.paths.project {
            self.project_file = resolve_path(base, project);
        }
        if let Some(ref templates) = config.paths.templates {
            self.templates_file = Some(resolve_path(base, templates));
        }
        if let Some(backend) = config.backend {
            self.backend = backend;
        }
        if let Some(seconds) = config.timeouts.task_timeout_seconds {
            self.task_timeout = Duration::from_secs(seconds);
        }
        self.approval_timeout = config
            .timeouts
            .approval_timeout_seconds
            .map(Duration::from_secs);
    }

    /// Apply environment overrides using `get` as the variable lookup
    fn apply_env<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(output) = get("LABFLOW_OUTPUT") {
            self.output_dir = PathBuf::from(output);
        }
        if let Some(project) = get("LABFLOW_PROJECT") {
            self.project_file = PathBuf::from(project);
        }

        if let BackendConfig::Openai(ref mut openai) = self.backend {
            if let Some(base_url) = get("OPENAI_API_BASE") {
                openai.base_url = base_url;
            }
            if let Some(api_key) = get("OPENAI_API_KEY") {
                openai.api_key = Some(api_key);
            }
            if let Some(model) = get("LABFLOW_MODEL") {
                openai.model = model;
            }
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".labflow").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let user_config = dirs::config_dir()?.join("labflow").join("config.yaml");
    user_config.exists().then_some(user_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to `base`
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Directory relative config paths are resolved against: the project root for
/// `<root>/.labflow/config.yaml`, otherwise the directory holding the file
fn config_base_dir(path: &Path) -> &Path {
    let parent = path.parent().unwrap_or(Path::new("."));
    if parent.file_name().is_some_and(|name| name == ".labflow") {
        parent.parent().unwrap_or(Path::new("."))
    } else {
        parent
    }
}

/// Load settings from an explicit config file (or none) plus the environment
pub fn load_settings_from(config_path: Option<&Path>) -> Result<Settings> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;
    let mut settings = Settings::defaults_in(&cwd);

    if let Some(path) = config_path {
        let config = load_config_file(path)?;

        settings.apply_file(config, config_base_dir(path));
        settings.config_file = Some(path.to_path_buf());
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

/// Load settings from all sources
fn load_settings() -> Result<Settings> {
    let config_file = find_config_file();
    load_settings_from(config_file.as_deref())
}

/// Get the global settings (loads once, then cached)
pub fn settings() -> Result<&'static Settings> {
    let result = SETTINGS.get_or_init(|| load_settings().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(settings) => Ok(settings),
        Err(e) => anyhow::bail!("{}", e),
    }
}
