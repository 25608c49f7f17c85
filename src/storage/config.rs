//! Configuration handling for docket
//!
//! Configuration is stored in `.docket/config.toml` (project) and
//! `~/.config/docket/config.toml` (global). The project root can be forced
//! with the `DOCKET_ROOT` environment variable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Duration;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{DEFAULT_LEASE_MINUTES, MAX_LEASE_MINUTES};

/// Environment variable naming the project root
pub const ROOT_ENV: &str = "DOCKET_ROOT";

/// Environment variable naming the lease holder
pub const AGENT_ENV: &str = "DOCKET_AGENT";

pub const DEFAULT_PROMPT_TEMPLATE: &str = "You are working on item {{id}}: {{title}}

{{description}}

Your working copy is {{worktree}} on branch {{branch}}. Commit nothing outside it.
";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Lease holder settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Holder name (defaults to $DOCKET_AGENT, then $USER)
    pub name: Option<String>,

    /// Lease length for claims, in minutes
    pub lease_minutes: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: None,
            lease_minutes: DEFAULT_LEASE_MINUTES,
        }
    }
}

impl AgentConfig {
    /// Gets the effective holder name from config, environment, or defaults
    pub fn effective_name(&self) -> String {
        pick_name([
            self.name.clone(),
            std::env::var(AGENT_ENV).ok(),
            std::env::var("USER").ok(),
        ])
    }

    /// Lease length; out-of-range values fall back to the default.
    /// [`ProjectConfig::validate`] rejects those before they get here.
    pub fn lease(&self) -> Duration {
        Duration::try_minutes(self.lease_minutes)
            .unwrap_or_else(|| Duration::minutes(DEFAULT_LEASE_MINUTES))
    }
}

/// First candidate that is set and not blank
fn pick_name<const N: usize>(candidates: [Option<String>; N]) -> String {
    candidates
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Settings for `docket agent run`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Seconds to wait before polling an empty queue again
    pub poll_interval_secs: u64,

    /// Seconds to pause between iterations
    pub delay_secs: u64,

    /// Prompt template (fields: id, title, description, worktree, branch)
    pub prompt_template: String,

    /// Shell command template (fields: prompt, id, worktree, branch)
    pub command_template: Option<String>,

    /// Where worktrees are created, relative to the project root
    pub worktree_dir: PathBuf,

    /// Prefix for synthesized branch names
    pub branch_prefix: String,

    /// Only pick items carrying this tag
    pub tag: Option<String>,

    /// Stop after this many iterations (0 or absent means no limit)
    pub max_iterations: Option<u64>,

    /// Remove each worktree after finalizing
    pub remove_worktree: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 30,
            delay_secs: 5,
            prompt_template: DEFAULT_PROMPT_TEMPLATE.to_string(),
            command_template: None,
            worktree_dir: PathBuf::from(".docket/worktrees"),
            branch_prefix: "docket/".to_string(),
            tag: None,
            max_iterations: None,
            remove_worktree: false,
        }
    }
}

/// Project-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ProjectConfig {
    pub agent: AgentConfig,
    pub orchestrator: OrchestratorConfig,
}

impl ProjectConfig {
    /// Rejects values that parse but cannot be used
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.lease_minutes <= 0 {
            return Err(ConfigError::Invalid(format!(
                "agent.lease_minutes must be positive, got {}",
                self.agent.lease_minutes
            )));
        }
        if self.agent.lease_minutes > MAX_LEASE_MINUTES {
            return Err(ConfigError::Invalid(format!(
                "agent.lease_minutes must be at most {MAX_LEASE_MINUTES}, got {}",
                self.agent.lease_minutes
            )));
        }
        if self.orchestrator.branch_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "orchestrator.branch_prefix must not contain whitespace".to_string(),
            ));
        }
        Ok(())
    }
}

/// Global user configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct GlobalConfig {
    /// Default output format (text or json)
    pub default_format: OutputFormat,
}

/// Output format for commands
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Combined configuration (global + project)
#[derive(Debug, Clone)]
pub struct Config {
    pub project: ProjectConfig,
    pub global: GlobalConfig,
    pub project_root: Option<PathBuf>,
}

impl Config {
    /// Loads configuration from default locations
    pub fn load() -> Result<Self> {
        let global = Self::load_global()?;
        let project_root = Self::find_project_root();
        let project = match &project_root {
            Some(root) => Self::load_project_config(root)?,
            None => ProjectConfig::default(),
        };

        Ok(Self {
            project,
            global,
            project_root,
        })
    }

    /// Loads configuration for a specific project
    pub fn for_project(project_root: &Path) -> Result<Self> {
        let global = Self::load_global()?;
        let project = Self::load_project_config(project_root)?;

        Ok(Self {
            project,
            global,
            project_root: Some(project_root.to_path_buf()),
        })
    }

    /// Returns the global config directory
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("dev", "docket", "docket").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Loads global configuration
    fn load_global() -> Result<GlobalConfig> {
        let config_dir = match Self::global_config_dir() {
            Some(dir) => dir,
            None => return Ok(GlobalConfig::default()),
        };

        let config_path = config_dir.join("config.toml");
        if !config_path.exists() {
            return Ok(GlobalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read global config: {}", config_path.display()))?;

        toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse global config")
    }

    /// Loads project configuration from a specific root
    fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
        let config_path = project_root.join(".docket").join("config.toml");

        if !config_path.exists() {
            return Ok(ProjectConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read project config: {}", config_path.display()))?;

        let config: ProjectConfig = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .context("Failed to parse project config")?;
        config.validate()?;
        Ok(config)
    }

    /// Finds the project root: `$DOCKET_ROOT` if set, else the nearest
    /// ancestor of the current directory containing `.docket/`
    pub fn find_project_root() -> Option<PathBuf> {
        if let Some(root) = std::env::var_os(ROOT_ENV).filter(|v| !v.is_empty()) {
            return Some(PathBuf::from(root));
        }
        let current = std::env::current_dir().ok()?;
        Self::find_project_root_from(&current)
    }

    /// Walks up from `start` looking for `.docket/`
    pub fn find_project_root_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            if current.join(".docket").is_dir() {
                return Some(current);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Returns true if we're in a docket project
    pub fn is_in_project(&self) -> bool {
        self.project_root.is_some()
    }

    /// Returns the project root, or an error if not in a project
    pub fn require_project_root(&self) -> Result<&Path> {
        self.project_root
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("Not in a docket project. Run 'docket init' first."))
    }
}
