//! Project management
//!
//! Handles project initialization and provides access to stores.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use thiserror::Error;

use super::{Config, CurrentPointer, ItemStore};

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("Not in a docket project. Run 'docket init' first.")]
    NotInProject,
}

const DEFAULT_CONFIG: &str = r#"# docket configuration

[agent]
# Lease holder name (defaults to $DOCKET_AGENT, then $USER)
# name = "builder"
lease_minutes = 60

[orchestrator]
poll_interval_secs = 30
delay_secs = 5
worktree_dir = ".docket/worktrees"
branch_prefix = "docket/"
remove_worktree = false
# Only pick items carrying this tag
# tag = "agent"
# Stop after this many iterations
# max_iterations = 10
# Shell command run in each worktree. Fields: {{prompt}} {{id}} {{worktree}} {{branch}}
# command_template = "my-agent --prompt {{prompt}}"
"#;

const GITIGNORE: &str = r#"# Lock files are recreated on demand
locks/

# Runtime state of the agent loop
current
agent.log
agent.stop
runs/
worktrees/
"#;

/// A docket project
#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    config: Config,
}

impl Project {
    /// Opens an existing project at the given path
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.join(".docket").is_dir() {
            return Err(ProjectError::NotInProject.into());
        }

        let config = Config::for_project(&root)?;

        Ok(Self { root, config })
    }

    /// Opens the project named by `$DOCKET_ROOT`, or the one containing the
    /// current directory
    pub fn open_current() -> Result<Self> {
        let root = Config::find_project_root().ok_or(ProjectError::NotInProject)?;

        Self::open(root)
    }

    /// Initializes a new project at the given path. Existing files are kept.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let docket_dir = root.join(".docket");

        let items_dir = docket_dir.join("items");
        fs::create_dir_all(&items_dir).with_context(|| {
            format!("Failed to create items directory: {}", items_dir.display())
        })?;

        let config_path = docket_dir.join("config.toml");
        if !config_path.exists() {
            fs::write(&config_path, DEFAULT_CONFIG)
                .with_context(|| format!("Failed to write config: {}", config_path.display()))?;
        }

        let gitignore_path = docket_dir.join(".gitignore");
        if !gitignore_path.exists() {
            fs::write(&gitignore_path, GITIGNORE).with_context(|| {
                format!("Failed to write .gitignore: {}", gitignore_path.display())
            })?;
        }

        Self::open(root)
    }

    /// Returns the project root path
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the .docket directory path
    pub fn docket_dir(&self) -> PathBuf {
        self.root.join(".docket")
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn item_store(&self) -> ItemStore {
        ItemStore::for_project(&self.root)
    }

    pub fn current_pointer(&self) -> CurrentPointer {
        CurrentPointer::for_project(&self.root)
    }

    /// Audit log written by the agent loop
    pub fn audit_log_path(&self) -> PathBuf {
        self.docket_dir().join("agent.log")
    }

    /// Presence of this file asks running loops to stop
    pub fn stop_marker_path(&self) -> PathBuf {
        self.docket_dir().join("agent.stop")
    }

    /// Base directory for worktrees, resolved against the root
    pub fn worktree_dir(&self) -> PathBuf {
        self.root.join(&self.config.project.orchestrator.worktree_dir)
    }
}
