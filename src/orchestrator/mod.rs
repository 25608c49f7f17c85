//! The agent loop
//!
//! Repeatedly claims the next eligible item, prepares a worktree and branch
//! for it, runs the configured agent command there, commits whatever the
//! agent left behind and hands the item over for review.
//!
//! ```text
//! Idle -> Claiming -> Preparing -> Running -> Finalizing -> Idle | Terminated
//!            |
//!            +-> Waiting (empty queue, poll interval) -> Claiming
//! ```
//!
//! Each iteration is sequential. Several loops may run at once against the
//! same project: claims are locked read-modify-writes, so each item goes to
//! at most one of them.

mod branch;
mod cancel;
mod shell;
mod template;

pub use branch::{branch_name, slugify};
pub use cancel::CancelToken;
pub use shell::escape;
pub use template::{render, render_shell, TemplateError};

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{ItemId, Status, StatusOptions, WorkItem};
use crate::storage::{Project, StoreError, ROOT_ENV};
use crate::tracker::{Tracker, TrackerError};
use crate::vcs::{AuditLog, CommandRunner, VcsError, WorktreeManager};

/// Environment variable carrying the item id into the agent command
pub const ITEM_ENV: &str = "DOCKET_ITEM";

#[derive(Debug, Error)]
pub enum LoopError {
    #[error("No command template configured (set orchestrator.command_template or pass --command)")]
    MissingCommand,

    #[error(transparent)]
    Vcs(#[from] VcsError),

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Failed to start agent command: {0}")]
    Process(#[source] io::Error),
}

impl From<StoreError> for LoopError {
    fn from(err: StoreError) -> Self {
        LoopError::Tracker(err.into())
    }
}

impl LoopError {
    /// VCS failures end the iteration but not the loop
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LoopError::Vcs(_))
    }
}

/// Where an iteration is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Claiming,
    Waiting,
    Preparing,
    Running,
    Finalizing,
    Terminated,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LoopState::Idle => "idle",
            LoopState::Claiming => "claiming",
            LoopState::Waiting => "waiting",
            LoopState::Preparing => "preparing",
            LoopState::Running => "running",
            LoopState::Finalizing => "finalizing",
            LoopState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Cancelled,
    MaxIterations,
    /// Queue empty and `stop_when_idle` set
    Idle,
}

/// Outcome of one successful iteration
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub id: ItemId,
    pub branch: String,
    pub worktree: PathBuf,
    /// Agent exit code; informational only
    pub exit_status: Option<i32>,
    pub committed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopSummary {
    /// Iterations that claimed an item, successful or not
    pub iterations: u64,
    pub processed: Vec<IterationReport>,
    /// Items whose iteration ended in a recoverable failure
    pub failed: Vec<ItemId>,
    pub stop_reason: StopReason,
}

/// Settings for one loop
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub holder: String,
    pub lease: Duration,
    pub poll_interval: StdDuration,
    pub delay: StdDuration,
    pub prompt_template: String,
    pub command_template: String,
    /// Absolute base directory; each item gets `{worktree_dir}/{id}`
    pub worktree_dir: PathBuf,
    pub branch_prefix: String,
    pub tag: Option<String>,
    pub max_iterations: Option<u64>,
    pub remove_worktree: bool,
    /// Return instead of waiting when nothing is available
    pub stop_when_idle: bool,
    /// Agent stdout/stderr are appended to `{dir}/{id}.log`
    pub transcript_dir: Option<PathBuf>,
}

impl RunOptions {
    /// Options from the project's configuration
    pub fn from_project(project: &Project) -> Result<Self, LoopError> {
        let config = &project.config().project;
        let orchestrator = &config.orchestrator;
        let command_template = orchestrator
            .command_template
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or(LoopError::MissingCommand)?;

        Ok(Self {
            holder: config.agent.effective_name(),
            lease: config.agent.lease(),
            poll_interval: StdDuration::from_secs(orchestrator.poll_interval_secs),
            delay: StdDuration::from_secs(orchestrator.delay_secs),
            prompt_template: orchestrator.prompt_template.clone(),
            command_template,
            worktree_dir: project.worktree_dir(),
            branch_prefix: orchestrator.branch_prefix.clone(),
            tag: orchestrator.tag.clone(),
            max_iterations: orchestrator.max_iterations.filter(|&n| n > 0),
            remove_worktree: orchestrator.remove_worktree,
            stop_when_idle: false,
            transcript_dir: Some(project.docket_dir().join("runs")),
        })
    }

    fn limit_reached(&self, iterations: u64) -> bool {
        self.max_iterations.is_some_and(|max| iterations >= max)
    }
}

pub struct Orchestrator {
    tracker: Tracker,
    worktrees: WorktreeManager,
    runner: Arc<dyn CommandRunner>,
    audit: AuditLog,
    repo_root: PathBuf,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(
        tracker: Tracker,
        runner: Arc<dyn CommandRunner>,
        audit: AuditLog,
        repo_root: impl Into<PathBuf>,
        options: RunOptions,
    ) -> Self {
        Self {
            worktrees: WorktreeManager::new(Arc::clone(&runner), audit.clone()),
            tracker,
            runner,
            audit,
            repo_root: repo_root.into(),
            options,
        }
    }

    /// Loop over `project`, auditing to `.docket/agent.log`
    pub fn for_project(project: &Project, runner: Arc<dyn CommandRunner>, options: RunOptions) -> Self {
        Self::new(
            Tracker::for_project(project),
            runner,
            AuditLog::new(project.audit_log_path()),
            project.root(),
            options,
        )
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    fn enter(&self, state: LoopState) {
        self.audit.record(format!("state: {state}"));
    }

    /// Runs until cancelled, the iteration cap is hit, or a fatal error.
    ///
    /// Recoverable (VCS) failures release the item and move on. Any other
    /// error also releases the item, best-effort, then ends the loop.
    pub fn run(&self, cancel: &CancelToken) -> Result<LoopSummary, LoopError> {
        let mut iterations = 0;
        let mut processed = Vec::new();
        let mut failed = Vec::new();
        self.enter(LoopState::Idle);
        info!(holder = %self.options.holder, "agent loop started");

        let stop_reason = loop {
            if cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.options.limit_reached(iterations) {
                break StopReason::MaxIterations;
            }

            self.enter(LoopState::Claiming);
            let claimed = self.tracker.claim_next(
                self.options.tag.as_deref(),
                &self.options.holder,
                self.options.lease,
                Utc::now(),
            )?;
            let Some(item) = claimed else {
                if self.options.stop_when_idle {
                    break StopReason::Idle;
                }
                self.enter(LoopState::Waiting);
                if cancel.wait(self.options.poll_interval) {
                    break StopReason::Cancelled;
                }
                continue;
            };

            iterations += 1;
            info!(item = %item.id, title = item.title(), "claimed item");
            self.audit.record(format!("claimed: {}", item.id));

            match self.process(&item) {
                Ok(report) => processed.push(report),
                Err(err) => {
                    self.release_after_failure(&item.id);
                    if !err.is_recoverable() {
                        self.enter(LoopState::Terminated);
                        return Err(err);
                    }
                    warn!(item = %item.id, error = %err, "iteration failed");
                    self.audit.record(format!("failed: {}: {err}", item.id));
                    failed.push(item.id.clone());
                }
            }
            self.enter(LoopState::Idle);

            if self.options.limit_reached(iterations) {
                break StopReason::MaxIterations;
            }
            if cancel.wait(self.options.delay) {
                break StopReason::Cancelled;
            }
        };

        self.enter(LoopState::Terminated);
        info!(iterations, reason = ?stop_reason, "agent loop stopped");
        Ok(LoopSummary {
            iterations,
            processed,
            failed,
            stop_reason,
        })
    }

    fn process(&self, item: &WorkItem) -> Result<IterationReport, LoopError> {
        let id = &item.id;

        self.enter(LoopState::Preparing);
        let branch = branch_name(item, &self.options.branch_prefix);
        let path = self.options.worktree_dir.join(id.to_string());
        let worktree = self
            .worktrees
            .ensure_worktree(&self.repo_root, &path, &branch, true)?;
        self.tracker.set_note(id, "branch", &branch)?;

        self.enter(LoopState::Running);
        let worktree_str = worktree.to_string_lossy();
        let id_str = id.to_string();
        let prompt = render(
            &self.options.prompt_template,
            &[
                ("id", id_str.as_str()),
                ("title", item.title()),
                ("description", item.description.as_str()),
                ("worktree", &*worktree_str),
                ("branch", branch.as_str()),
            ],
        )?;
        let command = render_shell(
            &self.options.command_template,
            &[
                ("prompt", prompt.as_str()),
                ("id", id_str.as_str()),
                ("worktree", &*worktree_str),
                ("branch", branch.as_str()),
            ],
        )?;

        let root = self.repo_root.to_string_lossy();
        self.audit.record(format!("run: sh -c {}", escape(&command)));
        let output = self
            .runner
            .run(
                &worktree,
                &[(ROOT_ENV, &*root), (ITEM_ENV, id_str.as_str())],
                &["sh", "-c", command.as_str()],
            )
            .map_err(LoopError::Process)?;
        let exit = output
            .status
            .map_or_else(|| "signal".to_string(), |code| code.to_string());
        self.audit.record(format!("exit: {exit} (agent for {id})"));
        info!(item = %id, exit = %exit, "agent command finished");
        self.write_transcript(id, &output.stdout, &output.stderr);

        self.enter(LoopState::Finalizing);
        let message = format!("docket: {id} {}", item.title());
        let committed = self.worktrees.commit_all(&worktree, &message)?;
        let opts = StatusOptions {
            message: Some(format!("agent exited with {exit}")),
            ..StatusOptions::default()
        };
        self.tracker.set_status(id, Status::Review, &opts)?;
        self.tracker.pointer().clear_if(id)?;

        if self.options.remove_worktree {
            if let Err(e) = self.worktrees.remove_worktree(&self.repo_root, &worktree) {
                warn!(item = %id, error = %e, "failed to remove worktree");
                self.audit.record(format!("remove failed: {}: {e}", worktree.display()));
            }
        }

        Ok(IterationReport {
            id: id.clone(),
            branch,
            worktree,
            exit_status: output.status,
            committed,
        })
    }

    /// Best-effort: errors are logged, never returned
    fn release_after_failure(&self, id: &ItemId) {
        match self.tracker.release(id) {
            Ok(_) => self.audit.record(format!("released: {id}")),
            Err(e) => warn!(item = %id, error = %e, "failed to release lease"),
        }
        if let Err(e) = self.tracker.pointer().clear_if(id) {
            warn!(item = %id, error = %e, "failed to clear current pointer");
        }
    }

    fn write_transcript(&self, id: &ItemId, stdout: &str, stderr: &str) {
        let Some(dir) = &self.options.transcript_dir else {
            return;
        };
        let path = dir.join(format!("{id}.log"));
        let result = fs::create_dir_all(dir).and_then(|_| {
            let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
            writeln!(file, "=== {} stdout ===", Utc::now().to_rfc3339())?;
            file.write_all(stdout.as_bytes())?;
            writeln!(file, "\n=== stderr ===")?;
            file.write_all(stderr.as_bytes())?;
            writeln!(file)
        });
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write transcript");
        }
    }

    /// Finalizes review-ready items whose branch is merged into the default branch
    pub fn sweep_merged(&self) -> Result<Vec<ItemId>, LoopError> {
        sweep_merged(&self.tracker, &self.worktrees, &self.repo_root)
    }
}

/// Marks review-ready items done once their recorded branch is an ancestor
/// of the repository's default branch. Branches git cannot resolve are
/// skipped with a warning.
pub fn sweep_merged(
    tracker: &Tracker,
    worktrees: &WorktreeManager,
    repo_root: &Path,
) -> Result<Vec<ItemId>, LoopError> {
    let default_branch = worktrees.detect_default_branch(repo_root)?;
    let finalized = tracker.sweep_merged(|item, branch| {
        match worktrees.branch_merged_into(repo_root, branch, &default_branch) {
            Ok(merged) => merged,
            Err(e) => {
                warn!(item = %item.id, branch, error = %e, "could not check merge state");
                false
            }
        }
    })?;
    for id in &finalized {
        info!(item = %id, "merged; marked done");
    }
    Ok(finalized)
}
