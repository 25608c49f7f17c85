//! Git worktrees for isolated per-item work
//!
//! Each item gets its own branch and working copy so several items can be
//! worked on side by side. All git invocations go through the injected
//! [`CommandRunner`] and are recorded in the [`AuditLog`].

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, instrument};

use super::audit::AuditLog;
use super::runner::{display_command, CommandOutput, CommandRunner};

#[derive(Debug, Error)]
pub enum VcsError {
    #[error("Failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("Could not determine the default branch of {}", .0.display())]
    NoDefaultBranch(PathBuf),

    #[error("Worktree {} is on branch {found}, expected {expected}", path.display())]
    BranchMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("{} exists and is not a worktree", .0.display())]
    NotAWorktree(PathBuf),

    #[error("Failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Git operations used by the agent loop
#[derive(Clone)]
pub struct WorktreeManager {
    runner: Arc<dyn CommandRunner>,
    audit: AuditLog,
}

impl std::fmt::Debug for WorktreeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeManager")
            .field("audit", &self.audit)
            .finish_non_exhaustive()
    }
}

impl WorktreeManager {
    pub fn new(runner: Arc<dyn CommandRunner>, audit: AuditLog) -> Self {
        Self { runner, audit }
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Runs `git args` in `cwd` without checking the exit status
    fn git(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push("git");
        argv.extend_from_slice(args);
        let command = display_command(&argv);

        self.audit
            .record(format!("run: {command} (cwd {})", cwd.display()));
        let output = self
            .runner
            .run(cwd, &[], &argv)
            .map_err(|source| {
                self.audit.record(format!("spawn failed: {command}: {source}"));
                VcsError::Spawn {
                    command: command.clone(),
                    source,
                }
            })?;
        self.audit.record(format!(
            "exit: {} ({command})",
            output.status.map_or_else(|| "signal".to_string(), |c| c.to_string())
        ));
        Ok(output)
    }

    /// Runs `git args` and fails on a non-zero exit
    fn git_checked(&self, cwd: &Path, args: &[&str]) -> Result<CommandOutput, VcsError> {
        let output = self.git(cwd, args)?;
        if !output.success() {
            let mut argv = vec!["git"];
            argv.extend_from_slice(args);
            return Err(VcsError::Failed {
                command: display_command(&argv),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }

    /// True if `refs/heads/{branch}` exists
    pub fn branch_exists(&self, repo: &Path, branch: &str) -> Result<bool, VcsError> {
        let reference = format!("refs/heads/{branch}");
        Ok(self
            .git(repo, &["show-ref", "--verify", "--quiet", &reference])?
            .success())
    }

    /// Branch checked out at `path`
    pub fn current_branch(&self, path: &Path) -> Result<String, VcsError> {
        let out = self.git_checked(path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        Ok(out.stdout.trim().to_string())
    }

    /// The repository's primary branch.
    ///
    /// Tries the remote's HEAD, then local `main`, then `master`, then the
    /// branch currently checked out.
    #[instrument(skip(self))]
    pub fn detect_default_branch(&self, repo: &Path) -> Result<String, VcsError> {
        let remote_head = self.git(
            repo,
            &["symbolic-ref", "--quiet", "--short", "refs/remotes/origin/HEAD"],
        )?;
        if remote_head.success() {
            let name = remote_head.stdout.trim();
            let name = name.strip_prefix("origin/").unwrap_or(name);
            if !name.is_empty() {
                debug!(branch = name, "default branch from origin/HEAD");
                return Ok(name.to_string());
            }
        }

        for candidate in ["main", "master"] {
            if self.branch_exists(repo, candidate)? {
                return Ok(candidate.to_string());
            }
        }

        match self.current_branch(repo) {
            Ok(branch) if branch != "HEAD" && !branch.is_empty() => Ok(branch),
            _ => Err(VcsError::NoDefaultBranch(repo.to_path_buf())),
        }
    }

    /// Makes sure a worktree for `branch` exists at `path` and returns it.
    ///
    /// With `create_branch`, the branch is first created from the default
    /// branch; an existing branch is reused. A worktree already at `path` on
    /// `branch` is reused as is, so an interrupted run can resume.
    #[instrument(skip(self))]
    pub fn ensure_worktree(
        &self,
        repo: &Path,
        path: &Path,
        branch: &str,
        create_branch: bool,
    ) -> Result<PathBuf, VcsError> {
        if path.join(".git").exists() {
            let found = self.current_branch(path)?;
            if found == branch {
                info!(path = %path.display(), branch, "reusing worktree");
                return Ok(path.to_path_buf());
            }
            return Err(VcsError::BranchMismatch {
                path: path.to_path_buf(),
                expected: branch.to_string(),
                found,
            });
        }
        let occupied = fs::read_dir(path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
        if occupied {
            return Err(VcsError::NotAWorktree(path.to_path_buf()));
        }

        if create_branch && !self.branch_exists(repo, branch)? {
            let base = self.detect_default_branch(repo)?;
            let created = self.git(repo, &["branch", branch, &base])?;
            if created.success() {
                info!(branch, base = %base, "created branch");
            } else if created.stderr.contains("already exists") {
                debug!(branch, "branch appeared concurrently, reusing");
            } else {
                return Err(VcsError::Failed {
                    command: display_command(&["git", "branch", branch, &base]),
                    status: created.status,
                    stderr: created.stderr.trim().to_string(),
                });
            }
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| VcsError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        // Forget registrations whose directories were deleted by hand
        self.git_checked(repo, &["worktree", "prune"])?;

        let path_arg = path.to_string_lossy();
        self.git_checked(repo, &["worktree", "add", &path_arg, branch])?;
        info!(path = %path.display(), branch, "created worktree");
        Ok(path.to_path_buf())
    }

    pub fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<(), VcsError> {
        let path_arg = path.to_string_lossy();
        self.git_checked(repo, &["worktree", "remove", "--force", &path_arg])?;
        info!(path = %path.display(), "removed worktree");
        Ok(())
    }

    /// True if `branch` is an ancestor of `reference`
    pub fn branch_merged_into(
        &self,
        repo: &Path,
        branch: &str,
        reference: &str,
    ) -> Result<bool, VcsError> {
        let args = ["merge-base", "--is-ancestor", branch, reference];
        let output = self.git(repo, &args)?;
        match output.status {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            status => {
                let mut argv = vec!["git"];
                argv.extend_from_slice(&args);
                Err(VcsError::Failed {
                    command: display_command(&argv),
                    status,
                    stderr: output.stderr.trim().to_string(),
                })
            }
        }
    }

    /// True if the working copy has staged, unstaged or untracked changes
    pub fn has_changes(&self, path: &Path) -> Result<bool, VcsError> {
        let out = self.git_checked(path, &["status", "--porcelain"])?;
        Ok(!out.stdout.trim().is_empty())
    }

    /// Stages everything and commits. Returns false if there was nothing to commit.
    pub fn commit_all(&self, path: &Path, message: &str) -> Result<bool, VcsError> {
        if !self.has_changes(path)? {
            return Ok(false);
        }
        self.git_checked(path, &["add", "-A"])?;
        self.git_checked(path, &["commit", "-m", message])?;
        info!(path = %path.display(), "committed changes");
        Ok(true)
    }
}
