//! Agent loop tests
//!
//! Git is faked so the loop can be driven without a repository; the agent
//! command itself runs through a real `sh`.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Duration;
use docket::domain::{ItemId, SchedulingState};
use docket::orchestrator::{CancelToken, LoopError, Orchestrator, RunOptions, StopReason};
use docket::storage::Project;
use docket::tracker::{NewItem, Tracker};
use docket::vcs::{AuditLog, CommandOutput, CommandRunner, SystemRunner};
use tempfile::TempDir;

/// Answers git commands from in-memory state and runs everything else for real
#[derive(Default)]
struct FakeGit {
    branches: Mutex<HashSet<String>>,
    merged: Mutex<HashSet<String>>,
    fail_worktree_add: bool,
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeGit {
    fn new() -> Arc<Self> {
        Self::with(|_| {})
    }

    fn with(configure: impl FnOnce(&mut FakeGit)) -> Arc<Self> {
        let mut fake = FakeGit::default();
        fake.branches.lock().unwrap().insert("main".to_string());
        configure(&mut fake);
        Arc::new(fake)
    }

    fn git_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|argv| argv[0] == "git")
            .cloned()
            .collect()
    }

    fn git(&self, cwd: &Path, args: &[&str]) -> io::Result<CommandOutput> {
        let out = match args {
            ["symbolic-ref", ..] => CommandOutput::failed(1, ""),
            ["show-ref", "--verify", "--quiet", reference] => {
                let name = reference.trim_start_matches("refs/heads/");
                if self.branches.lock().unwrap().contains(name) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            ["rev-parse", "--abbrev-ref", "HEAD"] => CommandOutput::ok("main\n"),
            ["branch", name, _base] => {
                self.branches.lock().unwrap().insert(name.to_string());
                CommandOutput::ok("")
            }
            ["worktree", "prune"] => CommandOutput::ok(""),
            ["worktree", "add", ..] if self.fail_worktree_add => {
                CommandOutput::failed(128, "fatal: could not create work tree dir")
            }
            ["worktree", "add", path, _branch] => {
                fs::create_dir_all(path)?;
                CommandOutput::ok("")
            }
            ["worktree", "remove", "--force", path] => {
                fs::remove_dir_all(path)?;
                CommandOutput::ok("")
            }
            ["status", "--porcelain"] => {
                let dirty = fs::read_dir(cwd)?.next().is_some();
                CommandOutput::ok(if dirty { "?? prompt.out\n" } else { "" })
            }
            ["add", "-A"] | ["commit", "-m", _] => CommandOutput::ok(""),
            ["merge-base", "--is-ancestor", branch, _] => {
                if self.merged.lock().unwrap().contains(*branch) {
                    CommandOutput::ok("")
                } else {
                    CommandOutput::failed(1, "")
                }
            }
            other => panic!("unexpected git call: {other:?}"),
        };
        Ok(out)
    }
}

impl CommandRunner for FakeGit {
    fn run(&self, cwd: &Path, env: &[(&str, &str)], argv: &[&str]) -> io::Result<CommandOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(argv.iter().map(|s| s.to_string()).collect());
        match argv.split_first() {
            Some((&"git", args)) => self.git(cwd, args),
            _ => SystemRunner.run(cwd, env, argv),
        }
    }
}

struct Fixture {
    _dir: TempDir,
    project: Project,
    tracker: Tracker,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let project = Project::init(dir.path()).unwrap();
        let tracker = Tracker::for_project(&project);
        Self {
            _dir: dir,
            project,
            tracker,
        }
    }

    fn add(&self, description: &str) -> ItemId {
        self.tracker.add_item(NewItem::new(description)).unwrap().id
    }

    fn options(&self, command: &str) -> RunOptions {
        RunOptions {
            holder: "agent-1".to_string(),
            lease: Duration::minutes(30),
            poll_interval: StdDuration::ZERO,
            delay: StdDuration::ZERO,
            prompt_template: "{{ description }}".to_string(),
            command_template: command.to_string(),
            worktree_dir: self.project.worktree_dir(),
            branch_prefix: "docket/".to_string(),
            tag: None,
            max_iterations: None,
            remove_worktree: false,
            stop_when_idle: true,
            transcript_dir: Some(self.project.docket_dir().join("runs")),
        }
    }

    fn orchestrator(&self, runner: Arc<FakeGit>, options: RunOptions) -> Orchestrator {
        Orchestrator::new(
            Tracker::for_project(&self.project),
            runner,
            AuditLog::new(self.project.audit_log_path()),
            self.project.root(),
            options,
        )
    }

    fn worktree(&self, id: &ItemId) -> PathBuf {
        self.project.worktree_dir().join(id.to_string())
    }
}

#[test]
fn one_iteration_hands_item_over_for_review() {
    let fx = Fixture::new();
    let id = fx.add("Add a README\nExplain the commands.");
    let git = FakeGit::new();

    let summary = fx
        .orchestrator(git.clone(), fx.options("echo working > notes.txt"))
        .run(&CancelToken::new())
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Idle);
    assert_eq!(summary.iterations, 1);
    assert!(summary.failed.is_empty());
    let report = &summary.processed[0];
    assert_eq!(report.id, id);
    assert_eq!(report.branch, format!("docket/{id}-add-a-readme"));
    assert_eq!(report.exit_status, Some(0));
    assert!(report.committed);
    assert!(fx.worktree(&id).join("notes.txt").is_file());

    let item = fx.tracker.get(&id).unwrap();
    assert!(item.review_ready);
    assert!(!item.done);
    assert!(item.lease_until.is_none());
    assert_eq!(item.branch(), Some(report.branch.as_str()));
    assert_eq!(
        item.log.last().unwrap().message,
        "ready for review: agent exited with 0"
    );
    assert_eq!(fx.tracker.pointer().get().unwrap(), None);

    let commit = git
        .git_calls()
        .into_iter()
        .find(|argv| argv[1] == "commit")
        .unwrap();
    assert_eq!(commit[3], format!("docket: {id} Add a README"));

    let audit = fs::read_to_string(fx.project.audit_log_path()).unwrap();
    assert!(audit.contains("state: preparing"));
    assert!(audit.contains("run: sh -c"));
    assert!(audit.contains("state: terminated"));
    assert!(fx
        .project
        .docket_dir()
        .join(format!("runs/{id}.log"))
        .is_file());
}

#[test]
fn agent_exit_code_does_not_block_handover() {
    let fx = Fixture::new();
    let id = fx.add("Flaky task");

    let summary = fx
        .orchestrator(FakeGit::new(), fx.options("exit 3"))
        .run(&CancelToken::new())
        .unwrap();

    assert_eq!(summary.processed[0].exit_status, Some(3));
    assert!(!summary.processed[0].committed);
    assert!(fx.tracker.get(&id).unwrap().review_ready);
}

#[test]
fn description_reaches_agent_as_one_literal_argument() {
    let fx = Fixture::new();
    let description = "Fix \"quotes\", `ticks` and $(touch pwned) {a,b} !x";
    let id = fx.add(description);

    fx.orchestrator(
        FakeGit::new(),
        fx.options("printf '%s' {{ prompt }} > prompt.out"),
    )
    .run(&CancelToken::new())
    .unwrap();

    let worktree = fx.worktree(&id);
    let written = fs::read_to_string(worktree.join("prompt.out")).unwrap();
    assert_eq!(written, description);
    assert!(!worktree.join("pwned").exists());
}

#[test]
fn agent_sees_root_and_item_in_environment() {
    let fx = Fixture::new();
    let id = fx.add("Env check");

    fx.orchestrator(
        FakeGit::new(),
        fx.options("printf '%s %s' \"$DOCKET_ITEM\" \"$DOCKET_ROOT\" > env.out"),
    )
    .run(&CancelToken::new())
    .unwrap();

    let written = fs::read_to_string(fx.worktree(&id).join("env.out")).unwrap();
    assert_eq!(
        written,
        format!("{} {}", id, fx.project.root().to_string_lossy())
    );
}

#[test]
fn vcs_failure_releases_item_and_continues() {
    let fx = Fixture::new();
    let id = fx.add("Cannot get a worktree");
    let git = FakeGit::with(|g| g.fail_worktree_add = true);

    let mut options = fx.options("true");
    options.max_iterations = Some(2);
    let summary = fx
        .orchestrator(git, options)
        .run(&CancelToken::new())
        .unwrap();

    // The released item is picked up again on the next iteration
    assert_eq!(summary.stop_reason, StopReason::MaxIterations);
    assert_eq!(summary.iterations, 2);
    assert!(summary.processed.is_empty());
    assert_eq!(summary.failed, vec![id.clone(), id.clone()]);

    let item = fx.tracker.get(&id).unwrap();
    assert_eq!(
        item.scheduling_state(chrono::Utc::now()),
        SchedulingState::Available
    );
    assert_eq!(fx.tracker.pointer().get().unwrap(), None);
    assert!(item.log.iter().any(|e| e.kind == "released"));
}

#[test]
fn template_error_ends_loop_and_releases_item() {
    let fx = Fixture::new();
    let id = fx.add("Bad template");

    let err = fx
        .orchestrator(FakeGit::new(), fx.options("run {{ missing }}"))
        .run(&CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, LoopError::Template(_)));
    assert!(!err.is_recoverable());
    let item = fx.tracker.get(&id).unwrap();
    assert!(item.lease_until.is_none());
    assert!(!item.review_ready);
}

#[test]
fn max_iterations_caps_work_in_priority_order() {
    let fx = Fixture::new();
    let later = fx.add("Later");
    let first = fx
        .tracker
        .add_item(NewItem::new("First").priority(1))
        .unwrap()
        .id;

    let mut options = fx.options("true");
    options.max_iterations = Some(1);
    let summary = fx
        .orchestrator(FakeGit::new(), options)
        .run(&CancelToken::new())
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::MaxIterations);
    assert_eq!(summary.processed[0].id, first);
    assert!(!fx.tracker.get(&later).unwrap().review_ready);
}

#[test]
fn dependents_wait_for_done_not_review() {
    let fx = Fixture::new();
    let base = fx.add("Base");
    let dependent = fx
        .tracker
        .add_item(NewItem::new("Dependent").depends_on(base.clone()))
        .unwrap()
        .id;

    let summary = fx
        .orchestrator(FakeGit::new(), fx.options("true"))
        .run(&CancelToken::new())
        .unwrap();

    // Review-ready is not done, so the dependent stays blocked
    assert_eq!(summary.iterations, 1);
    assert_eq!(summary.processed[0].id, base);
    assert!(!fx.tracker.get(&dependent).unwrap().review_ready);
}

#[test]
fn cancelled_token_stops_before_claiming() {
    let fx = Fixture::new();
    let id = fx.add("Untouched");
    let cancel = CancelToken::new();
    cancel.cancel();

    let summary = fx
        .orchestrator(FakeGit::new(), fx.options("true"))
        .run(&cancel)
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.iterations, 0);
    assert!(fx.tracker.get(&id).unwrap().lease_until.is_none());
}

#[test]
fn stop_marker_cancels_waiting_loop() {
    let fx = Fixture::new();
    let marker = fx.project.stop_marker_path();
    fs::write(&marker, "stop\n").unwrap();

    let mut options = fx.options("true");
    options.stop_when_idle = false;
    options.poll_interval = StdDuration::from_secs(60);
    let summary = fx
        .orchestrator(FakeGit::new(), options)
        .run(&CancelToken::with_stop_marker(&marker))
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
}

#[test]
fn stop_during_agent_run_finishes_item_then_stops() {
    let fx = Fixture::new();
    let first = fx
        .tracker
        .add_item(NewItem::new("First").priority(1))
        .unwrap()
        .id;
    let second = fx.add("Second");
    let marker = fx.project.stop_marker_path();

    let mut options = fx.options("touch \"$DOCKET_ROOT/.docket/agent.stop\" && echo done > out.txt");
    options.stop_when_idle = false;
    let summary = fx
        .orchestrator(FakeGit::new(), options)
        .run(&CancelToken::with_stop_marker(&marker))
        .unwrap();

    assert_eq!(summary.stop_reason, StopReason::Cancelled);
    assert_eq!(summary.iterations, 1);
    // The agent ran to completion and its item was handed over
    assert!(fx.worktree(&first).join("out.txt").is_file());
    assert!(fx.tracker.get(&first).unwrap().review_ready);

    let second = fx.tracker.get(&second).unwrap();
    assert!(second.lease_until.is_none());
    assert!(!second.review_ready);
}

#[test]
fn remove_worktree_after_handover() {
    let fx = Fixture::new();
    let id = fx.add("Cleanup");

    let mut options = fx.options("true");
    options.remove_worktree = true;
    fx.orchestrator(FakeGit::new(), options)
        .run(&CancelToken::new())
        .unwrap();

    assert!(!fx.worktree(&id).exists());
    assert!(fx.tracker.get(&id).unwrap().review_ready);
}

#[test]
fn missing_command_template_is_reported() {
    let fx = Fixture::new();
    let err = RunOptions::from_project(&fx.project).unwrap_err();
    assert!(matches!(err, LoopError::MissingCommand));
}

#[test]
fn sweep_marks_merged_review_items_done() {
    let fx = Fixture::new();
    let merged = fx.add("Merged work");
    let pending = fx.add("Pending work");

    let git = FakeGit::new();
    let orchestrator = fx.orchestrator(git.clone(), fx.options("true"));
    orchestrator.run(&CancelToken::new()).unwrap();

    let branch = fx.tracker.get(&merged).unwrap().branch().unwrap().to_string();
    git.merged.lock().unwrap().insert(branch);

    let finalized = orchestrator.sweep_merged().unwrap();
    assert_eq!(finalized, vec![merged.clone()]);
    assert!(fx.tracker.get(&merged).unwrap().done);
    assert!(fx.tracker.get(&pending).unwrap().review_ready);
}
