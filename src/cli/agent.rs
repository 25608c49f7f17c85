//! Agent loop commands
//!
//! `docket agent run` drives [`Orchestrator`] until it is stopped, either
//! by the iteration cap, by an empty queue with `--until-empty`, or by
//! `docket agent stop` from another terminal.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::output::Output;
use crate::orchestrator::{self, CancelToken, Orchestrator, RunOptions};
use crate::storage::Project;
use crate::tracker::Tracker;
use crate::vcs::{AuditLog, SystemRunner, WorktreeManager};

#[derive(Subcommand)]
pub enum AgentCommands {
    /// Claim, work and hand over items until stopped
    Run {
        /// Shell command template (fields: prompt, id, worktree, branch)
        #[arg(long)]
        command: Option<String>,

        /// Prompt template (fields: id, title, description, worktree, branch)
        #[arg(long)]
        prompt: Option<String>,

        /// Only pick items carrying this tag
        #[arg(long)]
        tag: Option<String>,

        /// Stop after this many iterations
        #[arg(long, short = 'n')]
        max_iterations: Option<u64>,

        /// Seconds between polls of an empty queue
        #[arg(long)]
        poll_interval: Option<u64>,

        /// Seconds between iterations
        #[arg(long)]
        delay: Option<u64>,

        #[arg(long)]
        lease_minutes: Option<i64>,

        /// Lease holder name
        #[arg(long)]
        holder: Option<String>,

        /// Remove each worktree once the item is handed over
        #[arg(long)]
        remove_worktree: bool,

        /// Exit when nothing is available instead of polling
        #[arg(long)]
        until_empty: bool,
    },

    /// Ask running loops in this project to stop after their current item
    Stop,

    /// Mark review items done once their branch is merged
    Sweep,
}

pub fn run(cmd: AgentCommands, output: &Output) -> Result<()> {
    match cmd {
        AgentCommands::Run {
            command,
            prompt,
            tag,
            max_iterations,
            poll_interval,
            delay,
            lease_minutes,
            holder,
            remove_worktree,
            until_empty,
        } => {
            let mut project = Project::open_current()?;
            {
                let config = &mut project.config_mut().project;
                let o = &mut config.orchestrator;
                if command.is_some() {
                    o.command_template = command;
                }
                if let Some(prompt) = prompt {
                    o.prompt_template = prompt;
                }
                if tag.is_some() {
                    o.tag = tag;
                }
                if max_iterations.is_some() {
                    o.max_iterations = max_iterations;
                }
                if let Some(secs) = poll_interval {
                    o.poll_interval_secs = secs;
                }
                if let Some(secs) = delay {
                    o.delay_secs = secs;
                }
                o.remove_worktree |= remove_worktree;
                if let Some(minutes) = lease_minutes {
                    config.agent.lease_minutes = minutes;
                }
                if holder.is_some() {
                    config.agent.name = holder;
                }
                config.validate()?;
            }
            run_loop(&project, until_empty, output)
        }
        AgentCommands::Stop => stop(output),
        AgentCommands::Sweep => sweep(output),
    }
}

fn run_loop(project: &Project, until_empty: bool, output: &Output) -> Result<()> {
    let mut options = RunOptions::from_project(project)?;
    options.stop_when_idle = until_empty;

    let marker = project.stop_marker_path();
    if marker.exists() {
        fs::remove_file(&marker)
            .with_context(|| format!("Failed to clear stale stop marker: {}", marker.display()))?;
    }
    let cancel = CancelToken::with_stop_marker(&marker);

    if !output.is_json() {
        output.success(&format!(
            "Agent loop started as {} (audit log: {})",
            options.holder,
            project.audit_log_path().display()
        ));
    }

    let orchestrator = Orchestrator::for_project(project, Arc::new(SystemRunner), options);
    let summary = orchestrator.run(&cancel)?;

    if output.is_json() {
        output.data(&summary);
        return Ok(());
    }
    for report in &summary.processed {
        let exit = report
            .exit_status
            .map_or_else(|| "signal".to_string(), |c| c.to_string());
        output.success(&format!(
            "{} ready for review on {} (exit {}, {})",
            report.id,
            report.branch,
            exit,
            if report.committed { "committed" } else { "no changes" }
        ));
    }
    for id in &summary.failed {
        output.warn(&format!("{id} failed and was released"));
    }
    output.success(&format!(
        "Stopped ({:?}) after {} iteration(s)",
        summary.stop_reason, summary.iterations
    ));
    Ok(())
}

fn stop(output: &Output) -> Result<()> {
    let project = Project::open_current()?;
    let marker = project.stop_marker_path();
    fs::write(&marker, "stop\n")
        .with_context(|| format!("Failed to write stop marker: {}", marker.display()))?;
    output.success("Stop requested; running loops exit after their current item");
    Ok(())
}

fn sweep(output: &Output) -> Result<()> {
    let project = Project::open_current()?;
    let tracker = Tracker::for_project(&project);
    let worktrees = WorktreeManager::new(
        Arc::new(SystemRunner),
        AuditLog::new(project.audit_log_path()),
    );

    let finalized = orchestrator::sweep_merged(&tracker, &worktrees, project.root())?;

    if output.is_json() {
        output.data(&finalized);
    } else if finalized.is_empty() {
        output.success("No merged items");
    } else {
        for id in &finalized {
            output.success(&format!("{id} merged; marked done"));
        }
    }
    Ok(())
}
