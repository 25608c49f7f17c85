//! Item commands

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::Subcommand;

use super::output::Output;
use crate::domain::{ItemId, StatusOptions, WorkItem};
use crate::storage::Project;
use crate::tracker::{NewItem, Tracker};

#[derive(Subcommand)]
pub enum CurrentCommands {
    /// Print the current item
    Show,

    /// Point at an item
    Set { id: String },

    /// Clear the pointer
    Clear,
}

/// Optional inputs of `docket status`
pub struct StatusArgs {
    pub lease_minutes: Option<i64>,
    pub holder: Option<String>,
    pub duplicate_of: Option<String>,
    pub message: Option<String>,
}

fn open() -> Result<(Project, Tracker)> {
    let project = Project::open_current()?;
    let tracker = Tracker::for_project(&project);
    Ok((project, tracker))
}

fn parse_id(value: &str) -> Result<ItemId> {
    value
        .parse()
        .with_context(|| format!("Invalid item id: {value}"))
}

/// `--lease-minutes`, or the configured lease when absent
fn lease(minutes: Option<i64>, project: &Project) -> Result<Duration> {
    match minutes {
        Some(m) => Duration::try_minutes(m)
            .with_context(|| format!("Lease of {m} minutes is out of range")),
        None => Ok(project.config().project.agent.lease()),
    }
}

fn changed(output: &Output, changed: bool, id: &ItemId, done: &str, unchanged: &str) {
    if output.is_json() {
        output.data(&serde_json::json!({ "id": id, "changed": changed }));
    } else if changed {
        output.success(done);
    } else {
        output.success(unchanged);
    }
}

pub fn add(
    output: &Output,
    description: &str,
    priority: Option<i64>,
    tags: Vec<String>,
    depends_on: &[String],
) -> Result<()> {
    let (_, tracker) = open()?;
    let depends_on = depends_on
        .iter()
        .map(|d| parse_id(d))
        .collect::<Result<Vec<_>>>()?;

    let item = tracker.add_item(NewItem {
        description: description.to_string(),
        priority,
        tags,
        depends_on,
    })?;

    if output.is_json() {
        output.data(&item);
    } else {
        output.success(&format!("Created item: {} - {}", item.id, item.title()));
    }
    Ok(())
}

pub fn show(output: &Output, id: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let item = tracker.get(&parse_id(id)?)?;
    let now = Utc::now();

    if output.is_json() {
        output.data(&serde_json::json!({
            "item": item,
            "state": item.scheduling_state(now).label(),
        }));
        return Ok(());
    }

    println!("Item: {}", item.id);
    println!("Title: {}", item.title());
    println!("State: {}", item.scheduling_state(now).label());
    println!("Priority: {}", item.effective_priority());
    println!("Created: {}", item.created.format("%Y-%m-%d %H:%M"));
    println!("Updated: {}", item.updated.format("%Y-%m-%d %H:%M"));
    if let (Some(until), Some(holder)) = (item.lease_until, &item.lease_holder) {
        println!("Lease: {} until {}", holder, until.format("%Y-%m-%d %H:%M"));
    }
    if !item.tags.is_empty() {
        let tags: Vec<_> = item.tags.iter().map(String::as_str).collect();
        println!("Tags: {}", tags.join(", "));
    }

    if !item.depends_on.is_empty() {
        println!("\nDepends on:");
        for dep in &item.depends_on {
            let state = match tracker.get(dep) {
                Ok(d) => d.scheduling_state(now).label().to_string(),
                Err(_) => "missing".to_string(),
            };
            println!("  {} ({})", dep, state);
        }
    }

    let body = item.body();
    if !body.is_empty() {
        println!("\nDescription:\n{}", body);
    }

    if !item.notes.is_empty() {
        println!("\nNotes:");
        for (name, text) in &item.notes {
            println!("  {}: {}", name, text);
        }
    }

    println!("\nLog:");
    for entry in &item.log {
        println!(
            "  {} {:<14} {}",
            entry.time.format("%Y-%m-%d %H:%M"),
            entry.kind,
            entry.message
        );
    }
    Ok(())
}

pub fn list(output: &Output, all: bool, tag: Option<&str>) -> Result<()> {
    let (_, tracker) = open()?;
    let items: Vec<WorkItem> = tracker
        .list()?
        .into_iter()
        .filter(|i| all || !i.done)
        .filter(|i| tag.map_or(true, |t| i.has_tag(t)))
        .collect();
    output.items(&items, Utc::now(), "No items");
    Ok(())
}

pub fn available(output: &Output, tag: Option<&str>) -> Result<()> {
    let (_, tracker) = open()?;
    let now = Utc::now();
    let available = tracker.list_available_at(tag, now)?;

    if output.is_json() {
        output.data(&available);
        return Ok(());
    }
    for id in &available.reconciled {
        output.warn(&format!("cleared expired lease on {id}"));
    }
    output.items(&available.items, now, "No items available");
    Ok(())
}

pub fn review(output: &Output) -> Result<()> {
    let (_, tracker) = open()?;
    output.items(&tracker.list_review_ready()?, Utc::now(), "Nothing awaiting review");
    Ok(())
}

pub fn order(output: &Output) -> Result<()> {
    let (_, tracker) = open()?;
    let ordered = tracker.ordered()?;

    if output.is_json() {
        output.data(&ordered);
        return Ok(());
    }
    if !ordered.acyclic {
        output.warn("dependency cycle found; showing id order");
    }
    output.items(&ordered.items, Utc::now(), "No open items");
    Ok(())
}

pub fn dep(output: &Output, id: &str, on: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let (id, on) = (parse_id(id)?, parse_id(on)?);
    let added = tracker.set_dependency(&id, &on)?;
    changed(
        output,
        added,
        &id,
        &format!("{id} now depends on {on}"),
        &format!("{id} already depends on {on}"),
    );
    Ok(())
}

pub fn undep(output: &Output, id: &str, on: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let (id, on) = (parse_id(id)?, parse_id(on)?);
    let removed = tracker.remove_dependency(&id, &on)?;
    changed(
        output,
        removed,
        &id,
        &format!("{id} no longer depends on {on}"),
        &format!("{id} did not depend on {on}"),
    );
    Ok(())
}

pub fn priority(output: &Output, id: &str, value: Option<i64>) -> Result<()> {
    let (_, tracker) = open()?;
    let id = parse_id(id)?;
    let updated = tracker.set_priority(&id, value)?;
    let message = match value {
        Some(p) => format!("{id} priority set to {p}"),
        None => format!("{id} priority cleared"),
    };
    changed(output, updated, &id, &message, &format!("{id} unchanged"));
    Ok(())
}

pub fn status(output: &Output, id: &str, status: &str, args: StatusArgs) -> Result<()> {
    let (project, tracker) = open()?;
    let id = parse_id(id)?;
    let agent = &project.config().project.agent;
    let opts = StatusOptions {
        lease: Some(lease(args.lease_minutes, &project)?),
        holder: Some(args.holder.unwrap_or_else(|| agent.effective_name())),
        duplicate_of: args.duplicate_of.as_deref().map(parse_id).transpose()?,
        message: args.message,
    };

    let item = tracker.set_status_str(&id, status, &opts)?;
    if output.is_json() {
        output.data(&item);
    } else {
        output.success(&format!(
            "{} is now {}",
            item.id,
            item.scheduling_state(Utc::now()).label()
        ));
    }
    Ok(())
}

pub fn claim(
    output: &Output,
    id: Option<&str>,
    holder: Option<String>,
    lease_minutes: Option<i64>,
    tag: Option<&str>,
) -> Result<()> {
    let (project, tracker) = open()?;
    let agent = &project.config().project.agent;
    let holder = holder.unwrap_or_else(|| agent.effective_name());
    let lease = lease(lease_minutes, &project)?;

    let claimed = match id {
        Some(id) => Some(tracker.claim(&parse_id(id)?, &holder, lease)?),
        None => tracker.claim_next(tag, &holder, lease, Utc::now())?,
    };

    match claimed {
        Some(item) if output.is_json() => output.data(&item),
        Some(item) => output.success(&format!(
            "Claimed {} - {} for {}",
            item.id,
            item.title(),
            holder
        )),
        None if output.is_json() => output.data(&serde_json::Value::Null),
        None => output.success("No items available"),
    }
    Ok(())
}

pub fn release(output: &Output, id: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let id = parse_id(id)?;
    let released = tracker.release(&id)?;
    changed(
        output,
        released,
        &id,
        &format!("Released {id}"),
        &format!("{id} was not leased"),
    );
    Ok(())
}

pub fn done(output: &Output, id: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let item = tracker.mark_done(&parse_id(id)?)?;
    if output.is_json() {
        output.data(&item);
    } else {
        output.success(&format!("Completed {} - {}", item.id, item.title()));
    }
    Ok(())
}

pub fn tag(output: &Output, id: &str, tag: &str, add: bool) -> Result<()> {
    let (_, tracker) = open()?;
    let id = parse_id(id)?;
    if add {
        let added = tracker.add_tag(&id, tag)?;
        changed(output, added, &id, &format!("Tagged {id} {tag}"), &format!("{id} already tagged {tag}"));
    } else {
        let removed = tracker.remove_tag(&id, tag)?;
        changed(output, removed, &id, &format!("Untagged {id} {tag}"), &format!("{id} was not tagged {tag}"));
    }
    Ok(())
}

pub fn note(output: &Output, id: &str, name: &str, text: &str) -> Result<()> {
    let (_, tracker) = open()?;
    let id = parse_id(id)?;
    let updated = tracker.set_note(&id, name, text)?;
    changed(
        output,
        updated,
        &id,
        &format!("Set note {name} on {id}"),
        &format!("Note {name} on {id} unchanged"),
    );
    Ok(())
}

pub fn current(output: &Output, command: Option<CurrentCommands>) -> Result<()> {
    let (_, tracker) = open()?;
    let pointer = tracker.pointer();

    match command.unwrap_or(CurrentCommands::Show) {
        CurrentCommands::Show => {
            let current = pointer.get()?;
            if output.is_json() {
                output.data(&serde_json::json!({ "current": current }));
            } else {
                match current {
                    Some(id) => {
                        let title = tracker
                            .get(&id)
                            .map(|item| item.title().to_string())
                            .unwrap_or_else(|_| "(missing)".to_string());
                        println!("{} - {}", id, title);
                    }
                    None => println!("No current item"),
                }
            }
        }
        CurrentCommands::Set { id } => {
            let id = parse_id(&id)?;
            // Refuse to point at an item that does not exist
            tracker.get(&id)?;
            pointer.set(&id)?;
            output.success(&format!("Current item is {id}"));
        }
        CurrentCommands::Clear => {
            pointer.clear()?;
            output.success("Cleared current item");
        }
    }
    Ok(())
}
