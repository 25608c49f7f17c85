//! Main CLI application structure

use anyhow::Result;
use clap::{Parser, Subcommand};

use super::output::{Output, OutputFormat};
use super::{agent, item};
use crate::logging;
use crate::storage::{Config, Project};

#[derive(Parser)]
#[command(name = "docket")]
#[command(author, version, about = "Local work-item tracker with a lease scheduler and agent loop")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (defaults to the global config's default_format)
    #[arg(long, short = 'f', global = true)]
    pub format: Option<OutputFormat>,

    /// Enable debug logging on stderr
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new docket project
    Init {
        /// Path to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,
    },

    /// Add a work item
    ///
    /// The first line of the description is its title.
    Add {
        description: String,

        /// Tie-break order within a dependency wave (lower first, default 99)
        #[arg(long, short)]
        priority: Option<i64>,

        /// Tag to attach (repeatable)
        #[arg(long = "tag", short)]
        tags: Vec<String>,

        /// Item that must be done first (repeatable)
        #[arg(long = "depends-on", short)]
        depends_on: Vec<String>,
    },

    /// Show item details
    Show { id: String },

    /// List items (open ones unless --all)
    List {
        #[arg(long)]
        all: bool,

        #[arg(long)]
        tag: Option<String>,
    },

    /// List items eligible for work now
    Available {
        #[arg(long)]
        tag: Option<String>,
    },

    /// List items waiting for review
    Review,

    /// List open items in dependency order
    Order,

    /// Make an item depend on another
    Dep {
        /// Item that will be blocked
        id: String,

        /// Item that must be done first
        on: String,
    },

    /// Remove a dependency
    Undep { id: String, on: String },

    /// Set an item's priority, or clear it when no value is given
    Priority { id: String, value: Option<i64> },

    /// Change an item's status
    ///
    /// Targets: undone, claimed, review, done, closed, suspended
    Status {
        id: String,

        status: String,

        /// Lease length for `claimed`
        #[arg(long)]
        lease_minutes: Option<i64>,

        /// Lease holder for `claimed`
        #[arg(long)]
        holder: Option<String>,

        /// Close as a duplicate of this item
        #[arg(long)]
        duplicate_of: Option<String>,

        /// Text added to the log entry
        #[arg(long, short)]
        message: Option<String>,
    },

    /// Lease an item; without an id, the next available one
    Claim {
        id: Option<String>,

        #[arg(long)]
        holder: Option<String>,

        #[arg(long)]
        lease_minutes: Option<i64>,

        /// Only consider items with this tag (when no id is given)
        #[arg(long)]
        tag: Option<String>,
    },

    /// Drop an item's lease
    Release { id: String },

    /// Mark an item done
    Done { id: String },

    /// Add a tag
    Tag { id: String, tag: String },

    /// Remove a tag
    Untag { id: String, tag: String },

    /// Set a named note on an item
    Note { id: String, name: String, text: String },

    /// Show or change the current item
    Current {
        #[command(subcommand)]
        command: Option<item::CurrentCommands>,
    },

    /// Run or control the agent loop
    #[command(subcommand)]
    Agent(agent::AgentCommands),
}

fn resolve_format(requested: Option<OutputFormat>) -> OutputFormat {
    requested.unwrap_or_else(|| {
        Config::load()
            .map(|config| config.global.default_format.into())
            .unwrap_or_default()
    })
}

/// Main entry point for the CLI
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    let output = Output::new(resolve_format(cli.format));

    match cli.command {
        Commands::Init { path } => {
            let project = Project::init(&path)?;
            output.success(&format!(
                "Initialized docket project at {}",
                project.root().display()
            ));
        }

        Commands::Add {
            description,
            priority,
            tags,
            depends_on,
        } => item::add(&output, &description, priority, tags, &depends_on)?,
        Commands::Show { id } => item::show(&output, &id)?,
        Commands::List { all, tag } => item::list(&output, all, tag.as_deref())?,
        Commands::Available { tag } => item::available(&output, tag.as_deref())?,
        Commands::Review => item::review(&output)?,
        Commands::Order => item::order(&output)?,
        Commands::Dep { id, on } => item::dep(&output, &id, &on)?,
        Commands::Undep { id, on } => item::undep(&output, &id, &on)?,
        Commands::Priority { id, value } => item::priority(&output, &id, value)?,
        Commands::Status {
            id,
            status,
            lease_minutes,
            holder,
            duplicate_of,
            message,
        } => item::status(
            &output,
            &id,
            &status,
            item::StatusArgs {
                lease_minutes,
                holder,
                duplicate_of,
                message,
            },
        )?,
        Commands::Claim {
            id,
            holder,
            lease_minutes,
            tag,
        } => item::claim(&output, id.as_deref(), holder, lease_minutes, tag.as_deref())?,
        Commands::Release { id } => item::release(&output, &id)?,
        Commands::Done { id } => item::done(&output, &id)?,
        Commands::Tag { id, tag } => item::tag(&output, &id, &tag, true)?,
        Commands::Untag { id, tag } => item::tag(&output, &id, &tag, false)?,
        Commands::Note { id, name, text } => item::note(&output, &id, &name, &text)?,
        Commands::Current { command } => item::current(&output, command)?,
        Commands::Agent(cmd) => agent::run(cmd, &output)?,
    }

    Ok(())
}
