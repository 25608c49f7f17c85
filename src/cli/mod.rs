//! # Command-Line Interface
//!
//! | Group | Commands |
//! |-------|----------|
//! | Project | `init` |
//! | Items | `add`, `show`, `list`, `dep`, `undep`, `priority`, `tag`, `untag`, `note` |
//! | Scheduling | `available`, `review`, `order`, `status`, `claim`, `release`, `done`, `current` |
//! | Agent | `agent run`, `agent stop`, `agent sweep` |
//!
//! All commands accept `--format text|json`; `--verbose` turns on debug
//! logging on stderr.
//!
//! Call [`run()`] to parse arguments and execute the appropriate command.

mod agent;
mod app;
mod item;
mod output;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
