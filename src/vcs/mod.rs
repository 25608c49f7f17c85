//! Version control and external processes
//!
//! - [`CommandRunner`] / [`SystemRunner`]: the process boundary
//! - [`AuditLog`]: timestamped record of every external command
//! - [`WorktreeManager`]: branches and worktrees per item

mod audit;
mod runner;
mod worktree;

pub use audit::AuditLog;
pub use runner::{display_command, CommandOutput, CommandRunner, SystemRunner};
pub use worktree::{VcsError, WorktreeManager};
