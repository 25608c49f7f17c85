//! docket - a local work-item tracker with a dependency-ordered lease
//! scheduler and an unattended agent loop
//!
//! Items live as one JSON document each under `.docket/items/`. The
//! [`tracker::Tracker`] exposes the single operations (add, depend, change
//! status, claim, list available work); the [`orchestrator`] drives the
//! same operations in a loop that works each item in its own git worktree.

pub mod cli;
pub mod domain;
pub mod logging;
pub mod orchestrator;
pub mod storage;
pub mod tracker;
pub mod vcs;

pub use domain::{DoneStatus, ItemId, Status, WorkItem};
pub use tracker::{NewItem, Tracker, TrackerError};
