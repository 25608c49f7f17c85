//! Domain models for docket
//!
//! Contains the core scheduling logic without any I/O concerns.

mod graph;
mod id;
mod item;
mod status;

pub use graph::{topo_order, would_create_cycle, DependencyGraph, GraphError, TopoOrder};
pub use id::{IdError, ItemId};
pub use item::{DoneStatus, LogEntry, SchedulingState, WorkItem, DEFAULT_PRIORITY};
pub use status::{
    apply_status, Status, StatusError, StatusOptions, DEFAULT_LEASE_MINUTES,
    MAX_LEASE_MINUTES,
};
