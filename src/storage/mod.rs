//! # Storage Layer
//!
//! Persistence for docket with git-friendly file formats.
//!
//! | Data | Format | Location |
//! |------|--------|----------|
//! | Items | one pretty JSON document each | `.docket/items/{id}.json` |
//! | Current item | single id line | `.docket/current` |
//! | Config | TOML | `.docket/config.toml` |
//! | Locks | empty sidecar files | `.docket/locks/` |
//!
//! ## Concurrency Safety
//!
//! - Every item record has its own lock; [`ItemStore::update_item`] is the
//!   read-modify-write primitive everything else builds on
//! - [`CurrentPointer`] has one dedicated lock for all updates
//! - Writes are atomic (temp file + rename)

mod config;
mod items;
mod lock;
mod pointer;
mod project;

pub use config::{
    AgentConfig, Config, ConfigError, GlobalConfig, OrchestratorConfig, OutputFormat,
    ProjectConfig, AGENT_ENV, DEFAULT_PROMPT_TEMPLATE, ROOT_ENV,
};
pub use items::{ItemStore, StoreError};
pub use lock::{LockMode, RecordLock};
pub use pointer::CurrentPointer;
pub use project::{Project, ProjectError};
