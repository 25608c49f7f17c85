//! Status transitions
//!
//! The canonical state-transition function. Every target produces a fixed
//! set of field mutations and exactly one audit entry. Persistence and the
//! existence checks that need the store live in [`crate::tracker`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::id::ItemId;
use super::item::{DoneStatus, WorkItem};

/// Lease length used when a claim does not specify one
pub const DEFAULT_LEASE_MINUTES: i64 = 60;

/// Longest lease a claim may ask for (366 days)
pub const MAX_LEASE_MINUTES: i64 = 366 * 24 * 60;

#[derive(Debug, Error, PartialEq)]
pub enum StatusError {
    #[error("Unknown status '{0}' (expected undone, claimed, review, done, closed or suspended)")]
    Unknown(String),

    #[error("Lease duration must be positive, got {0} seconds")]
    InvalidLease(i64),

    #[error("Lease duration of {0} seconds is too long (at most 366 days)")]
    LeaseTooLong(i64),

    #[error("Item {0} cannot be a duplicate of itself")]
    DuplicateOfSelf(ItemId),
}

/// Target of a status transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Undone,
    Claimed,
    Review,
    Done,
    Closed,
    Suspended,
}

impl Status {
    pub const ALL: [Status; 6] = [
        Status::Undone,
        Status::Claimed,
        Status::Review,
        Status::Done,
        Status::Closed,
        Status::Suspended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Undone => "undone",
            Status::Claimed => "claimed",
            Status::Review => "review",
            Status::Done => "done",
            Status::Closed => "closed",
            Status::Suspended => "suspended",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "undone" | "open" | "todo" => Ok(Status::Undone),
            "claimed" | "in_progress" => Ok(Status::Claimed),
            "review" | "review_ready" => Ok(Status::Review),
            "done" => Ok(Status::Done),
            "closed" => Ok(Status::Closed),
            "suspended" | "suspend" => Ok(Status::Suspended),
            _ => Err(StatusError::Unknown(s.to_string())),
        }
    }
}

/// Extra inputs for a transition
#[derive(Debug, Clone, Default)]
pub struct StatusOptions {
    /// Lease length for `claimed`; defaults to [`DEFAULT_LEASE_MINUTES`]
    pub lease: Option<Duration>,
    /// Holder recorded for `claimed`
    pub holder: Option<String>,
    /// Original item when closing as a duplicate
    pub duplicate_of: Option<ItemId>,
    /// Free text appended to the log message
    pub message: Option<String>,
}

impl StatusOptions {
    pub fn claim(holder: impl Into<String>, lease: Duration) -> Self {
        Self {
            lease: Some(lease),
            holder: Some(holder.into()),
            ..Self::default()
        }
    }

    pub fn duplicate_of(original: ItemId) -> Self {
        Self {
            duplicate_of: Some(original),
            ..Self::default()
        }
    }
}

fn with_message(base: String, opts: &StatusOptions) -> String {
    match opts.message.as_deref().map(str::trim) {
        Some(extra) if !extra.is_empty() => format!("{base}: {extra}"),
        _ => base,
    }
}

/// Applies `status` to `item` in memory.
///
/// Validation happens before any field is touched, so on error the item is
/// unchanged.
pub fn apply_status(
    item: &mut WorkItem,
    status: Status,
    opts: &StatusOptions,
    now: DateTime<Utc>,
) -> Result<(), StatusError> {
    match status {
        Status::Undone => {
            item.done = false;
            item.done_status = DoneStatus::None;
            item.review_ready = false;
            item.clear_lease();
            item.record("undone", with_message("reopened".to_string(), opts), now);
        }
        Status::Claimed => {
            let lease = opts
                .lease
                .unwrap_or_else(|| Duration::minutes(DEFAULT_LEASE_MINUTES));
            if lease <= Duration::zero() {
                return Err(StatusError::InvalidLease(lease.num_seconds()));
            }
            let holder = opts
                .holder
                .clone()
                .filter(|h| !h.trim().is_empty())
                .unwrap_or_else(|| "anonymous".to_string());
            if lease > Duration::minutes(MAX_LEASE_MINUTES) {
                return Err(StatusError::LeaseTooLong(lease.num_seconds()));
            }
            let until = now
                .checked_add_signed(lease)
                .ok_or(StatusError::LeaseTooLong(lease.num_seconds()))?;

            item.done = false;
            item.done_status = DoneStatus::None;
            item.review_ready = false;
            item.lease_until = Some(until);
            item.lease_holder = Some(holder.clone());
            item.record(
                "in_progress",
                with_message(format!("claimed by {holder} until {}", until.to_rfc3339()), opts),
                now,
            );
        }
        Status::Review => {
            item.done = false;
            item.done_status = DoneStatus::None;
            item.review_ready = true;
            item.clear_lease();
            item.record("review_ready", with_message("ready for review".to_string(), opts), now);
        }
        Status::Done => {
            item.done = true;
            item.done_status = DoneStatus::Done;
            item.review_ready = false;
            item.clear_lease();
            item.record("done", with_message("marked done".to_string(), opts), now);
        }
        Status::Closed => {
            if opts.duplicate_of.as_ref() == Some(&item.id) {
                return Err(StatusError::DuplicateOfSelf(item.id.clone()));
            }
            item.done = true;
            item.done_status = DoneStatus::Closed;
            item.review_ready = false;
            item.clear_lease();
            match &opts.duplicate_of {
                Some(original) => {
                    item.notes
                        .insert("duplicate_of".to_string(), original.to_string());
                    item.record(
                        "duplicate_of",
                        with_message(format!("closed as duplicate of {original}"), opts),
                        now,
                    );
                }
                None => item.record("closed", with_message("closed".to_string(), opts), now),
            }
        }
        Status::Suspended => {
            item.done = true;
            item.done_status = DoneStatus::Suspended;
            item.review_ready = false;
            item.clear_lease();
            item.record("suspend", with_message("suspended".to_string(), opts), now);
        }
    }
    Ok(())
}
