//! Work item identifiers
//!
//! ID Format: `t-{7-char-hash}` (e.g., `t-9d3e5f2`)
//!
//! The hash is derived from the description, the creation timestamp and a
//! caller-supplied salt. Identical descriptions created at different times
//! produce different IDs. The store retries with a new salt on collision.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of the hash portion of an ID
const HASH_LEN: usize = 7;

#[derive(Debug, Error, PartialEq)]
pub enum IdError {
    #[error("Invalid item ID format: expected 't-{{7-char-hash}}', got '{0}'")]
    InvalidItemId(String),
}

/// Generates a 7-character hash from description, timestamp and salt
fn generate_hash(description: &str, timestamp: DateTime<Utc>, salt: u64) -> String {
    let input = format!(
        "{}{}{}{}",
        description,
        timestamp.timestamp_nanos_opt().unwrap_or(0),
        std::process::id(),
        salt
    );
    let hash = blake3::hash(input.as_bytes());
    let hex = hash.to_hex();
    hex[..HASH_LEN].to_string()
}

/// Short opaque identifier of a work item, immutable once assigned
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ItemId {
    hash: String,
}

impl ItemId {
    /// Creates a new ID from description and timestamp
    pub fn new(description: &str, timestamp: DateTime<Utc>) -> Self {
        Self::with_salt(description, timestamp, 0)
    }

    /// Creates a new ID, mixing in `salt` (used to re-draw on collision)
    pub fn with_salt(description: &str, timestamp: DateTime<Utc>, salt: u64) -> Self {
        Self {
            hash: generate_hash(description, timestamp, salt),
        }
    }

    /// File stem used by the item store
    pub fn file_stem(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t-{}", self.hash)
    }
}

impl FromStr for ItemId {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let Some(hash) = s.strip_prefix("t-") else {
            return Err(IdError::InvalidItemId(s.to_string()));
        };

        if hash.len() != HASH_LEN || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(IdError::InvalidItemId(s.to_string()));
        }

        Ok(Self {
            hash: hash.to_ascii_lowercase(),
        })
    }
}

impl TryFrom<String> for ItemId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ItemId> for String {
    fn from(id: ItemId) -> Self {
        id.to_string()
    }
}
