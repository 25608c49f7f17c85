//! Work item domain model
//!
//! A work item is the unit of work the scheduler hands out. Its scheduling
//! state is never stored directly: it is derived from `done`, `review_ready`
//! and the lease expiry compared against the current time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::id::ItemId;

/// Priority used for items without an explicit one. Lower sorts earlier.
pub const DEFAULT_PRIORITY: i64 = 99;

/// Refines why `done` is true
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DoneStatus {
    #[default]
    None,
    Done,
    Closed,
    Suspended,
}

impl DoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DoneStatus::None => "none",
            DoneStatus::Done => "done",
            DoneStatus::Closed => "closed",
            DoneStatus::Suspended => "suspended",
        }
    }
}

/// Derived scheduling state; exactly one applies at any instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingState {
    /// Not done, not review-ready, not leased
    Available,
    /// Held by a lease that has not yet expired
    Leased,
    /// Work finished, awaiting merge/acceptance
    ReviewReady,
    /// Done, closed or suspended
    Finished(DoneStatus),
}

impl SchedulingState {
    pub fn label(&self) -> &'static str {
        match self {
            SchedulingState::Available => "open",
            SchedulingState::Leased => "claimed",
            SchedulingState::ReviewReady => "review",
            SchedulingState::Finished(status) => status.as_str(),
        }
    }
}

/// One audit trail entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub kind: String,
    pub message: String,
}

/// A work item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier, never changes
    pub id: ItemId,

    /// Free text; first line is the title, the rest is the body
    pub description: String,

    pub created: DateTime<Utc>,

    /// Bumped on every mutation
    pub updated: DateTime<Utc>,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub done_status: DoneStatus,

    /// Not done, but excluded from scheduling
    #[serde(default)]
    pub review_ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_holder: Option<String>,

    /// Items that must be done before this one is eligible
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<ItemId>,

    /// Explicit tie-break order; `None` means [`DEFAULT_PRIORITY`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Append-only audit trail
    #[serde(default)]
    pub log: Vec<LogEntry>,

    /// Named text attachments
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub notes: BTreeMap<String, String>,
}

impl WorkItem {
    /// Creates a new open item
    pub fn new(id: ItemId, description: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            description: description.into(),
            created: now,
            updated: now,
            done: false,
            done_status: DoneStatus::None,
            review_ready: false,
            lease_until: None,
            lease_holder: None,
            depends_on: BTreeSet::new(),
            priority: None,
            tags: BTreeSet::new(),
            log: Vec::new(),
            notes: BTreeMap::new(),
        }
    }

    /// First line of the description
    pub fn title(&self) -> &str {
        self.description.lines().next().unwrap_or("").trim()
    }

    /// Everything after the first line
    pub fn body(&self) -> &str {
        match self.description.split_once('\n') {
            Some((_, body)) => body.trim(),
            None => "",
        }
    }

    pub fn effective_priority(&self) -> i64 {
        self.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    /// True iff a lease is set and ends strictly after `now`
    pub fn is_leased(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_until, Some(until) if until > now)
    }

    /// True iff a lease is set but no longer in the future
    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lease_until, Some(until) if until <= now)
    }

    /// Not done, not review-ready and not leased. Dependencies are not considered.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        !self.done && !self.review_ready && !self.is_leased(now)
    }

    pub fn is_review_ready(&self) -> bool {
        self.review_ready && !self.done
    }

    pub fn scheduling_state(&self, now: DateTime<Utc>) -> SchedulingState {
        if self.done {
            SchedulingState::Finished(self.done_status)
        } else if self.review_ready {
            SchedulingState::ReviewReady
        } else if self.is_leased(now) {
            SchedulingState::Leased
        } else {
            SchedulingState::Available
        }
    }

    /// Returns true if every dependency is in `done_ids`
    pub fn dependencies_done(&self, done_ids: &HashSet<ItemId>) -> bool {
        self.depends_on.iter().all(|dep| done_ids.contains(dep))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// Branch recorded by the orchestrator, if any
    pub fn branch(&self) -> Option<&str> {
        self.notes.get("branch").map(String::as_str)
    }

    /// Appends one audit entry and bumps `updated`
    pub fn record(&mut self, kind: &str, message: impl Into<String>, now: DateTime<Utc>) {
        self.log.push(LogEntry {
            time: now,
            kind: kind.to_string(),
            message: message.into(),
        });
        self.updated = now;
    }

    pub fn clear_lease(&mut self) {
        self.lease_until = None;
        self.lease_holder = None;
    }

    /// Clears an expired lease and logs it. Returns false when there was nothing to clear.
    pub fn reconcile_expired_lease(&mut self, now: DateTime<Utc>) -> bool {
        if !self.lease_expired(now) {
            return false;
        }
        let holder = self.lease_holder.clone().unwrap_or_else(|| "unknown".to_string());
        let until = self.lease_until.map(|t| t.to_rfc3339()).unwrap_or_default();
        self.clear_lease();
        self.record(
            "lease_expired",
            format!("lease held by {holder} expired at {until}"),
            now,
        );
        true
    }

    /// Adds a dependency. Returns false if it was already present.
    pub fn add_dependency(&mut self, dep: ItemId, now: DateTime<Utc>) -> bool {
        if !self.depends_on.insert(dep.clone()) {
            return false;
        }
        self.record("depends_on", format!("depends on {dep}"), now);
        true
    }

    /// Removes a dependency. Returns false if it was not present.
    pub fn remove_dependency(&mut self, dep: &ItemId, now: DateTime<Utc>) -> bool {
        if !self.depends_on.remove(dep) {
            return false;
        }
        self.record("undepends_on", format!("no longer depends on {dep}"), now);
        true
    }

    pub fn add_tag(&mut self, tag: &str, now: DateTime<Utc>) -> bool {
        if !self.tags.insert(tag.to_string()) {
            return false;
        }
        self.record("tag", format!("tagged {tag}"), now);
        true
    }

    pub fn remove_tag(&mut self, tag: &str, now: DateTime<Utc>) -> bool {
        if !self.tags.remove(tag) {
            return false;
        }
        self.record("untag", format!("untagged {tag}"), now);
        true
    }

    /// Upserts a note. Returns false if the note already had this text.
    pub fn set_note(&mut self, name: &str, text: &str, now: DateTime<Utc>) -> bool {
        if self.notes.get(name).map(String::as_str) == Some(text) {
            return false;
        }
        self.notes.insert(name.to_string(), text.to_string());
        self.record("note", format!("set note {name}"), now);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn make_item(description: &str) -> WorkItem {
        let now = Utc::now();
        WorkItem::new(ItemId::new(description, now), description, now)
    }

    #[test]
    fn new_item_is_available() {
        let item = make_item("Write docs");
        let now = Utc::now();

        assert!(item.is_available(now));
        assert_eq!(item.scheduling_state(now), SchedulingState::Available);
        assert_eq!(item.effective_priority(), DEFAULT_PRIORITY);
        assert!(item.log.is_empty());
    }

    #[test]
    fn title_and_body() {
        let item = make_item("Fix login\n\nThe form resets on submit.\n");
        assert_eq!(item.title(), "Fix login");
        assert_eq!(item.body(), "The form resets on submit.");

        let single = make_item("Only a title");
        assert_eq!(single.body(), "");
    }

    #[test]
    fn lease_is_strictly_future() {
        let mut item = make_item("Leased");
        let now = Utc::now();

        item.lease_until = Some(now);
        assert!(!item.is_leased(now));
        assert!(item.lease_expired(now));
        assert!(item.is_available(now));

        item.lease_until = Some(now + Duration::minutes(5));
        assert!(item.is_leased(now));
        assert!(!item.is_available(now));
        assert_eq!(item.scheduling_state(now), SchedulingState::Leased);
    }

    #[test]
    fn scheduling_state_precedence() {
        let mut item = make_item("State");
        let now = Utc::now();
        item.lease_until = Some(now + Duration::hours(1));
        item.review_ready = true;
        assert_eq!(item.scheduling_state(now), SchedulingState::ReviewReady);

        item.done = true;
        item.done_status = DoneStatus::Suspended;
        assert_eq!(
            item.scheduling_state(now),
            SchedulingState::Finished(DoneStatus::Suspended)
        );
        assert!(!item.is_review_ready());
    }

    #[test]
    fn reconcile_clears_expired_lease_once() {
        let mut item = make_item("Stale");
        let now = Utc::now();
        item.lease_until = Some(now - Duration::seconds(1));
        item.lease_holder = Some("worker-1".to_string());

        assert!(item.reconcile_expired_lease(now));
        assert!(item.lease_until.is_none());
        assert!(item.lease_holder.is_none());
        assert_eq!(item.log.len(), 1);
        assert_eq!(item.log[0].kind, "lease_expired");

        assert!(!item.reconcile_expired_lease(now));
        assert_eq!(item.log.len(), 1);
    }

    #[test]
    fn active_lease_is_not_reconciled() {
        let mut item = make_item("Active");
        let now = Utc::now();
        item.lease_until = Some(now + Duration::minutes(1));

        assert!(!item.reconcile_expired_lease(now));
        assert!(item.lease_until.is_some());
    }

    #[test]
    fn mutations_log_only_real_changes() {
        let mut item = make_item("Mutate");
        let other = make_item("Other");
        let now = Utc::now();

        assert!(item.add_dependency(other.id.clone(), now));
        assert!(!item.add_dependency(other.id.clone(), now));
        assert!(item.add_tag("backend", now));
        assert!(!item.add_tag("backend", now));
        assert!(item.set_note("branch", "docket/x", now));
        assert!(!item.set_note("branch", "docket/x", now));
        assert!(item.remove_dependency(&other.id, now));
        assert!(item.remove_tag("backend", now));

        let kinds: Vec<_> = item.log.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, ["depends_on", "tag", "note", "undepends_on", "untag"]);
        assert_eq!(item.branch(), Some("docket/x"));
    }

    #[test]
    fn dependencies_done_checks_every_dep() {
        let mut item = make_item("Blocked");
        let a = make_item("A");
        let b = make_item("B");
        let now = Utc::now();
        item.add_dependency(a.id.clone(), now);
        item.add_dependency(b.id.clone(), now);

        let mut done = HashSet::new();
        done.insert(a.id.clone());
        assert!(!item.dependencies_done(&done));

        done.insert(b.id.clone());
        assert!(item.dependencies_done(&done));
    }

    #[test]
    fn serde_roundtrip_omits_empty_fields() {
        let mut item = make_item("Roundtrip");
        let json = serde_json::to_value(&item).unwrap();
        assert!(json.get("lease_until").is_none());
        assert!(json.get("notes").is_none());
        assert_eq!(json["done_status"], "none");

        item.priority = Some(3);
        item.add_tag("ops", Utc::now());
        let text = serde_json::to_string(&item).unwrap();
        let parsed: WorkItem = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, item);
    }
}
