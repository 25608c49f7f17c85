//! Public work-item operations
//!
//! [`Tracker`] combines the pure domain rules with the locked store. Every
//! mutation is a single [`ItemStore::update_item`] call, so validation,
//! field changes and the audit entry land together or not at all.

use std::collections::{BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{
    apply_status, topo_order, DependencyGraph, GraphError, ItemId, Status, StatusError,
    StatusOptions, WorkItem,
};
use crate::storage::{CurrentPointer, ItemStore, Project, StoreError};

/// Salted re-draws attempted when a fresh id collides
const MAX_ID_ATTEMPTS: u64 = 16;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error("Item {0} is not available to claim")]
    Unavailable(ItemId),

    #[error("Description must not be empty")]
    EmptyDescription,

    #[error("Could not allocate a unique id after {0} attempts")]
    IdExhausted(u64),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for TrackerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => TrackerError::NotFound(id),
            other => TrackerError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;

/// Input for [`Tracker::add_item`]
#[derive(Debug, Clone, Default)]
pub struct NewItem {
    pub description: String,
    pub priority: Option<i64>,
    pub tags: Vec<String>,
    pub depends_on: Vec<ItemId>,
}

impl NewItem {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn depends_on(mut self, id: ItemId) -> Self {
        self.depends_on.push(id);
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Result of [`Tracker::list_available`]
#[derive(Debug, Clone, Serialize)]
pub struct Available {
    /// Eligible items, sorted by id
    pub items: Vec<WorkItem>,
    /// Items whose expired lease was cleared during this listing
    pub reconciled: Vec<ItemId>,
}

/// Result of [`Tracker::ordered`]
#[derive(Debug, Clone, Serialize)]
pub struct Ordered {
    pub items: Vec<WorkItem>,
    /// False when a cycle forced the id-order fallback
    pub acyclic: bool,
}

/// Entry point for single operations on a project's items
#[derive(Debug, Clone)]
pub struct Tracker {
    store: ItemStore,
    pointer: CurrentPointer,
}

impl Tracker {
    pub fn new(store: ItemStore, pointer: CurrentPointer) -> Self {
        Self { store, pointer }
    }

    pub fn for_project(project: &Project) -> Self {
        Self::new(project.item_store(), project.current_pointer())
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    pub fn pointer(&self) -> &CurrentPointer {
        &self.pointer
    }

    pub fn get(&self, id: &ItemId) -> Result<WorkItem> {
        Ok(self.store.get(id)?)
    }

    pub fn list(&self) -> Result<Vec<WorkItem>> {
        Ok(self.store.list()?)
    }

    /// Creates an item. Every initial dependency must exist.
    pub fn add_item(&self, new: NewItem) -> Result<WorkItem> {
        let description = new.description.trim();
        if description.is_empty() {
            return Err(TrackerError::EmptyDescription);
        }
        for dep in &new.depends_on {
            if !self.store.exists(dep) {
                return Err(TrackerError::NotFound(dep.clone()));
            }
        }

        let now = Utc::now();
        for salt in 0..MAX_ID_ATTEMPTS {
            let id = ItemId::with_salt(description, now, salt);
            let mut item = WorkItem::new(id, description, now);
            item.priority = new.priority;
            item.tags = new
                .tags
                .iter()
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            item.depends_on = new.depends_on.iter().cloned().collect::<BTreeSet<_>>();
            item.record("created", format!("created {}", item.title()), now);

            match self.store.create(&item) {
                Ok(()) => {
                    info!(item = %item.id, "created item");
                    return Ok(item);
                }
                Err(StoreError::AlreadyExists(id)) => {
                    debug!(item = %id, salt, "id collision, drawing again");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(TrackerError::IdExhausted(MAX_ID_ATTEMPTS))
    }

    /// Records "`id` depends on `on`" after checking it keeps the graph acyclic.
    ///
    /// Returns false if the dependency was already present.
    pub fn set_dependency(&self, id: &ItemId, on: &ItemId) -> Result<bool> {
        if id == on {
            return Err(GraphError::SelfDependency(id.clone()).into());
        }
        let items = self.store.list()?;
        DependencyGraph::from_items(&items)
            .check_dependency(id, on)
            .map_err(|e| match e {
                GraphError::ItemNotFound(missing) => TrackerError::NotFound(missing),
                other => other.into(),
            })?;

        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.add_dependency(on.clone(), now).then_some(item))
        })?;
        Ok(updated.is_some())
    }

    /// Returns false if the dependency was not present
    pub fn remove_dependency(&self, id: &ItemId, on: &ItemId) -> Result<bool> {
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.remove_dependency(on, now).then_some(item))
        })?;
        Ok(updated.is_some())
    }

    /// Sets or clears the explicit priority
    pub fn set_priority(&self, id: &ItemId, priority: Option<i64>) -> Result<bool> {
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            if item.priority == priority {
                return Ok::<_, TrackerError>(None);
            }
            item.priority = priority;
            let message = match priority {
                Some(p) => format!("priority set to {p}"),
                None => "priority cleared".to_string(),
            };
            item.record("priority", message, now);
            Ok(Some(item))
        })?;
        Ok(updated.is_some())
    }

    /// Applies a status transition as one locked read-modify-write
    pub fn set_status(
        &self,
        id: &ItemId,
        status: Status,
        opts: &StatusOptions,
    ) -> Result<WorkItem> {
        if let Some(original) = &opts.duplicate_of {
            if original == id {
                return Err(StatusError::DuplicateOfSelf(id.clone()).into());
            }
            if !self.store.exists(original) {
                return Err(TrackerError::NotFound(original.clone()));
            }
        }

        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            apply_status(&mut item, status, opts, now)?;
            Ok::<_, TrackerError>(Some(item))
        })?;
        let item = updated.ok_or_else(|| TrackerError::NotFound(id.clone()))?;
        info!(item = %id, status = %status, "status changed");
        Ok(item)
    }

    /// Parses `status` first, so an unknown name is rejected before any read
    pub fn set_status_str(
        &self,
        id: &ItemId,
        status: &str,
        opts: &StatusOptions,
    ) -> Result<WorkItem> {
        let status: Status = status.parse()?;
        self.set_status(id, status, opts)
    }

    /// Claims `id` if it is available at `now`; `None` if it is not.
    ///
    /// Availability is re-checked under the item lock, so of two racing
    /// callers at most one gets `Some`.
    pub fn try_claim(
        &self,
        id: &ItemId,
        holder: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        let opts = StatusOptions::claim(holder, lease);
        self.store.update_item(id, |mut item| {
            if !item.is_available(now) {
                return Ok(None);
            }
            apply_status(&mut item, Status::Claimed, &opts, now)?;
            Ok::<_, TrackerError>(Some(item))
        })
    }

    /// Claims a specific item, failing if someone else holds it
    pub fn claim(&self, id: &ItemId, holder: &str, lease: Duration) -> Result<WorkItem> {
        self.try_claim(id, holder, lease, Utc::now())?
            .ok_or_else(|| TrackerError::Unavailable(id.clone()))
    }

    /// Clears the lease without changing anything else.
    ///
    /// Returns false if the item was not leased.
    pub fn release(&self, id: &ItemId) -> Result<bool> {
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            if item.lease_until.is_none() && item.lease_holder.is_none() {
                return Ok::<_, TrackerError>(None);
            }
            let holder = item.lease_holder.clone().unwrap_or_else(|| "unknown".to_string());
            item.clear_lease();
            item.record("released", format!("lease held by {holder} released"), now);
            Ok(Some(item))
        })?;
        Ok(updated.is_some())
    }

    pub fn mark_done(&self, id: &ItemId) -> Result<WorkItem> {
        self.set_status(id, Status::Done, &StatusOptions::default())
    }

    pub fn add_tag(&self, id: &ItemId, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.add_tag(tag, now).then_some(item))
        })?;
        Ok(updated.is_some())
    }

    pub fn remove_tag(&self, id: &ItemId, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.remove_tag(tag, now).then_some(item))
        })?;
        Ok(updated.is_some())
    }

    /// Upserts a note. Returns false if it already had this text.
    pub fn set_note(&self, id: &ItemId, name: &str, text: &str) -> Result<bool> {
        let now = Utc::now();
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.set_note(name, text, now).then_some(item))
        })?;
        Ok(updated.is_some())
    }

    pub fn list_available(&self, tag: Option<&str>) -> Result<Available> {
        self.list_available_at(tag, Utc::now())
    }

    /// Items eligible for work at `now`.
    ///
    /// An item is eligible when it is available, every dependency exists and
    /// is done, and it carries `tag` if one is given. Expired leases found
    /// along the way are cleared and logged before the check.
    pub fn list_available_at(&self, tag: Option<&str>, now: DateTime<Utc>) -> Result<Available> {
        let snapshot = self.store.list()?;
        let done_ids: HashSet<ItemId> = snapshot
            .iter()
            .filter(|item| item.done)
            .map(|item| item.id.clone())
            .collect();

        let mut items = Vec::new();
        let mut reconciled = Vec::new();
        for item in snapshot {
            let item = if item.lease_expired(now) {
                let Some((fresh, cleared)) = self.settle_expired(&item.id, now)? else {
                    continue;
                };
                if cleared {
                    reconciled.push(fresh.id.clone());
                }
                fresh
            } else {
                item
            };

            if !item.is_available(now) || !item.dependencies_done(&done_ids) {
                continue;
            }
            if let Some(tag) = tag {
                if !item.has_tag(tag) {
                    continue;
                }
            }
            items.push(item);
        }

        Ok(Available { items, reconciled })
    }

    /// Current state of an item whose snapshot showed an expired lease.
    ///
    /// Returns the item and whether this call cleared the lease, or `None`
    /// if the item was deleted meanwhile. Another worker may already have
    /// cleared or re-claimed it, so the stored record wins over the snapshot.
    fn settle_expired(&self, id: &ItemId, now: DateTime<Utc>) -> Result<Option<(WorkItem, bool)>> {
        match self.reconcile_lease(id, now) {
            Ok(Some(fresh)) => Ok(Some((fresh, true))),
            Ok(None) => match self.store.get(id) {
                Ok(current) => Ok(Some((current, false))),
                Err(StoreError::NotFound(_)) => Ok(None),
                Err(e) => Err(e.into()),
            },
            Err(TrackerError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn reconcile_lease(&self, id: &ItemId, now: DateTime<Utc>) -> Result<Option<WorkItem>> {
        let updated = self.store.update_item(id, |mut item| {
            Ok::<_, TrackerError>(item.reconcile_expired_lease(now).then_some(item))
        })?;
        if updated.is_some() {
            warn!(item = %id, "cleared expired lease");
        }
        Ok(updated)
    }

    /// Items waiting for review, sorted by id
    pub fn list_review_ready(&self) -> Result<Vec<WorkItem>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(WorkItem::is_review_ready)
            .collect())
    }

    /// Open items in dependency order, or id order if a cycle is found
    pub fn ordered(&self) -> Result<Ordered> {
        let open: Vec<WorkItem> = self.store.list()?.into_iter().filter(|i| !i.done).collect();
        let order = topo_order(&open);
        if order.acyclic {
            return Ok(Ordered {
                items: order.items,
                acyclic: true,
            });
        }

        warn!(
            ordered = order.items.len(),
            total = open.len(),
            "dependency cycle found; falling back to id order"
        );
        Ok(Ordered {
            items: open,
            acyclic: false,
        })
    }

    /// Atomically picks the head of the available queue, claims it and
    /// points the current pointer at it.
    ///
    /// Takes the pointer lock first, then each candidate's item lock. If a
    /// candidate is taken between listing and claiming, the next one is
    /// tried. Returns `None` when nothing could be claimed.
    pub fn claim_next(
        &self,
        tag: Option<&str>,
        holder: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItem>> {
        let mut claimed = None;
        self.pointer.update(|current| {
            let available = self.list_available_at(tag, now)?;
            let order = topo_order(&available.items);
            for candidate in &order.items {
                if let Some(item) = self.try_claim(&candidate.id, holder, lease, now)? {
                    let id = item.id.clone();
                    claimed = Some(item);
                    return Ok::<_, TrackerError>(Some(id));
                }
                debug!(item = %candidate.id, "candidate taken by another worker");
            }
            Ok(current)
        })?;
        Ok(claimed)
    }

    /// Marks review-ready items whose branch has been merged as done.
    ///
    /// `is_merged` is asked about every review-ready item that records a
    /// `branch` note. Returns the ids that were finalized.
    pub fn sweep_merged<F>(&self, mut is_merged: F) -> Result<Vec<ItemId>>
    where
        F: FnMut(&WorkItem, &str) -> bool,
    {
        let mut finalized = Vec::new();
        for item in self.list_review_ready()? {
            let Some(branch) = item.branch() else {
                continue;
            };
            if !is_merged(&item, branch) {
                continue;
            }
            let opts = StatusOptions {
                message: Some(format!("branch {branch} merged")),
                ..StatusOptions::default()
            };
            self.set_status(&item.id, Status::Done, &opts)?;
            finalized.push(item.id.clone());
        }
        Ok(finalized)
    }
}
