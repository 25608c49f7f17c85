//! One JSON document per work item
//!
//! Items live in `.docket/items/{id}.json`. Every access takes the record's
//! lock from `.docket/locks/{id}.lock`: shared for reads, exclusive for
//! writes. Writes go to a temp file that is renamed over the record, so a
//! reader never observes a partial document.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

use super::lock::RecordLock;
use crate::domain::{ItemId, WorkItem};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Item not found: {0}")]
    NotFound(ItemId),

    #[error("Item already exists: {0}")]
    AlreadyExists(ItemId),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to lock {}: {source}", path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Update changed item id from {expected} to {found}")]
    IdChanged { expected: ItemId, found: ItemId },
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Store for work items
#[derive(Debug, Clone)]
pub struct ItemStore {
    dir: PathBuf,
    lock_dir: PathBuf,
}

impl ItemStore {
    pub fn new(dir: impl Into<PathBuf>, lock_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock_dir: lock_dir.into(),
        }
    }

    /// Creates the default store for a project
    pub fn for_project(project_root: &Path) -> Self {
        let docket = project_root.join(".docket");
        Self::new(docket.join("items"), docket.join("locks"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn record_path(&self, id: &ItemId) -> PathBuf {
        self.dir.join(format!("{}.json", id.file_stem()))
    }

    fn lock_path(&self, id: &ItemId) -> PathBuf {
        self.lock_dir.join(format!("{}.lock", id.file_stem()))
    }

    fn lock_shared(&self, id: &ItemId) -> Result<RecordLock, StoreError> {
        let path = self.lock_path(id);
        RecordLock::shared(&path).map_err(|source| StoreError::Lock { path, source })
    }

    fn lock_exclusive(&self, id: &ItemId) -> Result<RecordLock, StoreError> {
        let path = self.lock_path(id);
        RecordLock::exclusive(&path).map_err(|source| StoreError::Lock { path, source })
    }

    /// Reads the record. Caller must hold the record lock.
    fn read_locked(&self, id: &ItemId) -> Result<WorkItem, StoreError> {
        let path = self.record_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(id.clone()))
            }
            Err(e) => return Err(StoreError::io(&path, e)),
        };
        serde_json::from_str(&content).map_err(|source| StoreError::Parse { path, source })
    }

    /// Replaces the record. Caller must hold the exclusive record lock.
    fn write_locked(&self, item: &WorkItem) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir).map_err(|e| StoreError::io(&self.dir, e))?;

        let path = self.record_path(&item.id);
        let temp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&temp_path).map_err(|e| StoreError::io(&temp_path, e))?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer_pretty(&mut writer, item).map_err(|source| {
                StoreError::Parse {
                    path: temp_path.clone(),
                    source,
                }
            })?;
            writer
                .write_all(b"\n")
                .and_then(|_| writer.flush())
                .map_err(|e| StoreError::io(&temp_path, e))?;
        }
        fs::rename(&temp_path, &path).map_err(|e| StoreError::io(&path, e))
    }

    pub fn exists(&self, id: &ItemId) -> bool {
        self.record_path(id).is_file()
    }

    /// Reads one item under a shared lock
    pub fn get(&self, id: &ItemId) -> Result<WorkItem, StoreError> {
        let _lock = self.lock_shared(id)?;
        self.read_locked(id)
    }

    /// Writes an item, replacing any existing record
    pub fn put(&self, item: &WorkItem) -> Result<(), StoreError> {
        let _lock = self.lock_exclusive(&item.id)?;
        self.write_locked(item)
    }

    /// Writes a new item, failing if the id is taken
    pub fn create(&self, item: &WorkItem) -> Result<(), StoreError> {
        let _lock = self.lock_exclusive(&item.id)?;
        if self.exists(&item.id) {
            return Err(StoreError::AlreadyExists(item.id.clone()));
        }
        self.write_locked(item)
    }

    /// Removes an item
    pub fn delete(&self, id: &ItemId) -> Result<(), StoreError> {
        let _lock = self.lock_exclusive(id)?;
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(StoreError::NotFound(id.clone())),
            Err(e) => Err(StoreError::io(&path, e)),
        }
    }

    /// Ids of every record on disk, sorted
    pub fn ids(&self) -> Result<Vec<ItemId>, StoreError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&self.dir, e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match stem.parse::<ItemId>() {
                Ok(id) => ids.push(id),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping non-item file"),
            }
        }
        ids.sort();
        Ok(ids)
    }

    /// Snapshot of every item, sorted by id.
    ///
    /// Records that vanish or fail to parse between listing and reading are
    /// skipped with a warning.
    pub fn list(&self) -> Result<Vec<WorkItem>, StoreError> {
        let mut items = Vec::new();
        for id in self.ids()? {
            match self.get(&id) {
                Ok(item) => items.push(item),
                Err(StoreError::NotFound(_)) => {}
                Err(e @ StoreError::Parse { .. }) => {
                    warn!(item = %id, error = %e, "skipping unreadable item record");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(items)
    }

    /// Locked read-modify-write of one item.
    ///
    /// Holds the exclusive record lock while re-reading the record from
    /// disk and calling `f` with it. If `f` returns `Ok(Some(item))` the
    /// record is replaced and the new value returned. `Ok(None)` leaves the
    /// record untouched. An error from `f` aborts without writing.
    pub fn update_item<F, E>(&self, id: &ItemId, f: F) -> Result<Option<WorkItem>, E>
    where
        F: FnOnce(WorkItem) -> Result<Option<WorkItem>, E>,
        E: From<StoreError>,
    {
        let _lock = self.lock_exclusive(id)?;
        let current = self.read_locked(id)?;

        let Some(updated) = f(current)? else {
            return Ok(None);
        };
        if updated.id != *id {
            return Err(StoreError::IdChanged {
                expected: id.clone(),
                found: updated.id,
            }
            .into());
        }

        self.write_locked(&updated)?;
        Ok(Some(updated))
    }
}
