//! The "current item" pointer
//!
//! A single optional item id stored in `.docket/current`. Reads are
//! unlocked best-effort snapshots. Every write goes through [`CurrentPointer::update`],
//! which holds the pointer's lock for the whole read-modify-write.
//!
//! Callers that also touch an item record take the pointer lock first and
//! the item lock second.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::items::StoreError;
use super::lock::RecordLock;
use crate::domain::ItemId;

#[derive(Debug, Clone)]
pub struct CurrentPointer {
    path: PathBuf,
    lock_path: PathBuf,
}

impl CurrentPointer {
    pub fn new(path: impl Into<PathBuf>, lock_path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_path: lock_path.into(),
        }
    }

    pub fn for_project(project_root: &Path) -> Self {
        let docket = project_root.join(".docket");
        Self::new(docket.join("current"), docket.join("locks").join("current.lock"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<ItemId>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };

        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }
        match content.parse() {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring malformed current pointer");
                Ok(None)
            }
        }
    }

    fn write(&self, value: Option<&ItemId>) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        match value {
            Some(id) => {
                if let Some(parent) = self.path.parent() {
                    fs::create_dir_all(parent).map_err(io_err)?;
                }
                let temp_path = self.path.with_extension("tmp");
                fs::write(&temp_path, format!("{id}\n")).map_err(io_err)?;
                fs::rename(&temp_path, &self.path).map_err(io_err)
            }
            None => match fs::remove_file(&self.path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_err(e)),
            },
        }
    }

    /// Unlocked snapshot of the pointer
    pub fn get(&self) -> Result<Option<ItemId>, StoreError> {
        self.read()
    }

    /// Locked read-modify-write.
    ///
    /// `f` receives the current value and returns the new one. The pointer
    /// is only rewritten when the value changes. An error from `f` leaves it
    /// untouched.
    pub fn update<F, E>(&self, f: F) -> Result<Option<ItemId>, E>
    where
        F: FnOnce(Option<ItemId>) -> Result<Option<ItemId>, E>,
        E: From<StoreError>,
    {
        let _lock = RecordLock::exclusive(&self.lock_path).map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        let current = self.read()?;
        let next = f(current.clone())?;
        if next != current {
            self.write(next.as_ref())?;
        }
        Ok(next)
    }

    pub fn set(&self, id: &ItemId) -> Result<(), StoreError> {
        self.update(|_| Ok::<_, StoreError>(Some(id.clone())))
            .map(|_| ())
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.update(|_| Ok::<_, StoreError>(None)).map(|_| ())
    }

    /// Clears the pointer only if it names `id`. Returns whether it did.
    pub fn clear_if(&self, id: &ItemId) -> Result<bool, StoreError> {
        let mut cleared = false;
        self.update(|current| {
            if current.as_ref() == Some(id) {
                cleared = true;
                Ok::<_, StoreError>(None)
            } else {
                Ok(current)
            }
        })?;
        Ok(cleared)
    }
}
