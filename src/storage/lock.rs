//! Scoped record locks
//!
//! Each logical record (one work item, or the current pointer) has a
//! sidecar lock file. Acquiring a [`RecordLock`] takes an `fs2` advisory
//! lock on that file plus an in-process guard keyed by the same path, so
//! threads in one process and separate processes are both serialized.
//! Dropping the lock releases both, on every exit path.
//!
//! If the platform reports advisory locks as unsupported, the lock degrades
//! to the in-process guard alone and logs a warning once. Separate processes
//! are then not serialized against each other.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, OnceLock};

use fs2::FileExt;
use tracing::warn;

/// How a lock is held
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug, Default)]
struct Holders {
    readers: usize,
    writer: bool,
}

impl Holders {
    fn admits(&self, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => !self.writer,
            LockMode::Exclusive => !self.writer && self.readers == 0,
        }
    }
}

#[derive(Default)]
struct LocalLocks {
    held: Mutex<HashMap<PathBuf, Holders>>,
    released: Condvar,
}

fn local_locks() -> &'static LocalLocks {
    static LOCKS: OnceLock<LocalLocks> = OnceLock::new();
    LOCKS.get_or_init(LocalLocks::default)
}

fn lock_table(locks: &LocalLocks) -> MutexGuard<'_, HashMap<PathBuf, Holders>> {
    // A poisoned table only means another thread panicked while holding the
    // std mutex; the counts it guards are still consistent.
    locks.held.lock().unwrap_or_else(|e| e.into_inner())
}

/// In-process half of a record lock
struct LocalGuard {
    path: PathBuf,
    mode: LockMode,
}

impl LocalGuard {
    fn acquire(path: &Path, mode: LockMode) -> Self {
        let locks = local_locks();
        let mut table = lock_table(locks);
        loop {
            let holders = table.entry(path.to_path_buf()).or_default();
            if holders.admits(mode) {
                match mode {
                    LockMode::Shared => holders.readers += 1,
                    LockMode::Exclusive => holders.writer = true,
                }
                break;
            }
            table = locks
                .released
                .wait(table)
                .unwrap_or_else(|e| e.into_inner());
        }
        Self {
            path: path.to_path_buf(),
            mode,
        }
    }
}

impl Drop for LocalGuard {
    fn drop(&mut self) {
        let locks = local_locks();
        let mut table = lock_table(locks);
        if let Some(holders) = table.get_mut(&self.path) {
            match self.mode {
                LockMode::Shared => holders.readers = holders.readers.saturating_sub(1),
                LockMode::Exclusive => holders.writer = false,
            }
            if holders.readers == 0 && !holders.writer {
                table.remove(&self.path);
            }
        }
        locks.released.notify_all();
    }
}

fn advisory_locks_unsupported(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::Unsupported {
        return true;
    }
    // ENOLCK, ENOSYS and EOPNOTSUPP on Linux
    #[cfg(target_os = "linux")]
    if matches!(err.raw_os_error(), Some(37) | Some(38) | Some(95)) {
        return true;
    }
    false
}

static FALLBACK_WARNED: AtomicBool = AtomicBool::new(false);

/// A held lock on one record. Released on drop.
pub struct RecordLock {
    // Field order matters: the file lock is released before the local guard,
    // so a thread woken by the guard never blocks on our file lock.
    file: Option<File>,
    _local: LocalGuard,
}

impl RecordLock {
    /// Blocks until the lock at `lock_path` is held in `mode`.
    ///
    /// The lock file and its parent directory are created if missing.
    pub fn acquire(lock_path: &Path, mode: LockMode) -> io::Result<Self> {
        let local = LocalGuard::acquire(lock_path, mode);

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(lock_path)?;

        let locked = match mode {
            LockMode::Shared => file.lock_shared(),
            LockMode::Exclusive => file.lock_exclusive(),
        };

        let file = match locked {
            Ok(()) => Some(file),
            Err(e) if advisory_locks_unsupported(&e) => {
                if !FALLBACK_WARNED.swap(true, Ordering::Relaxed) {
                    warn!(
                        path = %lock_path.display(),
                        error = %e,
                        "advisory file locks unsupported; serializing within this process only"
                    );
                }
                None
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            file,
            _local: local,
        })
    }

    pub fn shared(lock_path: &Path) -> io::Result<Self> {
        Self::acquire(lock_path, LockMode::Shared)
    }

    pub fn exclusive(lock_path: &Path) -> io::Result<Self> {
        Self::acquire(lock_path, LockMode::Exclusive)
    }
}

impl Drop for RecordLock {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = FileExt::unlock(&file);
        }
    }
}
