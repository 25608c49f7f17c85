//! Cooperative cancellation for the agent loop
//!
//! A [`CancelToken`] is cancelled either in-process via [`CancelToken::cancel`]
//! or from outside by creating its stop marker file (`docket agent stop`).
//! Waits wake early on in-process cancellation and re-check the marker a few
//! times per second.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Upper bound on how long a wait goes without checking the stop marker
const MARKER_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    state: Arc<(Mutex<bool>, Condvar)>,
    stop_marker: Option<PathBuf>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that is also cancelled when `path` exists
    pub fn with_stop_marker(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::default(),
            stop_marker: Some(path.into()),
        }
    }

    pub fn stop_marker(&self) -> Option<&Path> {
        self.stop_marker.as_deref()
    }

    pub fn cancel(&self) {
        let (flag, cond) = &*self.state;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.state;
        if *flag.lock().unwrap_or_else(|e| e.into_inner()) {
            return true;
        }
        self.stop_marker.as_deref().is_some_and(Path::exists)
    }

    /// Sleeps for up to `timeout`. Returns true if cancelled, early or not.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let (flag, cond) = &*self.state;
        loop {
            if self.is_cancelled() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let slice = (deadline - now).min(MARKER_POLL);
            let guard = flag.lock().unwrap_or_else(|e| e.into_inner());
            if *guard {
                return true;
            }
            let _ = cond
                .wait_timeout(guard, slice)
                .unwrap_or_else(|e| e.into_inner());
        }
    }
}
