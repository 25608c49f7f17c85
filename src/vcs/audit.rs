//! Append-only audit sink for external commands and loop state changes

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

/// Timestamped line log. A disabled sink drops everything.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
        }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends one line. Write failures are logged, never returned.
    pub fn record(&self, line: impl AsRef<str>) {
        let Some(path) = &self.path else {
            return;
        };
        let stamped = format!(
            "{} {}\n",
            Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            line.as_ref().replace('\n', "\\n")
        );
        let result = path
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|_| OpenOptions::new().create(true).append(true).open(path))
            .and_then(|mut file| file.write_all(stamped.as_bytes()));
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to write audit log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn appends_timestamped_lines() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::new(dir.path().join("logs").join("agent.log"));

        audit.record("run: git status");
        audit.record("exit: 0\nwith newline");

        let content = fs::read_to_string(audit.path().unwrap()).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" run: git status"));
        assert!(lines[1].ends_with(" exit: 0\\nwith newline"));
    }

    #[test]
    fn disabled_sink_writes_nothing() {
        let audit = AuditLog::disabled();
        audit.record("ignored");
        assert!(audit.path().is_none());
    }
}
