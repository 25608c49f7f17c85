//! External command execution
//!
//! Everything that leaves the process (git, the agent command) goes through
//! [`CommandRunner`], so the loop and the worktree logic can be driven by a
//! scripted runner in tests.

use std::io::{self, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, warn};

/// Captured result of one external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Convenience constructor for scripted runners
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs `argv` in `cwd` with extra environment variables.
///
/// An `Err` means the command could not be started at all; a non-zero exit
/// is an `Ok` output with a failing status.
pub trait CommandRunner: Send + Sync {
    fn run(&self, cwd: &Path, env: &[(&str, &str)], argv: &[&str]) -> io::Result<CommandOutput>;
}

/// Bytes of stdout, and separately of stderr, kept per command
pub const MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// Runs commands with `std::process::Command`, capturing stdout and stderr
/// up to [`MAX_CAPTURE_BYTES`] each
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cwd: &Path, env: &[(&str, &str)], argv: &[&str]) -> io::Result<CommandOutput> {
        run_limited(cwd, env, argv, MAX_CAPTURE_BYTES)
    }
}

fn run_limited(cwd: &Path, env: &[(&str, &str)], argv: &[&str], limit: usize) -> io::Result<CommandOutput> {
    let Some((program, args)) = argv.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command line"));
    };
    debug!(program, cwd = %cwd.display(), "spawning command");

    let mut child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .envs(env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    let stdout = child.stdout.take().ok_or_else(|| io::Error::other("stdout not captured"))?;
    let stderr = child.stderr.take().ok_or_else(|| io::Error::other("stderr not captured"))?;
    let stdout_handle = thread::spawn(move || read_stream_limited(stdout, limit));
    let stderr_handle = thread::spawn(move || read_stream_limited(stderr, limit));

    let status = child.wait()?;
    let (stdout, stdout_truncated) = join_output(stdout_handle)?;
    let (stderr, stderr_truncated) = join_output(stderr_handle)?;
    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(program, stdout_truncated, stderr_truncated, "command output truncated");
    }

    Ok(CommandOutput {
        status: status.code(),
        stdout: with_notice(&stdout, "stdout", stdout_truncated),
        stderr: with_notice(&stderr, "stderr", stderr_truncated),
    })
}

/// Keeps the first `limit` bytes and drains the rest so the child never
/// blocks on a full pipe. Returns the kept bytes and the dropped count.
fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> io::Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}

fn join_output(handle: thread::JoinHandle<io::Result<(Vec<u8>, usize)>>) -> io::Result<(Vec<u8>, usize)> {
    handle
        .join()
        .unwrap_or_else(|_| Err(io::Error::other("output reader thread panicked")))
}

fn with_notice(bytes: &[u8], label: &str, truncated: usize) -> String {
    let mut text = String::from_utf8_lossy(bytes).into_owned();
    if truncated > 0 {
        text.push_str(&format!("\n[{label} truncated {truncated} bytes]\n"));
    }
    text
}

/// Renders an argv for logs
pub fn display_command(argv: &[&str]) -> String {
    argv.iter()
        .map(|arg| shell_words::quote(arg).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
