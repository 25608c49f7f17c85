//! Diagnostic tracing
//!
//! - **Tracing (this module)**: diagnostics via `RUST_LOG`, written to
//!   stderr. Not part of command output.
//! - **Audit log** (`.docket/agent.log`): product artifact of the agent
//!   loop, always written, unaffected by `RUST_LOG`.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs the stderr subscriber.
///
/// `RUST_LOG` wins when set. Otherwise the level is `warn`, or `debug` for
/// this crate when `verbose` is true. Calling it twice is harmless.
pub fn init(verbose: bool) {
    let default = if verbose { "warn,docket=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .try_init();
}
