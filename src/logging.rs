//! Structured logging setup using `tracing-subscriber`.
//!
//! polboot runs as one-shot commands, so logging is console-only:
//! human-readable output to stderr, level controlled by the `RUST_LOG`
//! environment variable. Diagnostics name the path and the underlying OS
//! error; the machine-readable signal stays the process exit code.

use tracing_subscriber::EnvFilter;

/// Initialise stderr logging for CLI invocations.
///
/// Controlled by `RUST_LOG` (default: `info`).
pub fn init_cli() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}
