//! Tracing subscriber setup for binaries and tests that embed the loop.

use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber on stderr, filtered by `RUST_LOG` (default `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .try_init();
}
