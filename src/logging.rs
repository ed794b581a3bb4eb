//! Tracing subscriber setup for binaries and integration tests.

use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, honoring `RUST_LOG`.
///
/// `debug` raises the default level when no `RUST_LOG` is set. Calling this
/// twice is harmless; the second installation is ignored.
pub fn init(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
