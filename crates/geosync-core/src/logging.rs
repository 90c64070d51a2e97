//! Tracing subscriber setup for the application shell.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber.
///
/// Filter defaults to `info` for the engine crates and can be overridden
/// through `RUST_LOG`. Calling this twice is harmless; the second call is
/// ignored.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,geosync_core=debug"));

    let _ = fmt().with_env_filter(filter).try_init();
}
