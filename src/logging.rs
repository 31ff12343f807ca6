//! Tracing subscriber setup for binaries and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a formatted subscriber filtered by `OBJGATE_LOG` (falling back
/// to `RUST_LOG`, then `info`). Safe to call more than once; only the
/// first call installs.
pub fn init() {
    let filter = std::env::var("OBJGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    let _ = fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .try_init();
}
