//! Logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber. Filter defaults to `info` and can be
/// overridden through `RUST_LOG`.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
