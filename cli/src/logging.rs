//! Tracing setup. Everything goes to stderr so stdout carries only markup.

use std::io;
use std::sync::Once;

use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_LEVEL: &str = "info";

static TRACING_INSTALLED: Once = Once::new();

/// Installs the global subscriber (idempotent).
///
/// `level` wins over `RUST_LOG`, which wins over the default.
pub fn init(level: Option<&str>) {
    TRACING_INSTALLED.call_once(|| {
        let filter = level.map_or_else(
            || {
                EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_LEVEL))
            },
            EnvFilter::new,
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_target(true)
            .try_init();
    });
}
