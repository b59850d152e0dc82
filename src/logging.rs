//! Tracing subscriber setup for embedding applications.

use crate::error::{GraphError, Result};
use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber with the given filter string.
///
/// Intended for embedding applications and tests; the engine itself only
/// emits events and never installs a subscriber.
pub fn init_logging(level: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(level)
                .map_err(|_| GraphError::InvalidConfig("invalid log filter"))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| GraphError::InvalidConfig("logging already initialized"))
}
