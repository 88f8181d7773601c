//! Tracing setup
//!
//! Diagnostics go to stderr; stdout is reserved for log-mode readings and
//! the export document.
//!
//! Environment variables:
//!   RUST_LOG                          # Log filter (default: config logging.level)

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

/// Initialize console tracing; `RUST_LOG` wins over `default_level`
pub fn init_tracing(default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow!(err))
}
