//! Logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber for the process. `RUST_LOG`,
//! when set, takes precedence over `application.log_level`.

use tracing_subscriber::EnvFilter;

use crate::config::SlmConfig;

/// Filter built from `RUST_LOG`, falling back to `default_level`.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber using the configured log level.
///
/// # Errors
/// Fails when a global subscriber is already installed.
pub fn init_from_config(config: &SlmConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(&config.application.log_level))
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}
