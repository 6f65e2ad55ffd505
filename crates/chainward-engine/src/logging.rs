//! `tracing` subscriber setup.

use tracing_subscriber::{fmt, EnvFilter};

use chainward_core::error::{ChainwardError, Result};

use crate::config::{LogFormat, LoggingSection};

/// Install the global subscriber. `RUST_LOG`, when set, overrides the
/// configured filter.
pub fn init(cfg: &LoggingSection) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::try_new(&cfg.filter).map_err(|e| {
            ChainwardError::Config(format!("logging.filter {:?} is invalid: {e}", cfg.filter))
        })?,
    };

    let installed = match cfg.format {
        LogFormat::Text => fmt().with_env_filter(filter).with_target(true).try_init(),
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .try_init(),
    };
    installed.map_err(|e| ChainwardError::Internal(format!("tracing init failed: {e}")))
}
