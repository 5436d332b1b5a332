//! Structured logging setup.
//!
//! Installs a global `tracing-subscriber` fmt subscriber from [`LoggingConfig`].
//! `RUST_LOG` overrides the configured level when set. Calling [`init_logging`]
//! again after a subscriber is installed is a no-op.

use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{RpcError, Result};

/// Install the global subscriber described by `config`.
///
/// Logs go to the file at `log_file_path` when `log_to_file` is set, otherwise
/// to stdout. File output never uses ANSI colors.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(config.log_level).into())
        .from_env_lossy();

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.log_to_file {
        let path = config.log_file_path.as_deref().ok_or_else(|| {
            RpcError::ConfigError("log_file_path must be set when log_to_file is true".into())
        })?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let builder = builder.with_ansi(false).with_writer(Mutex::new(file));
        if config.json_format {
            builder.json().try_init()
        } else {
            builder.try_init()
        }
    } else if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    match installed {
        Ok(()) => info!(
            app = %config.app_name,
            level = %config.log_level,
            json = config.json_format,
            "Logging initialized"
        ),
        Err(e) => debug!(error = %e, "Subscriber already installed"),
    }
    Ok(())
}
