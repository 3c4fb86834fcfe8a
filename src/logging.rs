//! Subscriber initialisation for binaries and tests embedding the crate.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Installs a global `tracing` subscriber.
///
/// `RUST_LOG` wins over [`LoggingConfig::level`]. Returns `false` if a
/// global subscriber was already set, which is not an error.
pub fn init(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = if config.json {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    };
    if installed {
        tracing::debug!(level = %config.level, json = config.json, "logging initialised");
    }
    installed
}
