//! Synchronization layer configuration.
//!
//! Configuration can be loaded from:
//! 1. TOML file (`office-sync.toml`)
//! 2. Environment variables (with `OFFICE_SYNC_` prefix)
//!
//! Environment variables override TOML configuration.
//!
//! # Example TOML Configuration
//!
//! ```toml
//! [sync]
//! tasks_collection = "tasks"
//! users_collection = "users"
//! surface = "toast"
//! toast_capacity = 8
//!
//! [sync.logging]
//! level = "office_sync=debug"
//! json = false
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::listener::SurfacePolicy;

/// Default configuration file name, resolved against the working directory.
pub const CONFIG_FILE: &str = "office-sync.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "OFFICE_SYNC_";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote collection holding task documents.
    pub tasks_collection: String,

    /// Remote collection holding user documents.
    pub users_collection: String,

    /// How the global listener surfaces permission errors.
    pub surface: SurfacePolicy,

    /// Maximum queued toasts before the oldest is dropped.
    pub toast_capacity: usize,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tasks_collection: "tasks".to_string(),
            users_collection: "users".to_string(),
            surface: SurfacePolicy::Boundary,
            toast_capacity: 16,
            logging: LoggingConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Load configuration from file and environment.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. `office-sync.toml` in the working directory
    /// 3. Default values
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = if let Ok(contents) = std::fs::read_to_string(CONFIG_FILE) {
            Self::from_toml(&contents)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply the
    /// environment.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error: e.to_string(),
        })?;
        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML content.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        #[derive(Deserialize)]
        struct FullConfig {
            #[serde(default)]
            sync: SyncConfig,
        }

        let full: FullConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        full.sync.validate()?;
        Ok(full.sync)
    }

    /// Apply `OFFICE_SYNC_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from `lookup`, keyed by full variable name.
    ///
    /// Unparsable values are ignored with a warning.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = var("TASKS_COLLECTION") {
            self.tasks_collection = v;
        }
        if let Some(v) = var("USERS_COLLECTION") {
            self.users_collection = v;
        }
        if let Some(v) = var("SURFACE") {
            match v.parse() {
                Ok(surface) => self.surface = surface,
                Err(e) => tracing::warn!(value = %v, error = %e, "ignoring OFFICE_SYNC_SURFACE"),
            }
        }
        if let Some(v) = var("TOAST_CAPACITY") {
            match v.parse() {
                Ok(capacity) => self.toast_capacity = capacity,
                Err(e) => {
                    tracing::warn!(value = %v, error = %e, "ignoring OFFICE_SYNC_TOAST_CAPACITY");
                },
            }
        }
        if let Some(v) = var("LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("LOG_JSON") {
            if let Ok(json) = v.parse() {
                self.logging.json = json;
            }
        }
    }

    /// Checks values serde cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tasks_collection.is_empty() || self.users_collection.is_empty() {
            return Err(ConfigError::Invalid(
                "collection names must not be empty".to_string(),
            ));
        }
        if self.tasks_collection == self.users_collection {
            return Err(ConfigError::Invalid(format!(
                "tasks and users share the collection '{}'",
                self.tasks_collection
            )));
        }
        if self.surface == SurfacePolicy::Toast && self.toast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "toast surface needs a non-zero toast_capacity".to_string(),
            ));
        }
        Ok(())
    }

    /// Set the tasks collection.
    pub fn with_tasks_collection(mut self, name: impl Into<String>) -> Self {
        self.tasks_collection = name.into();
        self
    }

    /// Set the users collection.
    pub fn with_users_collection(mut self, name: impl Into<String>) -> Self {
        self.users_collection = name.into();
        self
    }

    /// Set the surface policy.
    pub fn with_surface(mut self, surface: SurfacePolicy) -> Self {
        self.surface = surface;
        self
    }

    /// Set the toast queue capacity.
    pub fn with_toast_capacity(mut self, capacity: usize) -> Self {
        self.toast_capacity = capacity;
        self
    }

    /// Set the logging configuration.
    pub fn with_logging(mut self, logging: LoggingConfig) -> Self {
        self.logging = logging;
        self
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// IO error reading configuration file.
    #[error("failed to read config file '{path}': {error}")]
    Io {
        /// Path to the configuration file.
        path: String,
        /// Error message.
        error: String,
    },

    /// Parse error in configuration.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
}
