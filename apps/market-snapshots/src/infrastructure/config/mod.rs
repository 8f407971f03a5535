//! Configuration for the market snapshot service.
//!
//! YAML with `${VAR}` / `${VAR:-default}` interpolation, validated on load.
//!
//! # Usage
//!
//! ```rust,ignore
//! use market_snapshots::infrastructure::config::load_config;
//!
//! // MARKET_SNAPSHOTS_CONFIG, then ./config.yaml, then built-in defaults
//! let config = load_config(None)?;
//!
//! // Explicit path: the file must exist
//! let config = load_config(Some("deploy/config.yaml"))?;
//! ```

mod observability;
mod pipeline;
mod server;
mod sources;
mod storage;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::services::RegisteredSource;

pub use observability::{LoggingConfig, ObservabilityConfig};
pub use pipeline::{CodecSettings, CollectorSettings, QuerySettings, SchedulerSettings};
pub use server::ServerConfig;
pub use sources::{DedupSelector, SourceConfig, SourceKind};
pub use storage::{StorageBackend, StorageConfig};

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "MARKET_SNAPSHOTS_CONFIG";

/// Config file used when neither a path nor the env var is given.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        /// Path to the config file.
        path: String,
        /// The underlying IO error.
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("Failed to parse config YAML: {0}")]
    ParseError(#[from] serde_yaml_bw::Error),

    /// Configuration validation failed.
    #[error("Config validation failed: {0}")]
    ValidationError(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// HTTP server.
    #[serde(default)]
    pub server: ServerConfig,
    /// Document storage.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Collector tuning.
    #[serde(default)]
    pub collector: CollectorSettings,
    /// Collection schedule.
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    /// Query limits.
    #[serde(default)]
    pub query: QuerySettings,
    /// Storage codec.
    #[serde(default)]
    pub codec: CodecSettings,
    /// Market data sources, collected in this order.
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Logging.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Build every configured source adapter.
    ///
    /// HTTP sources use the collector's fetch timeout as their request timeout.
    pub fn build_sources(&self) -> Result<Vec<RegisteredSource>, ConfigError> {
        let timeout = self.collector.to_collector_config().fetch_timeout;
        self.sources.iter().map(|s| s.build(timeout)).collect()
    }
}

// ============================================
// Configuration Loading
// ============================================

/// Load configuration from a YAML file with environment variable interpolation.
///
/// With no path, `MARKET_SNAPSHOTS_CONFIG` is used, then `config.yaml`; a
/// missing default file yields the built-in defaults. An explicit path must
/// exist.
///
/// # Errors
///
/// Returns a `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_string(), true),
        None => match std::env::var(CONFIG_PATH_ENV) {
            Ok(p) if !p.is_empty() => (p, true),
            _ => (DEFAULT_CONFIG_PATH.to_string(), false),
        },
    };

    if !explicit && !Path::new(&path).exists() {
        tracing::info!(path = %path, "No config file found, using defaults");
        let config = Config::default();
        validate_config(&config)?;
        return Ok(config);
    }

    let contents = std::fs::read_to_string(&path).map_err(|e| ConfigError::ReadError {
        path: path.clone(),
        source: e,
    })?;

    load_config_from_string(&contents)
}

/// Load configuration from a YAML string.
///
/// # Errors
///
/// Returns a `ConfigError` if the YAML cannot be parsed or validated.
pub fn load_config_from_string(yaml: &str) -> Result<Config, ConfigError> {
    let interpolated = interpolate_env_vars(yaml);
    let config: Config = serde_yaml_bw::from_str(&interpolated)?;
    validate_config(&config)?;
    Ok(config)
}

/// Interpolate environment variables in a string.
///
/// Supports both `${VAR}` and `${VAR:-default}` syntax. Unset or empty
/// variables take the default, or the empty string without one.
#[allow(clippy::expect_used)] // Constant pattern
fn interpolate_env_vars(input: &str) -> String {
    use std::sync::OnceLock;

    static ENV_VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

    let re = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var regex is valid")
    });

    re.replace_all(input, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map_or("", |m| m.as_str());
        match std::env::var(&cap[1]) {
            Ok(v) if !v.is_empty() => v,
            _ => default_value.to_string(),
        }
    })
    .into_owned()
}

/// Validate configuration values.
fn validate_config(config: &Config) -> Result<(), ConfigError> {
    let storage = &config.storage;
    if storage.current_collection.trim().is_empty() || storage.history_collection.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage collection names must not be empty".to_string(),
        ));
    }
    if storage.current_collection == storage.history_collection {
        return Err(ConfigError::ValidationError(
            "storage.current_collection and storage.history_collection must be different"
                .to_string(),
        ));
    }
    if storage.backend == StorageBackend::Turso && storage.path.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "storage.path is required for the turso backend".to_string(),
        ));
    }

    let collector = &config.collector;
    if collector.fetch_timeout_ms == 0 || collector.write_timeout_ms == 0 {
        return Err(ConfigError::ValidationError(
            "collector timeouts must be positive".to_string(),
        ));
    }
    if collector.max_concurrent_fetches == 0 {
        return Err(ConfigError::ValidationError(
            "collector.max_concurrent_fetches must be at least 1".to_string(),
        ));
    }

    if config.scheduler.interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "scheduler.interval_secs must be at least 1".to_string(),
        ));
    }

    let query = &config.query;
    if query.max_history_limit == 0 {
        return Err(ConfigError::ValidationError(
            "query.max_history_limit must be at least 1".to_string(),
        ));
    }
    if query.default_history_limit > query.max_history_limit {
        return Err(ConfigError::ValidationError(
            "query.default_history_limit must not exceed query.max_history_limit".to_string(),
        ));
    }

    let mut tags = HashSet::new();
    for source in &config.sources {
        source.validate()?;
        if !tags.insert(source.tag.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate source tag '{}'",
                source.tag
            )));
        }
    }

    let valid_formats = ["json", "pretty"];
    let format = config.observability.logging.format.to_ascii_lowercase();
    if !valid_formats.contains(&format.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "observability.logging.format must be one of: {valid_formats:?}"
        )));
    }

    Ok(())
}
