//! Collector, scheduler, query and codec settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::services::{CollectorConfig, SchedulerConfig};
use crate::domain::codec::{Codec, DecodeMode};
use crate::domain::snapshot::WriteMode;

/// Collector settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectorSettings {
    /// Timeout for listing and for each detail fetch (milliseconds).
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    /// Timeout for the bulk write (milliseconds).
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Detail fetches in flight at once.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: default_fetch_timeout_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

impl CollectorSettings {
    /// Collector tuning.
    #[must_use]
    pub const fn to_collector_config(&self) -> CollectorConfig {
        CollectorConfig {
            fetch_timeout: Duration::from_millis(self.fetch_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Run scheduled cycles. Manual triggers work either way.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Seconds between cycles.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Run a cycle at startup.
    #[serde(default = "default_true")]
    pub run_immediately: bool,
    /// Write mode for scheduled cycles.
    #[serde(default)]
    pub mode: WriteMode,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            run_immediately: true,
            mode: WriteMode::default(),
        }
    }
}

impl SchedulerSettings {
    /// Scheduler settings for the service.
    #[must_use]
    pub const fn to_scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            interval: Duration::from_secs(self.interval_secs),
            run_immediately: self.run_immediately,
            mode: self.mode,
        }
    }
}

/// Query settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuerySettings {
    /// History limit when a request gives none.
    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,
    /// Cap applied to requested history limits.
    #[serde(default = "default_max_history_limit")]
    pub max_history_limit: usize,
}

impl Default for QuerySettings {
    fn default() -> Self {
        Self {
            default_history_limit: default_history_limit(),
            max_history_limit: default_max_history_limit(),
        }
    }
}

/// Codec settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodecSettings {
    /// Fail reads on malformed big-integer tags instead of substituting zero.
    #[serde(default)]
    pub strict_bigint_decode: bool,
}

impl CodecSettings {
    /// Codec used by the query side.
    #[must_use]
    pub const fn codec(&self) -> Codec {
        if self.strict_bigint_decode {
            Codec::with_mode(DecodeMode::Strict)
        } else {
            Codec::with_mode(DecodeMode::Lenient)
        }
    }
}

pub(crate) const fn default_true() -> bool {
    true
}

const fn default_fetch_timeout_ms() -> u64 {
    10_000
}

const fn default_write_timeout_ms() -> u64 {
    30_000
}

const fn default_max_concurrent_fetches() -> usize {
    8
}

const fn default_interval_secs() -> u64 {
    60
}

const fn default_history_limit() -> usize {
    50
}

const fn default_max_history_limit() -> usize {
    1000
}
