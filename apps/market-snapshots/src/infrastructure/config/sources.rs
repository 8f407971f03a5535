//! Market data source configuration and construction.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::application::ports::MarketDataSource;
use crate::application::services::RegisteredSource;
use crate::domain::snapshot::DedupStrategy;
use crate::infrastructure::sources::{
    HttpJsonSource, HttpSourceConfig, KEY_PLACEHOLDER, StaticMarketDataSource,
};

/// Source adapter kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// JSON listing and detail endpoints.
    Http,
    /// Payloads given inline in the config.
    Static,
}

/// Dedup key selection: a preset name or an explicit field list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DedupSelector {
    /// `price_snapshot` or `funding_rate`.
    Preset(String),
    /// Document fields, in key order.
    Fields(Vec<String>),
}

impl DedupSelector {
    /// Resolve to a strategy.
    pub fn strategy(&self) -> Result<DedupStrategy, ConfigError> {
        match self {
            Self::Preset(name) => match name.as_str() {
                "price_snapshot" => Ok(DedupStrategy::price_snapshot()),
                "funding_rate" => Ok(DedupStrategy::funding_rate()),
                other => Err(ConfigError::ValidationError(format!(
                    "unknown dedup preset '{other}', expected 'price_snapshot' or 'funding_rate'"
                ))),
            },
            Self::Fields(fields) => DedupStrategy::new(fields.iter().cloned())
                .map_err(|e| ConfigError::ValidationError(e.to_string())),
        }
    }
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source tag stamped on every snapshot.
    pub tag: String,
    /// Adapter kind.
    pub kind: SourceKind,
    /// Dedup key for upsert writes (default: `price_snapshot`).
    #[serde(default)]
    pub dedup: Option<DedupSelector>,
    /// `http`: base URL.
    #[serde(default)]
    pub base_url: Option<String>,
    /// `http`: listing path.
    #[serde(default)]
    pub list_path: Option<String>,
    /// `http`: JSON pointer to the listing array.
    #[serde(default)]
    pub list_pointer: Option<String>,
    /// `http`: key field of listing objects.
    #[serde(default = "default_key_field")]
    pub key_field: String,
    /// `http`: label field of listing objects.
    #[serde(default)]
    pub label_field: Option<String>,
    /// `http`: detail path containing `{key}`.
    #[serde(default)]
    pub detail_path: Option<String>,
    /// `http`: JSON pointer to the payload in detail responses.
    #[serde(default)]
    pub detail_pointer: Option<String>,
    /// `http`: extra request headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// `static`: payload per entity key.
    #[serde(default)]
    pub entities: BTreeMap<String, serde_json::Value>,
}

impl SourceConfig {
    /// Dedup strategy, `price_snapshot` when unset.
    pub fn dedup_strategy(&self) -> Result<DedupStrategy, ConfigError> {
        self.dedup
            .as_ref()
            .map_or_else(|| Ok(DedupStrategy::price_snapshot()), DedupSelector::strategy)
    }

    /// Check the fields the adapter kind needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tag.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "sources[].tag must not be empty".to_string(),
            ));
        }
        self.dedup_strategy()?;

        if self.kind == SourceKind::Http {
            let base_url = required(self.base_url.as_ref(), &self.tag, "base_url")?;
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(ConfigError::ValidationError(format!(
                    "source '{}': base_url must start with http:// or https://",
                    self.tag
                )));
            }
            required(self.list_path.as_ref(), &self.tag, "list_path")?;
            let detail_path = required(self.detail_path.as_ref(), &self.tag, "detail_path")?;
            if !detail_path.contains(KEY_PLACEHOLDER) {
                return Err(ConfigError::ValidationError(format!(
                    "source '{}': detail_path must contain {KEY_PLACEHOLDER}",
                    self.tag
                )));
            }
        }
        Ok(())
    }

    /// Build the adapter.
    pub fn build(&self, request_timeout: Duration) -> Result<RegisteredSource, ConfigError> {
        self.validate()?;

        let source: Arc<dyn MarketDataSource> = match self.kind {
            SourceKind::Static => {
                let mut source = StaticMarketDataSource::new(self.tag.as_str());
                for (key, payload) in &self.entities {
                    source = source.with_entity(key.as_str(), payload.clone());
                }
                Arc::new(source)
            }
            SourceKind::Http => {
                let config = HttpSourceConfig {
                    tag: self.tag.clone(),
                    base_url: self.base_url.clone().unwrap_or_default(),
                    list_path: self.list_path.clone().unwrap_or_default(),
                    list_pointer: self.list_pointer.clone(),
                    key_field: self.key_field.clone(),
                    label_field: self.label_field.clone(),
                    detail_path: self.detail_path.clone().unwrap_or_default(),
                    detail_pointer: self.detail_pointer.clone(),
                    headers: self.headers.clone(),
                    timeout: request_timeout,
                };
                Arc::new(HttpJsonSource::new(config).map_err(|e| {
                    ConfigError::ValidationError(format!("source '{}': {e}", self.tag))
                })?)
            }
        };

        Ok(RegisteredSource::new(source, self.dedup_strategy()?))
    }
}

fn required<'a>(value: Option<&'a String>, tag: &str, field: &str) -> Result<&'a String, ConfigError> {
    value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
        ConfigError::ValidationError(format!("source '{tag}': {field} is required for kind http"))
    })
}

fn default_key_field() -> String {
    "key".to_string()
}
