//! Market Data Source Port
//!
//! Opaque capability that lists entities at a venue and fetches one raw
//! payload per entity. How the venue is reached is the adapter's concern.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::value::Value;

/// Raw detail payload for one entity.
pub type RawPayload = Value;

/// An entity advertised by a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Key passed back to `fetch_detail`.
    pub key: String,
    /// Optional display label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl EntityDescriptor {
    /// Descriptor with only a key.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: None,
        }
    }
}

/// Market data source errors.
#[derive(Debug, Clone, Error)]
pub enum SourceError {
    /// The source could not be reached or returned an error status.
    #[error("source unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// The source answered with something that is not a usable payload.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Error details.
        message: String,
    },

    /// The adapter settings are unusable.
    #[error("invalid source configuration: {message}")]
    InvalidConfig {
        /// Error details.
        message: String,
    },

    /// The entity is unknown to the source.
    #[error("entity not found: {key}")]
    NotFound {
        /// Requested key.
        key: String,
    },
}

/// Port for market data sources.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Tag stamped onto every snapshot from this source.
    fn tag(&self) -> &str;

    /// List the entities currently available.
    async fn list_entities(&self) -> Result<Vec<EntityDescriptor>, SourceError>;

    /// Fetch the raw payload for one entity.
    async fn fetch_detail(&self, key: &str) -> Result<RawPayload, SourceError>;
}
