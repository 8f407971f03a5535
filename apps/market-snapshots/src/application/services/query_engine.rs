//! Query Engine
//!
//! Read-side views over stored snapshots. Every document passes through
//! [`Codec::decode`] before it is returned, so big integers come back exact.
//! Field projections are applied by callers on the returned snapshots.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::storage_engine::CollectionNames;
use crate::application::ports::{
    DocumentFilter, DocumentStore, KeySummary, SortOrder, StorageError, StoredDocument,
};
use crate::domain::codec::{Codec, CodecError};
use crate::domain::snapshot::Snapshot;

/// Which collection a query reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum View {
    /// The upsert target: one document per dedup key.
    #[default]
    Current,
    /// The append target: every captured snapshot.
    History,
}

impl View {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::History => "history",
        }
    }
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown view name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown view '{0}', expected 'current' or 'history'")]
pub struct ParseViewError(pub String);

impl FromStr for View {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "current" => Ok(Self::Current),
            "history" | "historical" => Ok(Self::History),
            _ => Err(ParseViewError(s.to_string())),
        }
    }
}

/// Latest-per-key query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LatestQuery {
    /// Restrict to one source.
    pub source: Option<String>,
    /// Restrict to one entity.
    pub entity_key: Option<String>,
}

/// Bounded history query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Entity whose history is read.
    pub entity_key: String,
    /// Restrict to one source.
    pub source: Option<String>,
    /// Maximum number of snapshots.
    pub limit: usize,
}

/// Query errors.
#[derive(Debug, Error)]
pub enum QueryError {
    /// The store call failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A stored document could not be decoded (strict decoding only).
    #[error("decode failed: {0}")]
    Codec(#[from] CodecError),

    /// A stored document is not an object.
    #[error("stored document {id} is invalid: {message}")]
    InvalidDocument {
        /// Insertion id of the document.
        id: i64,
        /// Error details.
        message: String,
    },
}

/// Read side of the pipeline.
pub struct QueryEngine<S: DocumentStore> {
    store: Arc<S>,
    codec: Codec,
    collections: CollectionNames,
    max_history_limit: usize,
}

impl<S: DocumentStore> QueryEngine<S> {
    /// Default cap on history limits.
    pub const DEFAULT_MAX_HISTORY_LIMIT: usize = 1000;

    /// Create a new query engine.
    pub const fn new(
        store: Arc<S>,
        codec: Codec,
        collections: CollectionNames,
        max_history_limit: usize,
    ) -> Self {
        Self {
            store,
            codec,
            collections,
            max_history_limit,
        }
    }

    /// Collection backing a view.
    #[must_use]
    pub fn collection(&self, view: View) -> &str {
        match view {
            View::Current => &self.collections.current,
            View::History => &self.collections.history,
        }
    }

    /// One snapshot per `(entityKey, sourceTag)`: the newest capture, the
    /// latest write on ties. Sorted by entity key, then source.
    pub async fn latest(&self, view: View, query: &LatestQuery) -> Result<Vec<Snapshot>, QueryError> {
        let filter = DocumentFilter {
            entity_key: query.entity_key.clone(),
            source_tag: query.source.clone(),
        };
        let documents = self.store.latest_per_key(self.collection(view), &filter).await?;
        documents.iter().map(|doc| self.decode_document(doc)).collect()
    }

    /// Latest snapshot for one key, `None` when nothing is stored.
    pub async fn latest_for(
        &self,
        view: View,
        entity_key: &str,
        source_tag: &str,
    ) -> Result<Option<Snapshot>, QueryError> {
        let query = LatestQuery {
            source: Some(source_tag.to_string()),
            entity_key: Some(entity_key.to_string()),
        };
        Ok(self.latest(view, &query).await?.into_iter().next())
    }

    /// Up to `limit` snapshots for one entity, newest first.
    ///
    /// `limit` is capped at the configured maximum. Zero returns nothing.
    pub async fn history(&self, view: View, query: &HistoryQuery) -> Result<Vec<Snapshot>, QueryError> {
        let limit = query.limit.min(self.max_history_limit);
        if limit == 0 {
            return Ok(vec![]);
        }

        let filter = DocumentFilter::entity(&query.entity_key, query.source.as_deref());
        let documents = self
            .store
            .find(self.collection(view), &filter, SortOrder::CapturedAtDesc, Some(limit))
            .await?;
        documents.iter().map(|doc| self.decode_document(doc)).collect()
    }

    /// Grouped listing of stored keys.
    pub async fn keys(&self, view: View, source: Option<&str>) -> Result<Vec<KeySummary>, QueryError> {
        Ok(self
            .store
            .key_summaries(self.collection(view), &DocumentFilter::source(source))
            .await?)
    }

    fn decode_document(&self, doc: &StoredDocument) -> Result<Snapshot, QueryError> {
        let body = self.codec.decode(&doc.body)?;
        Snapshot::from_document(&doc.entity_key, &doc.source_tag, doc.captured_at, body).map_err(
            |e| QueryError::InvalidDocument {
                id: doc.id,
                message: e.to_string(),
            },
        )
    }
}
