//! Document Store Port
//!
//! Collection-scoped persistence for encoded snapshot documents.
//!
//! Every stored document carries a monotonic insertion id. It breaks ties
//! between documents with the same `capturedAt`: the later insertion wins.
//! Each upsert or insert is atomic per document; no multi-document
//! transactions are assumed.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::domain::codec::FieldDiagnostic;
use crate::domain::shared::Timestamp;
use crate::domain::snapshot::{CAPTURED_AT_FIELD, DedupKey, WriteCounts};

/// Storage errors. All of them are fatal for the call that produced them.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// Backend cannot be reached or has been closed.
    #[error("storage unavailable: {message}")]
    Unavailable {
        /// Error details.
        message: String,
    },

    /// The call did not finish in time.
    #[error("storage call timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The backend rejected a query.
    #[error("storage query failed: {message}")]
    Query {
        /// Error details.
        message: String,
    },

    /// A stored row could not be turned back into a document.
    #[error("stored document is corrupt: {message}")]
    Serialization {
        /// Error details.
        message: String,
    },
}

/// Document filter. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentFilter {
    /// Match on entity key.
    pub entity_key: Option<String>,
    /// Match on source tag.
    pub source_tag: Option<String>,
}

impl DocumentFilter {
    /// Filter on source tag only.
    #[must_use]
    pub fn source(source_tag: Option<&str>) -> Self {
        Self {
            entity_key: None,
            source_tag: source_tag.map(str::to_string),
        }
    }

    /// Filter on entity key and optional source tag.
    #[must_use]
    pub fn entity(entity_key: &str, source_tag: Option<&str>) -> Self {
        Self {
            entity_key: Some(entity_key.to_string()),
            source_tag: source_tag.map(str::to_string),
        }
    }

    /// Whether a document matches.
    #[must_use]
    pub fn matches(&self, entity_key: &str, source_tag: &str) -> bool {
        self.entity_key.as_deref().is_none_or(|k| k == entity_key)
            && self.source_tag.as_deref().is_none_or(|s| s == source_tag)
    }
}

/// Sort order for `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest capture first, later insertion first on ties.
    #[default]
    CapturedAtDesc,
    /// Oldest capture first, earlier insertion first on ties.
    CapturedAtAsc,
}

/// A document to write.
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Entity key.
    pub entity_key: String,
    /// Source tag.
    pub source_tag: String,
    /// Capture time.
    pub captured_at: Timestamp,
    /// Encoded document body (a JSON object).
    pub body: Json,
}

impl NewDocument {
    /// Whether `stored` carries the same content as this document.
    ///
    /// The `capturedAt` stamp is left out: re-capturing an unchanged payload
    /// is not a modification.
    #[must_use]
    pub fn same_content(&self, stored: &Json) -> bool {
        match (&self.body, stored) {
            (Json::Object(incoming), Json::Object(existing)) => {
                incoming.len() == existing.len()
                    && incoming.iter().all(|(field, value)| {
                        field == CAPTURED_AT_FIELD || existing.get(field) == Some(value)
                    })
            }
            (incoming, existing) => incoming == existing,
        }
    }
}

/// One replace-or-insert operation.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertOp {
    /// Target key.
    pub key: DedupKey,
    /// Replacement document.
    pub document: NewDocument,
}

/// A document read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Monotonic insertion id.
    pub id: i64,
    /// Entity key.
    pub entity_key: String,
    /// Source tag.
    pub source_tag: String,
    /// Capture time.
    pub captured_at: Timestamp,
    /// Encoded body.
    pub body: Json,
}

/// An entry rejected inside a bulk call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryError {
    /// Position of the entry in the submitted batch.
    pub index: usize,
    /// Why it was rejected.
    pub message: String,
}

/// A field replaced while encoding one entry of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryDiagnostic {
    /// Position of the entry in the submitted batch.
    pub index: usize,
    /// The replaced field.
    pub diagnostic: FieldDiagnostic,
}

/// Aggregate result of a bulk call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    /// Counts.
    pub counts: WriteCounts,
    /// Entry-level failures.
    pub errors: Vec<EntryError>,
    /// Encode diagnostics for entries that were still written. Filled by the
    /// storage engine, never by a store.
    pub diagnostics: Vec<EntryDiagnostic>,
}

impl BulkWriteResult {
    /// Record an entry-level failure.
    pub fn reject(&mut self, index: usize, message: impl Into<String>) {
        self.counts.failed += 1;
        self.errors.push(EntryError {
            index,
            message: message.into(),
        });
    }
}

/// Grouped listing row: one per `(entityKey, sourceTag)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeySummary {
    /// Entity key.
    pub entity_key: String,
    /// Source tag.
    pub source_tag: String,
    /// Number of stored documents.
    pub documents: u64,
    /// Newest capture time.
    pub latest_captured_at: Timestamp,
}

/// Port for document persistence.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Find documents matching `filter`, sorted, optionally limited.
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        sort: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StorageError>;

    /// Replace-or-insert each op by dedup key.
    ///
    /// A matched document whose content is unchanged (see
    /// [`NewDocument::same_content`]) counts as matched only and is left as
    /// stored, original `capturedAt` included.
    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: Vec<UpsertOp>,
    ) -> Result<BulkWriteResult, StorageError>;

    /// Insert every document unconditionally.
    async fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<NewDocument>,
    ) -> Result<BulkWriteResult, StorageError>;

    /// One document per `(entityKey, sourceTag)`: the newest capture, ties
    /// broken by the greatest insertion id. Ordered by entity key, then source.
    async fn latest_per_key(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StorageError>;

    /// Grouped listing ordered by entity key, then source.
    async fn key_summaries(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<KeySummary>, StorageError>;

    /// Check the backend is reachable.
    async fn ping(&self) -> Result<(), StorageError>;

    /// Release the backend. Later calls fail with `Unavailable`.
    async fn close(&self) -> Result<(), StorageError>;
}
