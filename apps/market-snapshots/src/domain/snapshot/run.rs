//! Collection run record.
//!
//! A `CollectionRun` lives for one cycle against one source. It is returned to
//! the caller and logged, never stored as a snapshot.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::mode::WriteMode;
use crate::domain::codec::FieldDiagnostic;
use crate::domain::shared::{FailureKind, Timestamp};

/// Aggregate write counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteCounts {
    /// Upserts that found an existing document.
    pub matched: u64,
    /// Matched documents whose content changed.
    pub modified: u64,
    /// Upserts that inserted a new document.
    pub upserted: u64,
    /// Append-only inserts.
    pub inserted: u64,
    /// Entries rejected at entry level.
    pub failed: u64,
}

impl WriteCounts {
    /// Add another set of counts to this one.
    pub const fn merge(&mut self, other: &Self) {
        self.matched += other.matched;
        self.modified += other.modified;
        self.upserted += other.upserted;
        self.inserted += other.inserted;
        self.failed += other.failed;
    }

    /// Documents created or changed.
    #[must_use]
    pub const fn changed(&self) -> u64 {
        self.modified + self.upserted + self.inserted
    }
}

/// Result for one entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum EntityStatus {
    /// Documents for the entity were handed to storage and accepted.
    Written {
        /// Number of documents produced from the payload.
        documents: usize,
    },
    /// The entity was skipped.
    Failed {
        /// Failure classification.
        kind: FailureKind,
        /// Human-readable cause.
        message: String,
    },
}

/// Per-entity outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityOutcome {
    /// Entity key as listed by the source.
    pub entity_key: String,
    /// What happened.
    #[serde(flatten)]
    pub status: EntityStatus,
}

impl EntityOutcome {
    /// Whether the entity was written.
    #[must_use]
    pub const fn is_written(&self) -> bool {
        matches!(self.status, EntityStatus::Written { .. })
    }
}

/// A storage entry rejection traced back to the entity that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunEntryError {
    /// Position of the document in the submitted batch.
    pub index: usize,
    /// Entity the document belonged to.
    pub entity_key: String,
    /// Storage message.
    pub message: String,
}

/// A field replaced during encoding, traced back to its entity. The document
/// was still written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDiagnostic {
    /// Entity the document belonged to.
    pub entity_key: String,
    /// Path of the replaced field.
    pub path: String,
    /// Why the field could not be encoded.
    pub message: String,
}

/// Record of one collection cycle against one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionRun {
    /// Run identifier.
    pub run_id: Uuid,
    /// Source the run collected from.
    pub source_tag: String,
    /// Write discipline used.
    pub mode: WriteMode,
    /// Cycle start.
    pub started_at: Timestamp,
    /// Cycle end, set by [`CollectionRun::finish`].
    pub finished_at: Option<Timestamp>,
    /// Per-entity outcomes, in listing order.
    pub entities: Vec<EntityOutcome>,
    /// Aggregate storage counts.
    pub counts: WriteCounts,
    /// Entry-level storage rejections.
    pub entry_errors: Vec<RunEntryError>,
    /// Fields replaced while encoding written documents.
    pub encode_diagnostics: Vec<RunDiagnostic>,
}

impl CollectionRun {
    /// Open a run.
    pub fn start(source_tag: impl Into<String>, mode: WriteMode) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            source_tag: source_tag.into(),
            mode,
            started_at: Timestamp::now(),
            finished_at: None,
            entities: vec![],
            counts: WriteCounts::default(),
            entry_errors: vec![],
            encode_diagnostics: vec![],
        }
    }

    /// Record a written entity.
    pub fn record_written(&mut self, entity_key: impl Into<String>, documents: usize) {
        self.entities.push(EntityOutcome {
            entity_key: entity_key.into(),
            status: EntityStatus::Written { documents },
        });
    }

    /// Record a failed entity.
    pub fn record_failure(
        &mut self,
        entity_key: impl Into<String>,
        kind: FailureKind,
        message: impl Into<String>,
    ) {
        self.entities.push(EntityOutcome {
            entity_key: entity_key.into(),
            status: EntityStatus::Failed {
                kind,
                message: message.into(),
            },
        });
    }

    /// Downgrade an entity recorded as written to failed.
    ///
    /// The first failure recorded for an entity is kept.
    pub fn mark_failed(&mut self, entity_key: &str, kind: FailureKind, message: impl Into<String>) {
        if let Some(outcome) = self
            .entities
            .iter_mut()
            .find(|o| o.entity_key == entity_key && o.is_written())
        {
            outcome.status = EntityStatus::Failed {
                kind,
                message: message.into(),
            };
        }
    }

    /// Record a storage entry rejection and fail its entity.
    pub fn record_entry_error(&mut self, index: usize, entity_key: &str, message: impl Into<String>) {
        let message = message.into();
        self.mark_failed(entity_key, FailureKind::StorageFailure, message.clone());
        self.entry_errors.push(RunEntryError {
            index,
            entity_key: entity_key.to_string(),
            message,
        });
    }

    /// Record a field the codec replaced in one of `entity_key`'s documents.
    pub fn record_diagnostic(&mut self, entity_key: &str, diagnostic: FieldDiagnostic) {
        self.encode_diagnostics.push(RunDiagnostic {
            entity_key: entity_key.to_string(),
            path: diagnostic.path,
            message: diagnostic.message,
        });
    }

    /// Close the run with the storage counts.
    pub fn finish(&mut self, counts: WriteCounts) {
        self.counts = counts;
        self.finished_at = Some(Timestamp::now());
    }

    /// Entity keys recorded as written.
    #[must_use]
    pub fn written_entities(&self) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|o| o.is_written())
            .map(|o| o.entity_key.as_str())
            .collect()
    }

    /// Entity keys recorded as failed.
    #[must_use]
    pub fn failed_entities(&self) -> Vec<&str> {
        self.entities
            .iter()
            .filter(|o| !o.is_written())
            .map(|o| o.entity_key.as_str())
            .collect()
    }

    /// Outcome for one entity.
    #[must_use]
    pub fn outcome(&self, entity_key: &str) -> Option<&EntityOutcome> {
        self.entities.iter().find(|o| o.entity_key == entity_key)
    }

    /// Elapsed time once finished.
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        self.finished_at
            .map(|end| end.as_datetime() - self.started_at.as_datetime())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tracks_outcomes() {
        let mut run = CollectionRun::start("drift", WriteMode::Upsert);
        run.record_written("A", 1);
        run.record_failure("B", FailureKind::SourceUnavailable, "timeout");
        run.record_written("C", 2);
        run.record_entry_error(3, "C", "rejected");
        run.finish(WriteCounts {
            upserted: 1,
            ..WriteCounts::default()
        });

        assert_eq!(run.written_entities(), ["A"]);
        assert_eq!(run.failed_entities(), ["B", "C"]);
        assert!(run.duration().is_some());
        assert_eq!(run.entry_errors[0].index, 3);
    }

    #[test]
    fn mark_failed_keeps_first_failure() {
        let mut run = CollectionRun::start("drift", WriteMode::Upsert);
        run.record_failure("B", FailureKind::CodecFailure, "shape");
        run.mark_failed("B", FailureKind::StorageFailure, "later");

        let outcome = run.outcome("B").unwrap();
        assert_eq!(
            outcome.status,
            EntityStatus::Failed {
                kind: FailureKind::CodecFailure,
                message: "shape".to_string()
            }
        );
    }

    #[test]
    fn serializes_camel_case_with_flat_status() {
        let mut run = CollectionRun::start("drift", WriteMode::Historical);
        run.record_written("SOL-PERP", 1);
        let json = serde_json::to_value(&run).unwrap();

        assert_eq!(json["sourceTag"], "drift");
        assert_eq!(json["mode"], "historical");
        assert_eq!(
            json["entities"][0],
            json!({"entityKey": "SOL-PERP", "status": "written", "documents": 1})
        );
    }
}
