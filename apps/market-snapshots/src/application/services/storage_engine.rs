//! Storage Engine
//!
//! Encodes snapshots and writes them into a named collection with one of two
//! disciplines:
//!
//! - **current**: replace-or-insert by dedup key (idempotent)
//! - **historical**: unconditional append
//!
//! Each call is one bulk operation against the store. Entry-level failures and
//! encode diagnostics are reported in the returned [`BulkWriteResult`] with
//! indices into the batch the caller passed in; only a whole-call
//! [`StorageError`] is propagated.

use std::sync::Arc;

use crate::application::ports::{
    BulkWriteResult, DocumentStore, EntryDiagnostic, EntryError, NewDocument, StorageError,
    UpsertOp,
};
use crate::domain::codec::Codec;
use crate::domain::snapshot::{DedupStrategy, Snapshot};
use crate::infrastructure::metrics;

/// Collection names for the two write targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNames {
    /// Upsert target holding one document per dedup key.
    pub current: String,
    /// Append target holding every captured snapshot.
    pub history: String,
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self {
            current: "snapshots".to_string(),
            history: "snapshot_history".to_string(),
        }
    }
}

/// Write side of the pipeline.
pub struct StorageEngine<S: DocumentStore> {
    store: Arc<S>,
    codec: Codec,
}

impl<S: DocumentStore> StorageEngine<S> {
    /// Create a new storage engine.
    pub const fn new(store: Arc<S>, codec: Codec) -> Self {
        Self { store, codec }
    }

    /// Replace-or-insert each snapshot by the key `dedup` derives from its
    /// encoded document.
    ///
    /// A snapshot whose key cannot be derived is rejected at entry level and
    /// never reaches the store. An empty batch is a no-op.
    pub async fn write_current(
        &self,
        collection: &str,
        snapshots: &[Snapshot],
        dedup: &DedupStrategy,
    ) -> Result<BulkWriteResult, StorageError> {
        if snapshots.is_empty() {
            return Ok(BulkWriteResult::default());
        }

        let mut ops = Vec::with_capacity(snapshots.len());
        let mut positions = Vec::with_capacity(snapshots.len());
        let mut rejected = vec![];
        let mut diagnostics = vec![];

        for (index, snapshot) in snapshots.iter().enumerate() {
            let document = self.encode(index, snapshot, &mut diagnostics);
            match dedup.key_for(&document.body) {
                Ok(key) => {
                    ops.push(UpsertOp { key, document });
                    positions.push(index);
                }
                Err(e) => {
                    tracing::warn!(
                        entity = snapshot.entity_key(),
                        source = snapshot.source_tag(),
                        error = %e,
                        "Malformed document rejected"
                    );
                    rejected.push(EntryError {
                        index,
                        message: e.to_string(),
                    });
                }
            }
        }

        let stored = if ops.is_empty() {
            BulkWriteResult::default()
        } else {
            self.store.bulk_upsert(collection, ops).await?
        };

        let mut result = merge_rejections(remap(stored, &positions), rejected);
        result.diagnostics = written_diagnostics(diagnostics, &result.errors);
        tracing::debug!(
            collection,
            matched = result.counts.matched,
            modified = result.counts.modified,
            upserted = result.counts.upserted,
            failed = result.counts.failed,
            "Upsert batch written"
        );
        Ok(result)
    }

    /// Append every snapshot as a new document. An empty batch is a no-op.
    pub async fn write_historical(
        &self,
        collection: &str,
        snapshots: &[Snapshot],
    ) -> Result<BulkWriteResult, StorageError> {
        if snapshots.is_empty() {
            return Ok(BulkWriteResult::default());
        }

        let mut diagnostics = vec![];
        let documents: Vec<NewDocument> = snapshots
            .iter()
            .enumerate()
            .map(|(index, snapshot)| self.encode(index, snapshot, &mut diagnostics))
            .collect();
        let mut result = self.store.bulk_insert(collection, documents).await?;
        result.diagnostics = written_diagnostics(diagnostics, &result.errors);

        tracing::debug!(
            collection,
            inserted = result.counts.inserted,
            failed = result.counts.failed,
            "Historical batch written"
        );
        Ok(result)
    }

    fn encode(
        &self,
        index: usize,
        snapshot: &Snapshot,
        diagnostics: &mut Vec<EntryDiagnostic>,
    ) -> NewDocument {
        let encoded = self.codec.encode(&snapshot.to_document());
        metrics::record_codec_diagnostics(encoded.diagnostics.len());
        diagnostics.extend(
            encoded
                .diagnostics
                .into_iter()
                .map(|diagnostic| EntryDiagnostic { index, diagnostic }),
        );
        NewDocument {
            entity_key: snapshot.entity_key().to_string(),
            source_tag: snapshot.source_tag().to_string(),
            captured_at: snapshot.captured_at(),
            body: encoded.value,
        }
    }
}

/// Translate store indices (positions in the submitted ops) back to batch indices.
fn remap(mut result: BulkWriteResult, positions: &[usize]) -> BulkWriteResult {
    for error in &mut result.errors {
        if let Some(&index) = positions.get(error.index) {
            error.index = index;
        }
    }
    result
}

/// Keep diagnostics only for entries the store accepted.
fn written_diagnostics(diagnostics: Vec<EntryDiagnostic>, errors: &[EntryError]) -> Vec<EntryDiagnostic> {
    diagnostics
        .into_iter()
        .filter(|d| !errors.iter().any(|e| e.index == d.index))
        .collect()
}

fn merge_rejections(mut result: BulkWriteResult, rejected: Vec<EntryError>) -> BulkWriteResult {
    result.counts.failed += rejected.len() as u64;
    result.errors.extend(rejected);
    result.errors.sort_by_key(|e| e.index);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::Timestamp;
    use crate::domain::value::Value;
    use crate::infrastructure::persistence::InMemoryDocumentStore;
    use num_bigint::BigInt;
    use serde_json::json;

    fn snapshot(entity: &str, millis: i64, payload: serde_json::Value) -> Snapshot {
        let Value::Object(map) = Value::from(payload) else {
            panic!("payload must be an object");
        };
        Snapshot::new(entity, "drift", Timestamp::from_unix_millis(millis).unwrap(), map)
    }

    fn engine() -> (Arc<InMemoryDocumentStore>, StorageEngine<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        (Arc::clone(&store), StorageEngine::new(store, Codec::new()))
    }

    #[tokio::test]
    async fn upsert_twice_is_idempotent() {
        let (_, engine) = engine();
        let batch = [
            snapshot("SOL-PERP", 1_000, json!({"fundingRate": 5})),
            snapshot("BTC-PERP", 1_000, json!({"fundingRate": 1})),
        ];
        let dedup = DedupStrategy::price_snapshot();

        let first = engine.write_current("current", &batch, &dedup).await.unwrap();
        assert_eq!(first.counts.upserted, 2);

        let second = engine.write_current("current", &batch, &dedup).await.unwrap();
        assert_eq!(second.counts.matched, 2);
        assert_eq!(second.counts.modified, 0);
    }

    #[tokio::test]
    async fn changed_field_modifies_only_that_entry() {
        let (_, engine) = engine();
        let dedup = DedupStrategy::price_snapshot();
        let batch = [
            snapshot("SOL-PERP", 1_000, json!({"fundingRate": 5})),
            snapshot("BTC-PERP", 1_000, json!({"fundingRate": 1})),
        ];
        engine.write_current("current", &batch, &dedup).await.unwrap();

        let changed = [
            snapshot("SOL-PERP", 1_000, json!({"fundingRate": 7})),
            snapshot("BTC-PERP", 1_000, json!({"fundingRate": 1})),
        ];
        let result = engine.write_current("current", &changed, &dedup).await.unwrap();
        assert_eq!(result.counts.matched, 2);
        assert_eq!(result.counts.modified, 1);
    }

    #[tokio::test]
    async fn encode_diagnostics_are_reported_with_batch_indices() {
        let (store, engine) = engine();
        let payload = Value::object([("px", Value::Int(1)), ("basis", Value::Float(f64::NAN))]);
        let Value::Object(map) = payload else {
            unreachable!()
        };
        let bad = Snapshot::new("BTC-PERP", "drift", Timestamp::from_unix_millis(1_000).unwrap(), map);
        let batch = [snapshot("SOL-PERP", 1_000, json!({"px": 2})), bad];

        let result = engine.write_historical("history", &batch).await.unwrap();

        assert_eq!(result.counts.inserted, 2);
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].index, 1);
        assert_eq!(result.diagnostics[0].diagnostic.path, "$.basis");
        assert_eq!(store.len("history"), 2);
    }

    #[tokio::test]
    async fn historical_appends_every_entry() {
        let (store, engine) = engine();
        for millis in [1_000, 2_000, 3_000] {
            let result = engine
                .write_historical("history", &[snapshot("SOL-PERP", millis, json!({"px": 1}))])
                .await
                .unwrap();
            assert_eq!(result.counts.inserted, 1);
        }
        assert_eq!(store.len("history"), 3);
    }

    #[tokio::test]
    async fn empty_batch_is_noop() {
        let (store, engine) = engine();
        let result = engine
            .write_current("current", &[], &DedupStrategy::default())
            .await
            .unwrap();
        assert_eq!(result, BulkWriteResult::default());
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn missing_dedup_field_is_entry_level_failure() {
        let (store, engine) = engine();
        let batch = [
            snapshot("A", 1_000, json!({"recordId": 1, "market": "A"})),
            snapshot("B", 1_000, json!({"recordId": 2})),
            snapshot("C", 1_000, json!({"recordId": 3, "market": "C"})),
        ];
        let result = engine
            .write_current("funding", &batch, &DedupStrategy::funding_rate())
            .await
            .unwrap();

        assert_eq!(result.counts.upserted, 2);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.errors[0].index, 1);
        assert_eq!(store.write_log()[0].entity_keys, ["A", "C"]);
    }

    #[tokio::test]
    async fn store_rejections_map_to_batch_indices() {
        let (store, engine) = engine();
        store.reject_entity("C");
        let batch = [
            snapshot("A", 1_000, json!({"recordId": 1, "market": "A"})),
            snapshot("B", 1_000, json!({"recordId": 2})),
            snapshot("C", 1_000, json!({"recordId": 3, "market": "C"})),
        ];
        let result = engine
            .write_current("funding", &batch, &DedupStrategy::funding_rate())
            .await
            .unwrap();

        let indices: Vec<usize> = result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, [1, 2]);
        assert_eq!(result.counts.failed, 2);
    }

    #[tokio::test]
    async fn unavailable_store_is_fatal() {
        let (store, engine) = engine();
        store.set_unavailable(true);
        let err = engine
            .write_historical("history", &[snapshot("A", 1, json!({}))])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn bigint_fields_are_stored_tagged() {
        let (store, engine) = engine();
        let big: BigInt = "-123456789012345678901234567890".parse().unwrap();
        let mut map = crate::domain::value::ValueMap::new();
        map.insert("openInterest".to_string(), Value::BigInt(big));
        let snap = Snapshot::new("SOL-PERP", "drift", Timestamp::from_unix_millis(1).unwrap(), map);

        engine.write_historical("history", &[snap]).await.unwrap();

        let docs = store
            .find(
                "history",
                &crate::application::ports::DocumentFilter::default(),
                crate::application::ports::SortOrder::CapturedAtDesc,
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            docs[0].body["openInterest"],
            json!({"kind": "bigint", "digits": "-123456789012345678901234567890"})
        );
    }
}
