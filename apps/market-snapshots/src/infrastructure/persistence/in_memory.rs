//! In-memory document store for testing and local development.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{
    BulkWriteResult, DocumentFilter, DocumentStore, KeySummary, NewDocument, SortOrder,
    StorageError, StoredDocument, UpsertOp,
};
use crate::domain::snapshot::DedupKey;

/// A bulk write observed by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteCall {
    /// Target collection.
    pub collection: String,
    /// Entity keys of the submitted entries, in order.
    pub entity_keys: Vec<String>,
}

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<StoredDocument>,
    by_key: HashMap<DedupKey, usize>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, Collection>,
    next_id: i64,
    closed: bool,
    unavailable: bool,
    rejected_entities: HashSet<String>,
    write_log: Vec<WriteCall>,
}

impl StoreState {
    fn check_available(&self) -> Result<(), StorageError> {
        if self.closed {
            return Err(StorageError::Unavailable {
                message: "store is closed".to_string(),
            });
        }
        if self.unavailable {
            return Err(StorageError::Unavailable {
                message: "backend unreachable".to_string(),
            });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory implementation of `DocumentStore`.
///
/// Suitable for testing and development. Not for production use.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    state: RwLock<StoreState>,
}

impl InMemoryDocumentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the backend going away (or coming back).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.write().unavailable = unavailable;
    }

    /// Reject every entry for `entity_key` at entry level.
    pub fn reject_entity(&self, entity_key: &str) {
        self.state.write().rejected_entities.insert(entity_key.to_string());
    }

    /// Bulk writes seen so far.
    #[must_use]
    pub fn write_log(&self) -> Vec<WriteCall> {
        self.state.read().write_log.clone()
    }

    /// Number of documents in a collection.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.state
            .read()
            .collections
            .get(collection)
            .map_or(0, |c| c.documents.len())
    }

    /// Whether a collection is empty.
    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }
}

fn capture_order(a: &StoredDocument, b: &StoredDocument) -> std::cmp::Ordering {
    a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id))
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        sort: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let state = self.state.read();
        state.check_available()?;

        let mut docs: Vec<StoredDocument> = state
            .collections
            .get(collection)
            .map(|c| {
                c.documents
                    .iter()
                    .filter(|d| filter.matches(&d.entity_key, &d.source_tag))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        match sort {
            SortOrder::CapturedAtDesc => docs.sort_by(|a, b| capture_order(b, a)),
            SortOrder::CapturedAtAsc => docs.sort_by(capture_order),
        }
        if let Some(limit) = limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: Vec<UpsertOp>,
    ) -> Result<BulkWriteResult, StorageError> {
        let mut guard = self.state.write();
        guard.check_available()?;
        let state = &mut *guard;

        state.write_log.push(WriteCall {
            collection: collection.to_string(),
            entity_keys: ops.iter().map(|op| op.document.entity_key.clone()).collect(),
        });

        let mut result = BulkWriteResult::default();
        for (index, op) in ops.into_iter().enumerate() {
            if state.rejected_entities.contains(&op.document.entity_key) {
                result.reject(index, "entry rejected by store");
                continue;
            }

            let existing = state
                .collections
                .get(collection)
                .and_then(|c| c.by_key.get(&op.key).copied());

            if let Some(position) = existing {
                let coll = state.collections.entry(collection.to_string()).or_default();
                let stored = &mut coll.documents[position];
                result.counts.matched += 1;
                if !op.document.same_content(&stored.body) {
                    result.counts.modified += 1;
                    stored.entity_key = op.document.entity_key;
                    stored.source_tag = op.document.source_tag;
                    stored.captured_at = op.document.captured_at;
                    stored.body = op.document.body;
                }
            } else {
                let id = state.allocate_id();
                let coll = state.collections.entry(collection.to_string()).or_default();
                coll.by_key.insert(op.key, coll.documents.len());
                coll.documents.push(stored_from(id, op.document));
                result.counts.upserted += 1;
            }
        }
        Ok(result)
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<NewDocument>,
    ) -> Result<BulkWriteResult, StorageError> {
        let mut guard = self.state.write();
        guard.check_available()?;
        let state = &mut *guard;

        state.write_log.push(WriteCall {
            collection: collection.to_string(),
            entity_keys: documents.iter().map(|d| d.entity_key.clone()).collect(),
        });

        let mut result = BulkWriteResult::default();
        for (index, document) in documents.into_iter().enumerate() {
            if state.rejected_entities.contains(&document.entity_key) {
                result.reject(index, "entry rejected by store");
                continue;
            }
            let id = state.allocate_id();
            state
                .collections
                .entry(collection.to_string())
                .or_default()
                .documents
                .push(stored_from(id, document));
            result.counts.inserted += 1;
        }
        Ok(result)
    }

    async fn latest_per_key(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let state = self.state.read();
        state.check_available()?;

        let mut latest: BTreeMap<(String, String), &StoredDocument> = BTreeMap::new();
        if let Some(coll) = state.collections.get(collection) {
            for doc in coll
                .documents
                .iter()
                .filter(|d| filter.matches(&d.entity_key, &d.source_tag))
            {
                let key = (doc.entity_key.clone(), doc.source_tag.clone());
                let newer = latest
                    .get(&key)
                    .is_none_or(|current| capture_order(doc, current).is_gt());
                if newer {
                    latest.insert(key, doc);
                }
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn key_summaries(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<KeySummary>, StorageError> {
        let state = self.state.read();
        state.check_available()?;

        let mut groups: BTreeMap<(String, String), KeySummary> = BTreeMap::new();
        if let Some(coll) = state.collections.get(collection) {
            for doc in coll
                .documents
                .iter()
                .filter(|d| filter.matches(&d.entity_key, &d.source_tag))
            {
                groups
                    .entry((doc.entity_key.clone(), doc.source_tag.clone()))
                    .and_modify(|s| {
                        s.documents += 1;
                        s.latest_captured_at = s.latest_captured_at.max(doc.captured_at);
                    })
                    .or_insert_with(|| KeySummary {
                        entity_key: doc.entity_key.clone(),
                        source_tag: doc.source_tag.clone(),
                        documents: 1,
                        latest_captured_at: doc.captured_at,
                    });
            }
        }
        Ok(groups.into_values().collect())
    }

    async fn ping(&self) -> Result<(), StorageError> {
        self.state.read().check_available()
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.state.write().closed = true;
        Ok(())
    }
}

fn stored_from(id: i64, document: NewDocument) -> StoredDocument {
    StoredDocument {
        id,
        entity_key: document.entity_key,
        source_tag: document.source_tag,
        captured_at: document.captured_at,
        body: document.body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::Timestamp;
    use serde_json::json;

    fn t(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    fn doc(entity: &str, at: &str, rate: i64) -> NewDocument {
        NewDocument {
            entity_key: entity.to_string(),
            source_tag: "drift".to_string(),
            captured_at: t(at),
            body: json!({"entityKey": entity, "sourceTag": "drift", "capturedAt": at, "fundingRate": rate}),
        }
    }

    fn upsert(entity: &str, at: &str, rate: i64) -> UpsertOp {
        UpsertOp {
            key: DedupKey::new(format!("[\"{entity}\",\"drift\"]")),
            document: doc(entity, at, rate),
        }
    }

    #[tokio::test]
    async fn upsert_counts_follow_content_changes() {
        let store = InMemoryDocumentStore::new();
        let batch = || vec![upsert("A", "2026-01-01T00:00:00Z", 1), upsert("B", "2026-01-01T00:00:00Z", 2)];

        let first = store.bulk_upsert("current", batch()).await.unwrap();
        assert_eq!(first.counts.upserted, 2);

        let second = store.bulk_upsert("current", batch()).await.unwrap();
        assert_eq!(second.counts.matched, 2);
        assert_eq!(second.counts.modified, 0);

        let third = store
            .bulk_upsert("current", vec![upsert("A", "2026-01-01T00:00:00Z", 9)])
            .await
            .unwrap();
        assert_eq!(third.counts.matched, 1);
        assert_eq!(third.counts.modified, 1);
        assert_eq!(store.len("current"), 2);
    }

    #[tokio::test]
    async fn latest_breaks_ties_by_insertion() {
        let store = InMemoryDocumentStore::new();
        store
            .bulk_insert(
                "history",
                vec![
                    doc("A", "2026-01-01T00:00:00Z", 1),
                    doc("A", "2026-01-01T00:00:02Z", 2),
                    doc("A", "2026-01-01T00:00:02Z", 3),
                    doc("B", "2026-01-01T00:00:00Z", 4),
                ],
            )
            .await
            .unwrap();

        let latest = store
            .latest_per_key("history", &DocumentFilter::default())
            .await
            .unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].body["fundingRate"], 3);
        assert_eq!(latest[1].entity_key, "B");
    }

    #[tokio::test]
    async fn find_sorts_and_limits() {
        let store = InMemoryDocumentStore::new();
        store
            .bulk_insert(
                "history",
                vec![
                    doc("A", "2026-01-01T00:00:01Z", 1),
                    doc("A", "2026-01-01T00:00:03Z", 3),
                    doc("A", "2026-01-01T00:00:02Z", 2),
                ],
            )
            .await
            .unwrap();

        let found = store
            .find("history", &DocumentFilter::entity("A", None), SortOrder::CapturedAtDesc, Some(2))
            .await
            .unwrap();
        let rates: Vec<i64> = found.iter().map(|d| d.body["fundingRate"].as_i64().unwrap()).collect();
        assert_eq!(rates, [3, 2]);
    }

    #[tokio::test]
    async fn unavailable_and_closed_fail_whole_call() {
        let store = InMemoryDocumentStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.bulk_insert("h", vec![doc("A", "2026-01-01T00:00:00Z", 1)]).await,
            Err(StorageError::Unavailable { .. })
        ));
        store.set_unavailable(false);
        store.ping().await.unwrap();

        store.close().await.unwrap();
        assert!(store.ping().await.is_err());
    }

    #[tokio::test]
    async fn rejected_entity_is_entry_level() {
        let store = InMemoryDocumentStore::new();
        store.reject_entity("B");
        let result = store
            .bulk_insert(
                "h",
                vec![doc("A", "2026-01-01T00:00:00Z", 1), doc("B", "2026-01-01T00:00:00Z", 2)],
            )
            .await
            .unwrap();
        assert_eq!(result.counts.inserted, 1);
        assert_eq!(result.counts.failed, 1);
        assert_eq!(result.errors[0].index, 1);
    }

    #[tokio::test]
    async fn key_summaries_group_documents() {
        let store = InMemoryDocumentStore::new();
        store
            .bulk_insert(
                "h",
                vec![
                    doc("B", "2026-01-01T00:00:00Z", 1),
                    doc("A", "2026-01-01T00:00:01Z", 2),
                    doc("A", "2026-01-01T00:00:05Z", 3),
                ],
            )
            .await
            .unwrap();

        let summaries = store.key_summaries("h", &DocumentFilter::default()).await.unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].entity_key, "A");
        assert_eq!(summaries[0].documents, 2);
        assert_eq!(summaries[0].latest_captured_at, t("2026-01-01T00:00:05Z"));
    }
}
