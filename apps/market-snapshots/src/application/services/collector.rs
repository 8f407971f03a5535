//! Collector
//!
//! Runs one collection cycle against one source:
//!
//! 1. List entities (zero entities fails the run)
//! 2. Fetch every detail payload with bounded concurrency, each under a timeout
//! 3. Stamp metadata and shape payloads into snapshots
//! 4. Hand the whole batch to the [`StorageEngine`] in one bulk write
//!
//! Per-entity failures are recorded in the [`CollectionRun`] and never abort
//! the remaining entities. A failed entity contributes nothing to the write.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream;
use thiserror::Error;

use super::storage_engine::{CollectionNames, StorageEngine};
use crate::application::ports::{DocumentStore, MarketDataSource, StorageError};
use crate::domain::shared::{FailureKind, Timestamp};
use crate::domain::snapshot::{CollectionRun, DedupStrategy, Snapshot, WriteMode};
use crate::infrastructure::metrics::{self, RunOutcome};

/// Collector tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Timeout for the listing call and for each detail fetch.
    pub fetch_timeout: Duration,
    /// Timeout for the bulk write.
    pub write_timeout: Duration,
    /// Detail fetches in flight at once.
    pub max_concurrent_fetches: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            fetch_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(30),
            max_concurrent_fetches: 8,
        }
    }
}

/// A source together with the dedup strategy for its documents.
#[derive(Clone)]
pub struct RegisteredSource {
    /// The source.
    pub source: Arc<dyn MarketDataSource>,
    /// Dedup key fields for upsert writes.
    pub dedup: DedupStrategy,
}

impl RegisteredSource {
    /// Register a source.
    pub fn new(source: Arc<dyn MarketDataSource>, dedup: DedupStrategy) -> Self {
        Self { source, dedup }
    }

    /// Source tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        self.source.tag()
    }
}

impl std::fmt::Debug for RegisteredSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredSource")
            .field("tag", &self.tag())
            .field("dedup", &self.dedup)
            .finish()
    }
}

/// Run-level collection errors.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Listing entities failed or timed out.
    #[error("source {source_tag} unavailable: {message}")]
    SourceUnavailable {
        /// Source tag.
        source_tag: String,
        /// Error details.
        message: String,
    },

    /// The source listed zero entities.
    #[error("source {source_tag} returned no entities")]
    EmptyFetch {
        /// Source tag.
        source_tag: String,
    },

    /// The bulk write failed as a whole.
    #[error("storage failed for source {source_tag}: {source}")]
    Storage {
        /// Source tag.
        source_tag: String,
        /// Underlying storage error.
        #[source]
        source: StorageError,
    },
}

impl CollectorError {
    /// Failure classification.
    #[must_use]
    pub const fn kind(&self) -> FailureKind {
        match self {
            Self::SourceUnavailable { .. } => FailureKind::SourceUnavailable,
            Self::EmptyFetch { .. } => FailureKind::EmptyFetchFailure,
            Self::Storage { .. } => FailureKind::StorageFailure,
        }
    }

    /// Tag of the source the run was collecting from.
    #[must_use]
    pub fn source_tag(&self) -> &str {
        match self {
            Self::SourceUnavailable { source_tag, .. }
            | Self::EmptyFetch { source_tag }
            | Self::Storage { source_tag, .. } => source_tag,
        }
    }
}

/// Single-source collection orchestrator.
pub struct Collector<S: DocumentStore> {
    engine: StorageEngine<S>,
    collections: CollectionNames,
    config: CollectorConfig,
}

impl<S: DocumentStore> Collector<S> {
    /// Create a new collector.
    pub const fn new(
        engine: StorageEngine<S>,
        collections: CollectionNames,
        config: CollectorConfig,
    ) -> Self {
        Self {
            engine,
            collections,
            config,
        }
    }

    /// Collect once from `registered` and write with `mode`.
    pub async fn run_once(
        &self,
        registered: &RegisteredSource,
        mode: WriteMode,
    ) -> Result<CollectionRun, CollectorError> {
        let started = Instant::now();
        let source = registered.source.as_ref();
        let tag = source.tag().to_string();
        let mut run = CollectionRun::start(tag.as_str(), mode);

        tracing::info!(source = %tag, run_id = %run.run_id, mode = %mode, "Collection run started");

        let result = self.collect(registered, &mut run).await;
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                let outcome = if run.failed_entities().is_empty() {
                    RunOutcome::Success
                } else {
                    RunOutcome::Partial
                };
                metrics::record_documents_written(&tag, mode, run.counts.changed());
                metrics::record_collection_run(&tag, outcome, elapsed);
                tracing::info!(
                    source = %tag,
                    run_id = %run.run_id,
                    written = run.written_entities().len(),
                    failed = run.failed_entities().len(),
                    matched = run.counts.matched,
                    modified = run.counts.modified,
                    upserted = run.counts.upserted,
                    inserted = run.counts.inserted,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Collection run finished"
                );
                Ok(run)
            }
            Err(e) => {
                metrics::record_collection_run(&tag, RunOutcome::Failed, elapsed);
                tracing::error!(source = %tag, run_id = %run.run_id, kind = %e.kind(), error = %e, "Collection run failed");
                Err(e)
            }
        }
    }

    async fn collect(
        &self,
        registered: &RegisteredSource,
        run: &mut CollectionRun,
    ) -> Result<(), CollectorError> {
        let source = registered.source.as_ref();
        let tag = source.tag();
        let fetch_timeout = self.config.fetch_timeout;

        // 1. List entities
        let entities = match tokio::time::timeout(fetch_timeout, source.list_entities()).await {
            Ok(Ok(entities)) => entities,
            Ok(Err(e)) => {
                return Err(CollectorError::SourceUnavailable {
                    source_tag: tag.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CollectorError::SourceUnavailable {
                    source_tag: tag.to_string(),
                    message: format!("listing timed out after {}ms", fetch_timeout.as_millis()),
                });
            }
        };
        if entities.is_empty() {
            return Err(CollectorError::EmptyFetch {
                source_tag: tag.to_string(),
            });
        }

        // 2. Fetch all details before writing anything
        let mut fetched: Vec<_> = stream::iter(entities.into_iter().enumerate())
            .map(|(index, entity)| async move {
                let result = tokio::time::timeout(fetch_timeout, source.fetch_detail(&entity.key)).await;
                (index, entity.key, Timestamp::now(), result)
            })
            .buffer_unordered(self.config.max_concurrent_fetches.max(1))
            .collect()
            .await;
        fetched.sort_by_key(|(index, ..)| *index);

        // 3. Shape payloads, recording failures per entity
        let mut batch: Vec<Snapshot> = vec![];
        let mut owners: Vec<String> = vec![];
        for (_, key, captured_at, result) in fetched {
            let payload = match result {
                Ok(Ok(payload)) => payload,
                Ok(Err(e)) => {
                    Self::fail_entity(run, &key, FailureKind::SourceUnavailable, e.to_string());
                    continue;
                }
                Err(_) => {
                    let message = format!("fetch timed out after {}ms", fetch_timeout.as_millis());
                    Self::fail_entity(run, &key, FailureKind::SourceUnavailable, message);
                    continue;
                }
            };

            match Snapshot::from_payload(&key, tag, captured_at, payload) {
                Ok(snapshots) => {
                    run.record_written(key.as_str(), snapshots.len());
                    owners.extend(std::iter::repeat_n(key, snapshots.len()));
                    batch.extend(snapshots);
                }
                Err(e) => Self::fail_entity(run, &key, FailureKind::CodecFailure, e.to_string()),
            }
        }

        // 4. One bulk write
        if batch.is_empty() {
            run.finish(Default::default());
            return Ok(());
        }

        let mode = run.mode;
        let write = async {
            match mode {
                WriteMode::Upsert => {
                    self.engine
                        .write_current(&self.collections.current, &batch, &registered.dedup)
                        .await
                }
                WriteMode::Historical => {
                    self.engine
                        .write_historical(&self.collections.history, &batch)
                        .await
                }
            }
        };
        let result = match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(Ok(result)) => result,
            Ok(Err(source)) => {
                return Err(CollectorError::Storage {
                    source_tag: tag.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(CollectorError::Storage {
                    source_tag: tag.to_string(),
                    source: StorageError::Timeout {
                        timeout_ms: self.config.write_timeout.as_millis() as u64,
                    },
                });
            }
        };

        for error in &result.errors {
            if let Some(owner) = owners.get(error.index) {
                tracing::warn!(source = %tag, entity = %owner, error = %error.message, "Document rejected by storage");
                metrics::record_entity_failure(tag, FailureKind::StorageFailure);
                run.record_entry_error(error.index, owner, error.message.clone());
            }
        }
        for entry in result.diagnostics {
            if let Some(owner) = owners.get(entry.index) {
                run.record_diagnostic(owner, entry.diagnostic);
            }
        }
        run.finish(result.counts);
        Ok(())
    }

    fn fail_entity(run: &mut CollectionRun, key: &str, kind: FailureKind, message: String) {
        tracing::warn!(source = %run.source_tag, entity = %key, kind = %kind, error = %message, "Entity skipped");
        metrics::record_entity_failure(&run.source_tag, kind);
        run.record_failure(key, kind, message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{DocumentFilter, SortOrder};
    use crate::domain::codec::Codec;
    use crate::domain::snapshot::EntityStatus;
    use crate::infrastructure::persistence::InMemoryDocumentStore;
    use crate::infrastructure::sources::StaticMarketDataSource;
    use serde_json::json;

    fn collector(store: &Arc<InMemoryDocumentStore>, config: CollectorConfig) -> Collector<InMemoryDocumentStore> {
        Collector::new(
            StorageEngine::new(Arc::clone(store), Codec::new()),
            CollectionNames::default(),
            config,
        )
    }

    fn three_entities() -> StaticMarketDataSource {
        StaticMarketDataSource::new("drift")
            .with_entity("A", json!({"fundingRate": 1}))
            .with_entity("B", json!({"fundingRate": 2}))
            .with_entity("C", json!({"fundingRate": 3}))
    }

    fn registered(source: StaticMarketDataSource) -> RegisteredSource {
        RegisteredSource::new(Arc::new(source), DedupStrategy::price_snapshot())
    }

    #[tokio::test]
    async fn writes_all_entities_in_one_batch() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());

        let run = collector
            .run_once(&registered(three_entities()), WriteMode::Upsert)
            .await
            .unwrap();

        assert_eq!(run.written_entities(), ["A", "B", "C"]);
        assert_eq!(run.counts.upserted, 3);
        assert_eq!(store.write_log().len(), 1);
        assert!(run.finished_at.is_some());
    }

    #[tokio::test]
    async fn failed_fetch_is_isolated() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let source = three_entities().with_failing_entity("B");

        let run = collector.run_once(&registered(source), WriteMode::Upsert).await.unwrap();

        assert_eq!(run.written_entities(), ["A", "C"]);
        assert_eq!(run.failed_entities(), ["B"]);
        let log = store.write_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].entity_keys, ["A", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_for_that_entity_only() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let config = CollectorConfig {
            fetch_timeout: Duration::from_millis(100),
            ..CollectorConfig::default()
        };
        let collector = collector(&store, config);
        let source = three_entities().with_slow_entity("C", Duration::from_secs(5));

        let run = collector.run_once(&registered(source), WriteMode::Upsert).await.unwrap();

        assert_eq!(run.written_entities(), ["A", "B"]);
        match &run.outcome("C").unwrap().status {
            EntityStatus::Failed { kind, message } => {
                assert_eq!(*kind, FailureKind::SourceUnavailable);
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_listing_fails_the_run() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());

        let err = collector
            .run_once(&registered(StaticMarketDataSource::new("drift")), WriteMode::Upsert)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), FailureKind::EmptyFetchFailure);
        assert!(store.write_log().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_fails_the_run() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let source = three_entities().with_list_error("502 bad gateway");

        let err = collector.run_once(&registered(source), WriteMode::Upsert).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::SourceUnavailable);
        assert_eq!(err.source_tag(), "drift");
    }

    #[tokio::test]
    async fn scalar_payload_is_codec_failure() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let source = three_entities().with_entity("D", json!(42));

        let run = collector.run_once(&registered(source), WriteMode::Upsert).await.unwrap();
        match &run.outcome("D").unwrap().status {
            EntityStatus::Failed { kind, .. } => assert_eq!(*kind, FailureKind::CodecFailure),
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(run.counts.upserted, 3);
    }

    #[tokio::test]
    async fn entry_rejection_flips_entity_to_storage_failure() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.reject_entity("B");
        let collector = collector(&store, CollectorConfig::default());

        let run = collector
            .run_once(&registered(three_entities()), WriteMode::Upsert)
            .await
            .unwrap();

        assert_eq!(run.written_entities(), ["A", "C"]);
        assert_eq!(run.entry_errors.len(), 1);
        assert_eq!(run.entry_errors[0].entity_key, "B");
        assert_eq!(run.counts.failed, 1);
    }

    #[tokio::test]
    async fn replaced_fields_are_recorded_on_the_run() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let payload = crate::domain::value::Value::object([
            ("fundingRate", crate::domain::value::Value::Int(4)),
            ("basis", crate::domain::value::Value::Float(f64::INFINITY)),
        ]);
        let source = three_entities().with_entity("D", payload);

        let run = collector.run_once(&registered(source), WriteMode::Upsert).await.unwrap();

        assert_eq!(run.written_entities(), ["A", "B", "C", "D"]);
        assert_eq!(run.encode_diagnostics.len(), 1);
        assert_eq!(run.encode_diagnostics[0].entity_key, "D");
        assert_eq!(run.encode_diagnostics[0].path, "$.basis");
        assert_eq!(store.len("snapshots"), 4);
    }

    #[tokio::test]
    async fn unavailable_store_fails_the_run() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.set_unavailable(true);
        let collector = collector(&store, CollectorConfig::default());

        let err = collector
            .run_once(&registered(three_entities()), WriteMode::Historical)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CollectorError::Storage {
                source: StorageError::Unavailable { .. },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn historical_mode_appends_and_stamps_metadata() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let source = registered(three_entities());

        collector.run_once(&source, WriteMode::Historical).await.unwrap();
        let run = collector.run_once(&source, WriteMode::Historical).await.unwrap();
        assert_eq!(run.counts.inserted, 3);

        let docs = store
            .find("snapshot_history", &DocumentFilter::entity("A", None), SortOrder::CapturedAtDesc, None)
            .await
            .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].body["sourceTag"], "drift");
        assert_eq!(docs[0].body["entityKey"], "A");
        assert!(store.is_empty("snapshots"));
    }

    #[tokio::test]
    async fn array_payload_writes_one_document_per_record() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let collector = collector(&store, CollectorConfig::default());
        let source = StaticMarketDataSource::new("drift").with_entity(
            "SOL-PERP",
            json!([
                {"recordId": 1, "market": "SOL-PERP", "fundingRate": 5},
                {"recordId": 2, "market": "SOL-PERP", "fundingRate": 6}
            ]),
        );
        let registered = RegisteredSource::new(Arc::new(source), DedupStrategy::funding_rate());

        let run = collector.run_once(&registered, WriteMode::Upsert).await.unwrap();
        assert_eq!(
            run.outcome("SOL-PERP").unwrap().status,
            EntityStatus::Written { documents: 2 }
        );
        assert_eq!(store.len("snapshots"), 2);
    }
}
