//! Collection Service
//!
//! One cycle runs the collector against every configured source in turn.
//! A failing source is logged and skipped; the cycle only fails when no
//! source succeeded.

use async_trait::async_trait;
use serde::Serialize;

use super::collector::{Collector, CollectorError, RegisteredSource};
use crate::application::ports::DocumentStore;
use crate::domain::shared::FailureKind;
use crate::domain::snapshot::{CollectionRun, WriteMode};

/// A source whose run failed as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFailure {
    /// Source tag.
    pub source_tag: String,
    /// Failure classification.
    pub kind: FailureKind,
    /// Error details.
    pub message: String,
}

impl From<&CollectorError> for SourceFailure {
    fn from(err: &CollectorError) -> Self {
        Self {
            source_tag: err.source_tag().to_string(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of one cycle across all sources.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    /// Write mode used.
    pub mode: WriteMode,
    /// Completed runs, in source order.
    pub runs: Vec<CollectionRun>,
    /// Sources whose run failed.
    pub failures: Vec<SourceFailure>,
}

impl CycleReport {
    /// Entities that failed across all completed runs.
    #[must_use]
    pub fn failed_entities(&self) -> usize {
        self.runs.iter().map(|r| r.failed_entities().len()).sum()
    }

    /// Whether anything failed, at source or entity level.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        !self.failures.is_empty() || self.failed_entities() > 0
    }
}

/// A repeatable collection cycle. Implemented by [`CollectionService`];
/// the scheduler only depends on this.
#[async_trait]
pub trait CycleJob: Send + Sync + 'static {
    /// Run one cycle.
    async fn run_cycle(&self, mode: WriteMode) -> Result<CycleReport, CollectorError>;
}

/// Runs the collector across all registered sources.
pub struct CollectionService<S: DocumentStore> {
    collector: Collector<S>,
    sources: Vec<RegisteredSource>,
}

impl<S: DocumentStore> CollectionService<S> {
    /// Create a new collection service.
    pub const fn new(collector: Collector<S>, sources: Vec<RegisteredSource>) -> Self {
        Self { collector, sources }
    }

    /// Registered sources.
    #[must_use]
    pub fn sources(&self) -> &[RegisteredSource] {
        &self.sources
    }
}

#[async_trait]
impl<S: DocumentStore + 'static> CycleJob for CollectionService<S> {
    async fn run_cycle(&self, mode: WriteMode) -> Result<CycleReport, CollectorError> {
        let mut report = CycleReport {
            mode,
            ..CycleReport::default()
        };
        if self.sources.is_empty() {
            tracing::warn!("No sources configured, nothing to collect");
            return Ok(report);
        }

        let mut last_error = None;
        for registered in &self.sources {
            match self.collector.run_once(registered, mode).await {
                Ok(run) => report.runs.push(run),
                Err(e) => {
                    report.failures.push(SourceFailure::from(&e));
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if report.runs.is_empty() => Err(e),
            _ => Ok(report),
        }
    }
}
