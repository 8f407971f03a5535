//! Prometheus Metrics Module
//!
//! # Metrics Categories
//!
//! - **Runs**: collection runs per source and outcome, run duration
//! - **Entities**: per-entity failures by failure kind
//! - **Storage**: documents written per source and write mode
//! - **Scheduler**: ticks skipped by the single-flight guard
//! - **Codec**: fields replaced with diagnostics during encoding
//!
//! Recording functions are no-ops until [`init_metrics`] installs the recorder,
//! so services and tests can call them unconditionally.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::domain::shared::FailureKind;
use crate::domain::snapshot::WriteMode;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Later calls return the handle installed by the first one.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
#[allow(clippy::expect_used)]
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_snapshots_collection_runs_total",
        "Collection runs by source and outcome"
    );
    describe_counter!(
        "market_snapshots_entities_failed_total",
        "Entities skipped during collection by failure kind"
    );
    describe_counter!(
        "market_snapshots_documents_written_total",
        "Documents created or changed by source and write mode"
    );
    describe_counter!(
        "market_snapshots_cycles_total",
        "Scheduled or triggered collection cycles by outcome"
    );
    describe_counter!(
        "market_snapshots_ticks_skipped_total",
        "Scheduler ticks skipped because a cycle was still running"
    );
    describe_counter!(
        "market_snapshots_codec_diagnostics_total",
        "Fields replaced with diagnostic strings during encoding"
    );
    describe_histogram!(
        "market_snapshots_collection_run_seconds",
        "Duration of one collection run against one source"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for runs and cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every entity was written.
    Success,
    /// Some entities failed.
    Partial,
    /// The run failed as a whole.
    Failed,
}

impl RunOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }
}

/// Record a finished collection run.
pub fn record_collection_run(source: &str, outcome: RunOutcome, duration: Duration) {
    counter!(
        "market_snapshots_collection_runs_total",
        "source" => source.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
    histogram!(
        "market_snapshots_collection_run_seconds",
        "source" => source.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record an entity skipped during collection.
pub fn record_entity_failure(source: &str, kind: FailureKind) {
    counter!(
        "market_snapshots_entities_failed_total",
        "source" => source.to_string(),
        "kind" => kind.as_label()
    )
    .increment(1);
}

/// Record documents created or changed by a bulk write.
pub fn record_documents_written(source: &str, mode: WriteMode, count: u64) {
    counter!(
        "market_snapshots_documents_written_total",
        "source" => source.to_string(),
        "mode" => mode.as_str()
    )
    .increment(count);
}

/// Record a finished cycle.
pub fn record_cycle(outcome: RunOutcome) {
    counter!("market_snapshots_cycles_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a tick skipped by the single-flight guard.
pub fn record_tick_skipped() {
    counter!("market_snapshots_ticks_skipped_total").increment(1);
}

/// Record fields replaced during encoding.
pub fn record_codec_diagnostics(count: usize) {
    if count > 0 {
        counter!("market_snapshots_codec_diagnostics_total").increment(count as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_labels() {
        assert_eq!(RunOutcome::Success.as_str(), "success");
        assert_eq!(RunOutcome::Partial.as_str(), "partial");
        assert_eq!(RunOutcome::Failed.as_str(), "failed");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_collection_run("drift", RunOutcome::Success, Duration::from_millis(5));
        record_entity_failure("drift", FailureKind::SourceUnavailable);
        record_codec_diagnostics(0);
        record_tick_skipped();
    }
}
