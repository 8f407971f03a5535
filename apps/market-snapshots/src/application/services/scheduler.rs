//! Scheduler
//!
//! Fires a [`CycleJob`] at a fixed interval with single-flight protection.
//!
//! # States
//!
//! `Idle -> Running -> Idle` while the loop is alive, `Stopped` once
//! [`Scheduler::stop`] has cancelled it. Stopping prevents new cycles; a cycle
//! already in flight runs to completion.
//!
//! A tick that finds a cycle in flight is skipped and counted, never queued.
//! Cycle failures and panics are logged and the schedule continues.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::collection_service::{CycleJob, CycleReport};
use super::collector::CollectorError;
use crate::domain::shared::Timestamp;
use crate::domain::snapshot::WriteMode;
use crate::infrastructure::metrics::{self, RunOutcome};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub interval: Duration,
    /// Fire the first tick on start instead of one interval later.
    pub run_immediately: bool,
    /// Write mode for scheduled cycles.
    pub mode: WriteMode,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            run_immediately: true,
            mode: WriteMode::Upsert,
        }
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    /// No cycle in flight.
    Idle,
    /// A cycle is in flight.
    Running,
    /// Cancelled. Terminal.
    Stopped,
}

/// Scheduler errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// A cycle is already in flight.
    #[error("a collection cycle is already running")]
    AlreadyRunning,

    /// The scheduler has been stopped.
    #[error("scheduler is stopped")]
    Stopped,

    /// The cycle failed.
    #[error(transparent)]
    Cycle(#[from] CollectorError),

    /// The cycle panicked.
    #[error("collection cycle panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Summary of the most recent finished cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    /// When the cycle finished.
    pub finished_at: Timestamp,
    /// Write mode used.
    pub mode: WriteMode,
    /// Whether the cycle succeeded (possibly partially).
    pub success: bool,
    /// Completed source runs.
    pub runs: usize,
    /// Failed sources plus failed entities.
    pub failures: usize,
    /// Error of a failed cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Shared<J> {
    job: Arc<J>,
    running: AtomicBool,
    skipped_ticks: AtomicU64,
    last_run: RwLock<Option<LastRun>>,
    idle: Notify,
}

/// Holds the single-flight flag for the lifetime of one cycle.
struct RunGuard<J> {
    shared: Arc<Shared<J>>,
}

impl<J> RunGuard<J> {
    fn acquire(shared: &Arc<Shared<J>>) -> Option<Self> {
        shared
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self {
                shared: Arc::clone(shared),
            })
    }
}

impl<J> Drop for RunGuard<J> {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.idle.notify_waiters();
    }
}

/// Interval scheduler for collection cycles.
pub struct Scheduler<J: CycleJob> {
    config: SchedulerConfig,
    shared: Arc<Shared<J>>,
    shutdown: CancellationToken,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<J: CycleJob> Scheduler<J> {
    /// Create a scheduler. Nothing runs until [`Scheduler::start`].
    pub fn new(config: SchedulerConfig, job: Arc<J>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                job,
                running: AtomicBool::new(false),
                skipped_ticks: AtomicU64::new(0),
                last_run: RwLock::new(None),
                idle: Notify::new(),
            }),
            shutdown: CancellationToken::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Scheduler settings.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Spawn the tick loop. Does nothing if it is already running or the
    /// scheduler has been stopped.
    pub fn start(&self) {
        if self.shutdown.is_cancelled() {
            tracing::warn!("Scheduler is stopped, not starting");
            return;
        }
        let mut handle = self.loop_handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let shutdown = self.shutdown.clone();
        let config = self.config;
        *handle = Some(tokio::spawn(run_loop(shared, shutdown, config)));

        tracing::info!(
            interval_secs = config.interval.as_secs_f64(),
            run_immediately = config.run_immediately,
            mode = %config.mode,
            "Scheduler started"
        );
    }

    /// Cancel the tick loop. In-flight cycles are not interrupted.
    pub fn stop(&self) {
        if !self.shutdown.is_cancelled() {
            self.shutdown.cancel();
            tracing::info!("Scheduler stopping");
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        if self.shutdown.is_cancelled() {
            SchedulerState::Stopped
        } else if self.shared.running.load(Ordering::Acquire) {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Run one cycle now and wait for it, under the same single-flight guard
    /// as scheduled ticks.
    pub async fn trigger(&self, mode: WriteMode) -> Result<CycleReport, SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::Stopped);
        }
        let guard = RunGuard::acquire(&self.shared).ok_or(SchedulerError::AlreadyRunning)?;

        tracing::info!(mode = %mode, "Collection cycle triggered");
        spawn_cycle(guard, mode).await.unwrap_or_else(|e| {
            Err(SchedulerError::Panicked {
                message: e.to_string(),
            })
        })
    }

    /// Wait until no cycle is in flight. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.shared.running.load(Ordering::Acquire) {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return !self.shared.running.load(Ordering::Acquire);
            }
        }
    }

    /// Summary of the most recent finished cycle.
    pub fn last_run(&self) -> Option<LastRun> {
        self.shared.last_run.read().clone()
    }

    /// Ticks skipped because a cycle was in flight.
    pub fn skipped_ticks(&self) -> u64 {
        self.shared.skipped_ticks.load(Ordering::Relaxed)
    }
}

async fn run_loop<J: CycleJob>(shared: Arc<Shared<J>>, shutdown: CancellationToken, config: SchedulerConfig) {
    let period = config.interval.max(MIN_INTERVAL);
    let first = if config.run_immediately {
        Instant::now()
    } else {
        Instant::now() + period
    };
    let mut ticker = tokio::time::interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                tracing::info!("Scheduler stopped");
                break;
            }

            _ = ticker.tick() => {
                match RunGuard::acquire(&shared) {
                    Some(guard) => {
                        // Detached; the guard keeps the flag set until the cycle ends.
                        drop(spawn_cycle(guard, config.mode));
                    }
                    None => {
                        shared.skipped_ticks.fetch_add(1, Ordering::Relaxed);
                        metrics::record_tick_skipped();
                        tracing::info!("Previous cycle still running, skipping tick");
                    }
                }
            }
        }
    }
}

/// Run the job in its own task so a panic surfaces as a `JoinError` instead of
/// unwinding through the caller.
fn spawn_cycle<J: CycleJob>(
    guard: RunGuard<J>,
    mode: WriteMode,
) -> JoinHandle<Result<CycleReport, SchedulerError>> {
    tokio::spawn(async move {
        let shared = Arc::clone(&guard.shared);
        let job = Arc::clone(&shared.job);

        let result = match tokio::spawn(async move { job.run_cycle(mode).await }).await {
            Ok(Ok(report)) => Ok(report),
            Ok(Err(e)) => Err(SchedulerError::Cycle(e)),
            Err(join_error) => Err(SchedulerError::Panicked {
                message: panic_message(join_error),
            }),
        };

        record_outcome(&shared, mode, &result);
        drop(guard);
        result
    })
}

fn record_outcome<J>(shared: &Shared<J>, mode: WriteMode, result: &Result<CycleReport, SchedulerError>) {
    let last = match result {
        Ok(report) => {
            let outcome = if report.is_partial() {
                RunOutcome::Partial
            } else {
                RunOutcome::Success
            };
            metrics::record_cycle(outcome);
            tracing::info!(
                mode = %mode,
                runs = report.runs.len(),
                failed_sources = report.failures.len(),
                failed_entities = report.failed_entities(),
                "Collection cycle finished"
            );
            LastRun {
                finished_at: Timestamp::now(),
                mode,
                success: true,
                runs: report.runs.len(),
                failures: report.failures.len() + report.failed_entities(),
                error: None,
            }
        }
        Err(e) => {
            metrics::record_cycle(RunOutcome::Failed);
            tracing::error!(mode = %mode, error = %e, "Collection cycle failed");
            LastRun {
                finished_at: Timestamp::now(),
                mode,
                success: false,
                runs: 0,
                failures: 1,
                error: Some(e.to_string()),
            }
        }
    };
    *shared.last_run.write() = Some(last);
}

fn panic_message(err: tokio::task::JoinError) -> String {
    match err.try_into_panic() {
        Ok(payload) => payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string()),
        Err(err) => err.to_string(),
    }
}
