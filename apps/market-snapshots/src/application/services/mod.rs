//! Application Services
//!
//! - [`StorageEngine`]: encodes snapshots and writes them in bulk
//! - [`QueryEngine`]: latest-per-key, bounded history and key listings
//! - [`Collector`]: one collection run against one source
//! - [`CollectionService`]: one cycle across all sources
//! - [`Scheduler`]: interval driver with single-flight protection

mod collection_service;
mod collector;
mod query_engine;
mod scheduler;
mod storage_engine;

pub use collection_service::{CollectionService, CycleJob, CycleReport, SourceFailure};
pub use collector::{Collector, CollectorConfig, CollectorError, RegisteredSource};
pub use query_engine::{HistoryQuery, LatestQuery, ParseViewError, QueryEngine, QueryError, View};
pub use scheduler::{LastRun, Scheduler, SchedulerConfig, SchedulerError, SchedulerState};
pub use storage_engine::{CollectionNames, StorageEngine};
