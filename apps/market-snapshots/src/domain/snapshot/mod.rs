//! Snapshot records and the types that travel with a collection cycle.

mod dedup;
mod mode;
mod projection;
mod record;
mod run;

pub use dedup::{DedupError, DedupKey, DedupStrategy};
pub use mode::{ParseWriteModeError, WriteMode};
pub use projection::Projection;
pub use record::{CAPTURED_AT_FIELD, ENTITY_KEY_FIELD, SOURCE_TAG_FIELD, Snapshot};
pub use run::{
    CollectionRun, EntityOutcome, EntityStatus, RunDiagnostic, RunEntryError, WriteCounts,
};
