//! Domain layer: payload values, the storage codec and snapshot records.
//!
//! Nothing in here performs I/O. Codec diagnostics are reported through
//! `tracing` so the data-loss policy stays observable.

pub mod codec;
pub mod shared;
pub mod snapshot;
pub mod value;
