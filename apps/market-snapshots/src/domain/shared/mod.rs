//! Shared domain types.

mod failure;
mod timestamp;

pub use failure::FailureKind;
pub use timestamp::Timestamp;
