//! Failure taxonomy shared by collection runs, logs and metrics.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// A fetch from a market data source failed or timed out.
    SourceUnavailable,
    /// A payload could not be shaped into documents.
    CodecFailure,
    /// The storage backend rejected the write or query.
    StorageFailure,
    /// The source listed zero entities.
    EmptyFetchFailure,
}

impl FailureKind {
    /// Snake-case label used for metrics.
    #[must_use]
    pub const fn as_label(self) -> &'static str {
        match self {
            Self::SourceUnavailable => "source_unavailable",
            Self::CodecFailure => "codec_failure",
            Self::StorageFailure => "storage_failure",
            Self::EmptyFetchFailure => "empty_fetch_failure",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceUnavailable => "SourceUnavailable",
            Self::CodecFailure => "CodecFailure",
            Self::StorageFailure => "StorageFailure",
            Self::EmptyFetchFailure => "EmptyFetchFailure",
        };
        f.write_str(name)
    }
}
