//! Application ports (interfaces for infrastructure).
//!
//! Following Hexagonal Architecture, these traits are implemented by
//! infrastructure adapters and consumed by application services.

mod document_store;
mod market_data_source;

pub use document_store::{
    BulkWriteResult, DocumentFilter, DocumentStore, EntryDiagnostic, EntryError, KeySummary, NewDocument,
    SortOrder, StorageError, StoredDocument, UpsertOp,
};
pub use market_data_source::{EntityDescriptor, MarketDataSource, RawPayload, SourceError};
