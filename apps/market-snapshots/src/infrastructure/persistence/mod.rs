//! Persistence Adapters
//!
//! Implementations of the `DocumentStore` port:
//!
//! - [`InMemoryDocumentStore`]: process-local, for tests and development
//! - [`TursoDocumentStore`]: embedded Turso (SQLite-compatible) database file

mod in_memory;
mod turso_store;

pub use in_memory::{InMemoryDocumentStore, WriteCall};
pub use turso_store::TursoDocumentStore;
