//! Turso document store.
//!
//! All collections share one `documents` table. `id` is the rowid alias and
//! grows monotonically since rows are never deleted here. `captured_at` is
//! stored as Unix milliseconds and `body` as compact JSON text.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::Mutex;
use turso::{Builder, Connection, Database, Row, Rows, Value};

use crate::application::ports::{
    BulkWriteResult, DocumentFilter, DocumentStore, KeySummary, NewDocument, SortOrder,
    StorageError, StoredDocument, UpsertOp,
};
use crate::domain::shared::Timestamp;

// ============================================================================
// Schema
// ============================================================================

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY,
        collection TEXT NOT NULL,
        dedup_key TEXT,
        entity_key TEXT NOT NULL,
        source_tag TEXT NOT NULL,
        captured_at INTEGER NOT NULL,
        body TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_documents_entity
        ON documents (collection, entity_key, source_tag, captured_at)",
    "CREATE INDEX IF NOT EXISTS idx_documents_dedup
        ON documents (collection, dedup_key)",
];

const DOCUMENT_COLUMNS: &str = "id, entity_key, source_tag, captured_at, body";

// ============================================================================
// Store
// ============================================================================

/// `DocumentStore` backed by an embedded Turso database file.
///
/// One long-lived connection is shared by all callers. Calls are serialized
/// on it, which also keeps each read-compare-write upsert self-contained.
pub struct TursoDocumentStore {
    path: String,
    _database: Database,
    conn: Mutex<Option<Connection>>,
}

impl fmt::Debug for TursoDocumentStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TursoDocumentStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl TursoDocumentStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// `:memory:` opens a private in-memory database.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let database = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| unavailable(&e))?;
        let conn = database.connect().map_err(|e| unavailable(&e))?;

        for statement in SCHEMA {
            conn.execute(statement, ()).await.map_err(|e| query_error(&e))?;
        }

        tracing::info!(path, "Snapshot store opened");

        Ok(Self {
            path: path.to_string(),
            _database: database,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Database path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl DocumentStore for TursoDocumentStore {
    async fn find(
        &self,
        collection: &str,
        filter: &DocumentFilter,
        sort: SortOrder,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;

        let (clause, params) = where_clause(collection, filter);
        let order = match sort {
            SortOrder::CapturedAtDesc => "captured_at DESC, id DESC",
            SortOrder::CapturedAtAsc => "captured_at ASC, id ASC",
        };
        let mut sql = format!("SELECT {DOCUMENT_COLUMNS} FROM documents {clause} ORDER BY {order}");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        let rows = conn.query(&sql, params).await.map_err(|e| query_error(&e))?;
        read_documents(rows).await
    }

    async fn bulk_upsert(
        &self,
        collection: &str,
        ops: Vec<UpsertOp>,
    ) -> Result<BulkWriteResult, StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;

        let mut result = BulkWriteResult::default();
        for (index, op) in ops.into_iter().enumerate() {
            match upsert_one(conn, collection, op).await {
                Ok(UpsertOutcome::Unchanged) => result.counts.matched += 1,
                Ok(UpsertOutcome::Replaced) => {
                    result.counts.matched += 1;
                    result.counts.modified += 1;
                }
                Ok(UpsertOutcome::Inserted) => result.counts.upserted += 1,
                Err(e) => {
                    tracing::warn!(collection, index, error = %e, "Upsert entry failed");
                    result.reject(index, e.to_string());
                }
            }
        }
        Ok(result)
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<NewDocument>,
    ) -> Result<BulkWriteResult, StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;

        let mut result = BulkWriteResult::default();
        for (index, document) in documents.into_iter().enumerate() {
            match insert_one(conn, collection, None, &document).await {
                Ok(()) => result.counts.inserted += 1,
                Err(e) => {
                    tracing::warn!(collection, index, error = %e, "Insert entry failed");
                    result.reject(index, e.to_string());
                }
            }
        }
        Ok(result)
    }

    async fn latest_per_key(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<StoredDocument>, StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;

        // Keys come from the grouped index scan; each winner is then one
        // indexed LIMIT 1 lookup, so only winning bodies are read.
        let (clause, params) = where_clause(collection, filter);
        let sql = format!(
            "SELECT entity_key, source_tag FROM documents {clause} \
             GROUP BY entity_key, source_tag ORDER BY entity_key, source_tag"
        );
        let mut rows = conn.query(&sql, params).await.map_err(|e| query_error(&e))?;
        let mut groups = vec![];
        while let Some(row) = rows.next().await.map_err(|e| query_error(&e))? {
            groups.push((text_at(&row, 0)?, text_at(&row, 1)?));
        }
        drop(rows);

        let sql = format!(
            "SELECT {DOCUMENT_COLUMNS} FROM documents \
             WHERE collection = ? AND entity_key = ? AND source_tag = ? \
             ORDER BY captured_at DESC, id DESC LIMIT 1"
        );
        let mut latest = Vec::with_capacity(groups.len());
        for (entity_key, source_tag) in groups {
            let params = vec![
                Value::Text(collection.to_string()),
                Value::Text(entity_key),
                Value::Text(source_tag),
            ];
            let rows = conn.query(&sql, params).await.map_err(|e| query_error(&e))?;
            latest.extend(read_documents(rows).await?);
        }
        Ok(latest)
    }

    async fn key_summaries(
        &self,
        collection: &str,
        filter: &DocumentFilter,
    ) -> Result<Vec<KeySummary>, StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;

        let (clause, params) = where_clause(collection, filter);
        let sql = format!(
            "SELECT entity_key, source_tag, COUNT(*), MAX(captured_at) FROM documents {clause} \
             GROUP BY entity_key, source_tag ORDER BY entity_key, source_tag"
        );
        let mut rows = conn.query(&sql, params).await.map_err(|e| query_error(&e))?;

        let mut summaries = vec![];
        while let Some(row) = rows.next().await.map_err(|e| query_error(&e))? {
            summaries.push(KeySummary {
                entity_key: text_at(&row, 0)?,
                source_tag: text_at(&row, 1)?,
                documents: u64::try_from(integer_at(&row, 2)?).unwrap_or_default(),
                latest_captured_at: timestamp_at(&row, 3)?,
            });
        }
        Ok(summaries)
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let guard = self.conn.lock().await;
        let conn = open_connection(guard.as_ref())?;
        let mut rows = conn.query("SELECT 1", ()).await.map_err(|e| unavailable(&e))?;
        rows.next().await.map_err(|e| unavailable(&e))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.conn.lock().await.take().is_some() {
            tracing::info!(path = %self.path, "Snapshot store closed");
        }
        Ok(())
    }
}

// ============================================================================
// Statements
// ============================================================================

enum UpsertOutcome {
    Unchanged,
    Replaced,
    Inserted,
}

async fn upsert_one(
    conn: &Connection,
    collection: &str,
    op: UpsertOp,
) -> Result<UpsertOutcome, StorageError> {
    let mut rows = conn
        .query(
            "SELECT id, body FROM documents WHERE collection = ? AND dedup_key = ? LIMIT 1",
            vec![
                Value::Text(collection.to_string()),
                Value::Text(op.key.as_str().to_string()),
            ],
        )
        .await
        .map_err(|e| query_error(&e))?;
    let existing = match rows.next().await.map_err(|e| query_error(&e))? {
        Some(row) => Some((integer_at(&row, 0)?, parse_body(&text_at(&row, 1)?)?)),
        None => None,
    };
    drop(rows);

    match existing {
        Some((_, stored)) if op.document.same_content(&stored) => Ok(UpsertOutcome::Unchanged),
        Some((id, _)) => {
            conn.execute(
                "UPDATE documents SET entity_key = ?, source_tag = ?, captured_at = ?, body = ? WHERE id = ?",
                vec![
                    Value::Text(op.document.entity_key.clone()),
                    Value::Text(op.document.source_tag.clone()),
                    Value::Integer(op.document.captured_at.unix_millis()),
                    Value::Text(op.document.body.to_string()),
                    Value::Integer(id),
                ],
            )
            .await
            .map_err(|e| query_error(&e))?;
            Ok(UpsertOutcome::Replaced)
        }
        None => {
            insert_one(conn, collection, Some(op.key.as_str()), &op.document).await?;
            Ok(UpsertOutcome::Inserted)
        }
    }
}

async fn insert_one(
    conn: &Connection,
    collection: &str,
    dedup_key: Option<&str>,
    document: &NewDocument,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO documents (collection, dedup_key, entity_key, source_tag, captured_at, body) \
         VALUES (?, ?, ?, ?, ?, ?)",
        vec![
            Value::Text(collection.to_string()),
            dedup_key.map_or(Value::Null, |k| Value::Text(k.to_string())),
            Value::Text(document.entity_key.clone()),
            Value::Text(document.source_tag.clone()),
            Value::Integer(document.captured_at.unix_millis()),
            Value::Text(document.body.to_string()),
        ],
    )
    .await
    .map_err(|e| query_error(&e))?;
    Ok(())
}

fn where_clause(collection: &str, filter: &DocumentFilter) -> (String, Vec<Value>) {
    let mut clause = String::from("WHERE collection = ?");
    let mut params = vec![Value::Text(collection.to_string())];
    if let Some(entity_key) = &filter.entity_key {
        clause.push_str(" AND entity_key = ?");
        params.push(Value::Text(entity_key.clone()));
    }
    if let Some(source_tag) = &filter.source_tag {
        clause.push_str(" AND source_tag = ?");
        params.push(Value::Text(source_tag.clone()));
    }
    (clause, params)
}

// ============================================================================
// Row Mapping
// ============================================================================

async fn read_documents(mut rows: Rows) -> Result<Vec<StoredDocument>, StorageError> {
    let mut documents = vec![];
    while let Some(row) = rows.next().await.map_err(|e| query_error(&e))? {
        documents.push(row_to_document(&row)?);
    }
    Ok(documents)
}

fn row_to_document(row: &Row) -> Result<StoredDocument, StorageError> {
    Ok(StoredDocument {
        id: integer_at(row, 0)?,
        entity_key: text_at(row, 1)?,
        source_tag: text_at(row, 2)?,
        captured_at: timestamp_at(row, 3)?,
        body: parse_body(&text_at(row, 4)?)?,
    })
}

fn parse_body(text: &str) -> Result<serde_json::Value, StorageError> {
    serde_json::from_str(text).map_err(|e| StorageError::Serialization {
        message: format!("body is not valid JSON: {e}"),
    })
}

fn integer_at(row: &Row, index: usize) -> Result<i64, StorageError> {
    match row.get_value(index).map_err(|e| query_error(&e))? {
        Value::Integer(i) => Ok(i),
        other => Err(column_type_error(index, "integer", &other)),
    }
}

fn text_at(row: &Row, index: usize) -> Result<String, StorageError> {
    match row.get_value(index).map_err(|e| query_error(&e))? {
        Value::Text(s) => Ok(s),
        other => Err(column_type_error(index, "text", &other)),
    }
}

fn timestamp_at(row: &Row, index: usize) -> Result<Timestamp, StorageError> {
    let millis = integer_at(row, index)?;
    Timestamp::from_unix_millis(millis).ok_or_else(|| StorageError::Serialization {
        message: format!("captured_at {millis} is out of range"),
    })
}

fn column_type_error(index: usize, expected: &str, found: &Value) -> StorageError {
    let found = match found {
        Value::Null => "null",
        Value::Integer(_) => "integer",
        Value::Real(_) => "real",
        Value::Text(_) => "text",
        Value::Blob(_) => "blob",
    };
    StorageError::Serialization {
        message: format!("column {index}: expected {expected}, found {found}"),
    }
}

// ============================================================================
// Error Mapping
// ============================================================================

fn open_connection(conn: Option<&Connection>) -> Result<&Connection, StorageError> {
    conn.ok_or_else(|| StorageError::Unavailable {
        message: "store is closed".to_string(),
    })
}

fn unavailable(err: &turso::Error) -> StorageError {
    StorageError::Unavailable {
        message: err.to_string(),
    }
}

fn query_error(err: &turso::Error) -> StorageError {
    StorageError::Query {
        message: err.to_string(),
    }
}
