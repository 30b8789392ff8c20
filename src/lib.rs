//! # mysqlite - declarative tables and JSON documents on SQLite
//!
//! A thin convenience layer over an embedded SQLite database.
//!
//! mysqlite provides:
//! - Field descriptors compiled into `CREATE TABLE IF NOT EXISTS` statements
//! - A statement executor that opens a fresh connection per call
//! - Guarded `UPDATE`s that never run without a filter
//! - JSON documents stored in a single column, read and shallow-merged by key
//! - PRAGMA-based reflection of existing tables back into descriptors

pub mod value;
pub mod schema;
pub mod storage;
pub mod document;
pub mod config;
pub mod output;
pub mod ui;

// Re-exports for convenient access
pub use value::Value;
pub use schema::{ColumnType, Field, TableSchema};
pub use storage::{CancelToken, ConnectionOptions, Fetch, Fetched, ResultSet, Row, SqliteStore};
pub use document::{AtomicDocuments, Document, DocumentRef, DocumentStore, RowMatch};

/// Result type alias for mysqlite operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for mysqlite operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Statement failed: {0}")]
    StatementFailed(#[from] rusqlite::Error),

    #[error("Corrupt document in {table}.{column}: {reason}")]
    CorruptDocument {
        table: String,
        column: String,
        reason: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
