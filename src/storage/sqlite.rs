//! SQLite statement executor
//!
//! [`SqliteStore`] keeps only the database path. Every call opens a fresh
//! connection and releases it on every exit path. Data-modifying statements
//! run inside a scoped transaction that commits only when asked to; anything
//! else (DDL, `VACUUM`, `PRAGMA`) runs in autocommit mode.

use super::statements::{self, Fetch, Fetched, ResultSet};
use crate::document::AtomicDocuments;
use crate::schema::TableSchema;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of VM instructions between progress handler checks
const PROGRESS_INTERVAL: i32 = 1000;

/// Cooperative cancellation shared between a caller and running statements.
///
/// Once cancelled, any statement running on a store configured with this token
/// is interrupted at its next progress check.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-connection settings applied every time a connection is opened
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    /// How long to wait on a locked database before failing
    pub busy_timeout: Duration,
    /// Upper bound on the time one call may spend executing statements
    pub statement_timeout: Option<Duration>,
    pub cancel: Option<CancelToken>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            statement_timeout: None,
            cancel: None,
        }
    }
}

/// SQLite statement executor bound to one database file
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    options: ConnectionOptions,
}

impl SqliteStore {
    /// Bind to a database file (created on first use if it doesn't exist)
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self::with_options(path, ConnectionOptions::default())
    }

    pub fn with_options(path: impl AsRef<Path>, options: ConnectionOptions) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            options,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Document accessor that runs each read-merge-write in one `IMMEDIATE` transaction
    pub fn atomic(&self) -> AtomicDocuments<'_> {
        AtomicDocuments::new(self)
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.options.busy_timeout)?;

        let deadline = self.options.statement_timeout.map(|t| Instant::now() + t);
        let cancel = self.options.cancel.clone();
        if deadline.is_some() || cancel.is_some() {
            conn.progress_handler(
                PROGRESS_INTERVAL,
                Some(move || {
                    cancel.as_ref().is_some_and(CancelToken::is_cancelled)
                        || deadline.is_some_and(|d| Instant::now() >= d)
                }),
            );
        }
        Ok(conn)
    }

    // ========== Scoped Acquisition ==========

    /// Open a connection, run `op` inside a deferred transaction, and commit
    /// only if `commit` is set and `op` succeeded.
    ///
    /// Uncommitted work is rolled back and the connection closed when the
    /// scope ends, whether `op` returned an error or not.
    pub fn with_connection<T>(
        &self,
        commit: bool,
        op: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        self.with_transaction(TransactionBehavior::Deferred, commit, op)
    }

    /// Same as [`SqliteStore::with_connection`] with an explicit transaction behavior
    pub fn with_transaction<T>(
        &self,
        behavior: TransactionBehavior,
        commit: bool,
        op: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(behavior)?;
        let result = op(&*tx)?;
        if commit {
            tx.commit()?;
        }
        Ok(result)
    }

    /// Open a connection and run `op` with no enclosing transaction
    fn with_autocommit<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.connect()?;
        op(&conn)
    }

    /// Scope for a raw statement: a transaction for DML, autocommit otherwise
    fn with_statement<T>(
        &self,
        sql: &str,
        commit: bool,
        op: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        if statements::is_dml(sql) {
            self.with_connection(commit, op)
        } else {
            self.with_autocommit(op)
        }
    }

    // ========== Statement Operations ==========

    /// Run one statement on its own connection.
    ///
    /// `commit` only matters for `INSERT`, `UPDATE`, `DELETE` and `REPLACE`;
    /// their changes are rolled back unless it is set. Other statements take
    /// effect immediately.
    pub fn execute(&self, sql: &str, params: &[Value], fetch: Fetch, commit: bool) -> Result<Fetched> {
        self.with_statement(sql, commit, |conn| statements::run(conn, sql, params, fetch))
    }

    /// Run a query, returning its rows and column names
    pub fn select(&self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        self.with_statement(sql, false, |conn| statements::select(conn, sql, params))
    }

    /// Run one statement and commit it
    pub fn commit(&self, sql: &str, params: &[Value]) -> Result<()> {
        self.execute(sql, params, Fetch::Nothing, true)?;
        Ok(())
    }

    /// Insert one row and commit, returning its rowid
    pub fn insert(&self, table: &str, values: &[(&str, Value)]) -> Result<i64> {
        self.with_connection(true, |conn| statements::insert(conn, table, values))
    }

    /// Count rows matching every `column = value` pair
    pub fn count(&self, table: &str, filter: &[(&str, Value)]) -> Result<i64> {
        self.with_connection(false, |conn| statements::count(conn, table, filter))
    }

    /// Value of `column` in the first row matching `filter`
    pub fn select_value(
        &self,
        table: &str,
        column: &str,
        filter: &[(&str, Value)],
    ) -> Result<Option<Value>> {
        self.with_connection(false, |conn| statements::select_value(conn, table, column, filter))
    }

    /// Update rows matching `filter`, which must not be empty.
    ///
    /// Counts matches first and only issues the `UPDATE` when at least one row
    /// matched; otherwise nothing happens and no error is returned. The count
    /// and the update use separate connections, so a concurrent writer can
    /// change the matching rows in between.
    pub fn update(&self, table: &str, values: &[(&str, Value)], filter: &[(&str, Value)]) -> Result<()> {
        if filter.is_empty() {
            return Err(Error::InvalidStatement(format!(
                "update of {} requires a filter",
                table
            )));
        }
        if values.is_empty() {
            return Err(Error::InvalidStatement(format!("update of {} has no values", table)));
        }

        if self.count(table, filter)? == 0 {
            tracing::debug!("No rows in {} match the filter, skipping update", table);
            return Ok(());
        }

        self.with_connection(true, |conn| statements::update(conn, table, values, filter))?;
        Ok(())
    }

    /// Create a table from its descriptors if it doesn't exist yet
    pub fn create_table(&self, schema: &TableSchema) -> Result<()> {
        let sql = schema.create_sql()?;
        tracing::info!("Creating table {} if missing", schema.name);
        self.commit(&sql, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnType, Field};
    use tempfile::TempDir;

    fn items_schema() -> TableSchema {
        TableSchema::new(
            "items",
            vec![
                Field::new(0, "id", ColumnType::Integer).primary_key(),
                Field::new(1, "name", ColumnType::Text).not_null().unique(),
                Field::new(2, "qty", ColumnType::Integer).not_null().default_value(0),
            ],
        )
    }

    fn temp_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("test.db"));
        store.create_table(&items_schema()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_create_table_is_idempotent() {
        let (_dir, store) = temp_store();
        store.insert("items", &[("name", Value::from("a"))]).unwrap();
        store.create_table(&items_schema()).unwrap();
        assert_eq!(store.count("items", &[]).unwrap(), 1);
    }

    #[test]
    fn test_insert_and_select() {
        let (_dir, store) = temp_store();
        let id = store
            .insert("items", &[("name", Value::from("bolt")), ("qty", Value::Integer(5))])
            .unwrap();
        store.insert("items", &[("name", Value::from("nut"))]).unwrap();

        let result = store.select("SELECT id, name, qty FROM items ORDER BY id", &[]).unwrap();
        assert_eq!(result.columns, vec!["id", "name", "qty"]);
        assert_eq!(result.rows[0], vec![Value::Integer(id), Value::from("bolt"), Value::Integer(5)]);
        assert_eq!(result.rows[1][2], Value::Integer(0));
    }

    #[test]
    fn test_execute_without_commit_rolls_back() {
        let (_dir, store) = temp_store();
        store
            .execute(
                "INSERT INTO items (name) VALUES (?)",
                &[Value::from("ghost")],
                Fetch::Nothing,
                false,
            )
            .unwrap();
        assert_eq!(store.count("items", &[]).unwrap(), 0);

        store.commit("INSERT INTO items (name) VALUES (?)", &[Value::from("real")]).unwrap();
        assert_eq!(store.count("items", &[]).unwrap(), 1);
    }

    #[test]
    fn test_non_dml_runs_outside_transaction() {
        let (_dir, store) = temp_store();
        store.commit("VACUUM", &[]).unwrap();

        let mode = store
            .execute("PRAGMA journal_mode=WAL", &[], Fetch::One, false)
            .unwrap()
            .into_row();
        assert_eq!(mode, Some(vec![Value::from("wal")]));

        store
            .execute("CREATE TABLE parts (x INTEGER)", &[], Fetch::Nothing, false)
            .unwrap();
        assert_eq!(store.count("parts", &[]).unwrap(), 0);
    }

    #[test]
    fn test_failed_scope_does_not_commit() {
        let (_dir, store) = temp_store();
        let result: Result<()> = store.with_connection(true, |conn| {
            statements::insert(conn, "items", &[("name", Value::from("first"))])?;
            statements::insert(conn, "items", &[("name", Value::from("first"))])?;
            Ok(())
        });
        assert!(matches!(result, Err(Error::StatementFailed(_))));
        assert_eq!(store.count("items", &[]).unwrap(), 0);
    }

    #[test]
    fn test_update_requires_filter() {
        let (_dir, store) = temp_store();
        store.insert("items", &[("name", Value::from("a"))]).unwrap();

        let err = store.update("items", &[("qty", Value::Integer(9))], &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidStatement(_)));
        let err = store.update("items", &[], &[("name", Value::from("a"))]).unwrap_err();
        assert!(matches!(err, Error::InvalidStatement(_)));

        assert_eq!(store.count("items", &[("qty", Value::Integer(0))]).unwrap(), 1);
    }

    #[test]
    fn test_update_skips_when_nothing_matches() {
        let (_dir, store) = temp_store();
        store.insert("items", &[("name", Value::from("a"))]).unwrap();

        store
            .update("items", &[("qty", Value::Integer(9))], &[("name", Value::from("missing"))])
            .unwrap();
        assert_eq!(store.count("items", &[("qty", Value::Integer(9))]).unwrap(), 0);

        store
            .update("items", &[("qty", Value::Integer(9))], &[("name", Value::from("a"))])
            .unwrap();
        assert_eq!(
            store.select_value("items", "qty", &[("name", Value::from("a"))]).unwrap(),
            Some(Value::Integer(9))
        );
    }

    #[test]
    fn test_constraint_violation_is_statement_failed() {
        let (_dir, store) = temp_store();
        store.insert("items", &[("name", Value::from("a"))]).unwrap();
        let err = store.insert("items", &[("name", Value::from("a"))]).unwrap_err();
        assert!(matches!(err, Error::StatementFailed(_)));
    }

    #[test]
    fn test_statement_timeout_interrupts() {
        let dir = TempDir::new().unwrap();
        let options = ConnectionOptions {
            statement_timeout: Some(Duration::from_millis(50)),
            ..Default::default()
        };
        let store = SqliteStore::with_options(dir.path().join("slow.db"), options);
        let err = store
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT COUNT(*) FROM c",
                &[],
                Fetch::One,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::StatementFailed(_)));
    }

    #[test]
    fn test_cancel_token_interrupts() {
        let dir = TempDir::new().unwrap();
        let token = CancelToken::new();
        let options = ConnectionOptions {
            cancel: Some(token.clone()),
            ..Default::default()
        };
        let store = SqliteStore::with_options(dir.path().join("cancel.db"), options);
        store.create_table(&items_schema()).unwrap();

        token.cancel();
        let err = store
            .execute(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c LIMIT 1000000) SELECT COUNT(*) FROM c",
                &[],
                Fetch::One,
                false,
            )
            .unwrap_err();
        assert!(matches!(err, Error::StatementFailed(_)));

        token.reset();
        assert_eq!(store.count("items", &[]).unwrap(), 0);
    }
}
