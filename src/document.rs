//! JSON documents stored in a single column
//!
//! A document lives in one text column of the single row where
//! `key_column = key`. Reads return `None` unless exactly one row matches and
//! its column holds a non-empty value. Writes shallow-merge a patch into the
//! stored document.
//!
//! Two implementations of [`DocumentStore`] exist:
//! - [`SqliteStore`] runs count, read and update as separate calls, each on
//!   its own connection. Concurrent writers to the same row can lose each
//!   other's patches.
//! - [`AtomicDocuments`] runs the whole read-merge-write inside one
//!   `BEGIN IMMEDIATE` transaction, so concurrent writers serialize.

use crate::storage::statements;
use crate::storage::SqliteStore;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, TransactionBehavior};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A parsed document: top-level JSON object
pub type Document = serde_json::Map<String, serde_json::Value>;

/// How many rows a document key resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMatch {
    Missing,
    Single,
    Ambiguous(i64),
}

impl RowMatch {
    pub fn from_count(count: i64) -> Self {
        match count {
            1 => RowMatch::Single,
            n if n <= 0 => RowMatch::Missing,
            n => RowMatch::Ambiguous(n),
        }
    }

    pub fn is_single(&self) -> bool {
        matches!(self, RowMatch::Single)
    }
}

/// Location of one document: `table.column` in the row where `key_column = key`
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentRef<'a> {
    pub table: &'a str,
    pub column: &'a str,
    pub key_column: &'a str,
    pub key: Value,
}

impl<'a> DocumentRef<'a> {
    pub fn new(table: &'a str, column: &'a str, key_column: &'a str, key: impl Into<Value>) -> Self {
        Self {
            table,
            column,
            key_column,
            key: key.into(),
        }
    }

    fn filter(&self) -> [(&'a str, Value); 1] {
        [(self.key_column, self.key.clone())]
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::CorruptDocument {
            table: self.table.to_string(),
            column: self.column.to_string(),
            reason: reason.into(),
        }
    }
}

/// Read and patch documents stored in a column
pub trait DocumentStore {
    /// The document for `doc`, or `None` when the key doesn't resolve to exactly
    /// one row or the column is NULL/empty.
    fn read_document(&self, doc: &DocumentRef<'_>) -> Result<Option<Document>>;

    /// Shallow-merge `patch` into the document for `doc`.
    ///
    /// Returns `false` without writing when the key doesn't resolve to exactly one row.
    fn write_document(&self, doc: &DocumentRef<'_>, patch: &Document) -> Result<bool>;

    /// Read the document and deserialize it into `T`
    fn read_as<T: DeserializeOwned>(&self, doc: &DocumentRef<'_>) -> Result<Option<T>>
    where
        Self: Sized,
    {
        match self.read_document(doc)? {
            Some(document) => serde_json::from_value(serde_json::Value::Object(document))
                .map(Some)
                .map_err(|e| doc.corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    /// Serialize `patch` (which must become a JSON object) and merge it in
    fn write_from<T: Serialize>(&self, doc: &DocumentRef<'_>, patch: &T) -> Result<bool>
    where
        Self: Sized,
    {
        match serde_json::to_value(patch) {
            Ok(serde_json::Value::Object(patch)) => self.write_document(doc, &patch),
            Ok(other) => Err(Error::InvalidStatement(format!(
                "document patch must be a JSON object, got {}",
                other
            ))),
            Err(e) => Err(Error::InvalidStatement(format!("document patch: {}", e))),
        }
    }
}

/// Parse a stored column value. NULL and empty text mean "no document".
///
/// Text and blob bytes must be valid UTF-8; nothing is decoded lossily.
pub fn parse_document(doc: &DocumentRef<'_>, stored: ValueRef<'_>) -> Result<Option<Document>> {
    let bytes = match stored {
        ValueRef::Null => return Ok(None),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes,
        ValueRef::Integer(_) => return Err(doc.corrupt("expected text, found integer")),
        ValueRef::Real(_) => return Err(doc.corrupt("expected text, found real")),
    };
    let text = std::str::from_utf8(bytes).map_err(|e| doc.corrupt(e.to_string()))?;
    if text.is_empty() {
        return Ok(None);
    }

    match serde_json::from_str(text) {
        Ok(serde_json::Value::Object(document)) => Ok(Some(document)),
        Ok(other) => Err(doc.corrupt(format!("expected a JSON object, found {}", other))),
        Err(e) => Err(doc.corrupt(e.to_string())),
    }
}

/// The document stored in the first row matching `doc`, without counting rows
fn select_document(conn: &Connection, doc: &DocumentRef<'_>) -> Result<Option<Document>> {
    let document = statements::select_value_with(conn, doc.table, doc.column, &doc.filter(), |raw| {
        parse_document(doc, raw)
    })?;
    Ok(document.flatten())
}

/// Overwrite or insert each top-level key of `patch`. Nested objects are replaced, not merged.
pub fn merge(current: Option<Document>, patch: &Document) -> Document {
    let mut merged = current.unwrap_or_default();
    for (key, value) in patch {
        merged.insert(key.clone(), value.clone());
    }
    merged
}

fn serialize(document: Document) -> Value {
    Value::Text(serde_json::Value::Object(document).to_string())
}

fn log_unresolved(doc: &DocumentRef<'_>, matched: RowMatch) {
    match matched {
        RowMatch::Ambiguous(n) => tracing::warn!(
            "{} rows in {} match {} = {}, ignoring document",
            n,
            doc.table,
            doc.key_column,
            doc.key
        ),
        _ => tracing::debug!("No row in {} matches {} = {}", doc.table, doc.key_column, doc.key),
    }
}

impl DocumentStore for SqliteStore {
    fn read_document(&self, doc: &DocumentRef<'_>) -> Result<Option<Document>> {
        let matched = RowMatch::from_count(self.count(doc.table, &doc.filter())?);
        if !matched.is_single() {
            log_unresolved(doc, matched);
            return Ok(None);
        }

        self.with_connection(false, |conn| select_document(conn, doc))
    }

    fn write_document(&self, doc: &DocumentRef<'_>, patch: &Document) -> Result<bool> {
        let matched = RowMatch::from_count(self.count(doc.table, &doc.filter())?);
        if !matched.is_single() {
            log_unresolved(doc, matched);
            return Ok(false);
        }

        let current = self.read_document(doc)?;
        let merged = merge(current, patch);
        self.update(doc.table, &[(doc.column, serialize(merged))], &doc.filter())?;
        Ok(true)
    }
}

/// Document accessor that holds one `IMMEDIATE` transaction per operation.
///
/// Obtained from [`SqliteStore::atomic`].
#[derive(Debug, Clone, Copy)]
pub struct AtomicDocuments<'a> {
    store: &'a SqliteStore,
}

impl<'a> AtomicDocuments<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }
}

fn load(conn: &Connection, doc: &DocumentRef<'_>) -> Result<Option<Document>> {
    let matched = RowMatch::from_count(statements::count(conn, doc.table, &doc.filter())?);
    if !matched.is_single() {
        log_unresolved(doc, matched);
        return Ok(None);
    }
    select_document(conn, doc)
}

impl DocumentStore for AtomicDocuments<'_> {
    fn read_document(&self, doc: &DocumentRef<'_>) -> Result<Option<Document>> {
        self.store.with_connection(false, |conn| load(conn, doc))
    }

    fn write_document(&self, doc: &DocumentRef<'_>, patch: &Document) -> Result<bool> {
        self.store
            .with_transaction(TransactionBehavior::Immediate, true, |conn| {
                let matched = RowMatch::from_count(statements::count(conn, doc.table, &doc.filter())?);
                if !matched.is_single() {
                    log_unresolved(doc, matched);
                    return Ok(false);
                }

                let current = load(conn, doc)?;
                let merged = merge(current, patch);
                statements::update(conn, doc.table, &[(doc.column, serialize(merged))], &doc.filter())?;
                Ok(true)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;
    use tempfile::TempDir;

    fn object(value: serde_json::Value) -> Document {
        match value {
            serde_json::Value::Object(map) => map,
            other => panic!("not an object: {}", other),
        }
    }

    fn prefs_store() -> (TempDir, SqliteStore) {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("docs.db"));
        store.commit("CREATE TABLE prefs (key TEXT, data TEXT)", &[]).unwrap();
        let rows: [(&str, Value); 7] = [
            ("k1", Value::from(r#"{"a":1}"#)),
            ("empty", Value::from("")),
            ("null", Value::Null),
            ("dup", Value::from(r#"{"d":1}"#)),
            ("dup", Value::from(r#"{"d":2}"#)),
            ("bad", Value::from("not json")),
            ("list", Value::from("[1,2]")),
        ];
        for (key, data) in rows {
            store.insert("prefs", &[("key", Value::from(key)), ("data", data)]).unwrap();
        }
        (dir, store)
    }

    fn doc(key: &str) -> DocumentRef<'_> {
        DocumentRef::new("prefs", "data", "key", key)
    }

    /// Contract shared by both implementations.
    fn check_contract<S: DocumentStore>(docs: &S, raw: &SqliteStore) {
        // Reads
        assert_eq!(docs.read_document(&doc("missing")).unwrap(), None);
        assert_eq!(docs.read_document(&doc("k1")).unwrap(), Some(object(json!({"a": 1}))));
        assert_eq!(docs.read_document(&doc("empty")).unwrap(), None);
        assert_eq!(docs.read_document(&doc("null")).unwrap(), None);
        assert_eq!(docs.read_document(&doc("dup")).unwrap(), None);
        assert!(matches!(docs.read_document(&doc("bad")), Err(Error::CorruptDocument { .. })));
        assert!(matches!(docs.read_document(&doc("list")), Err(Error::CorruptDocument { .. })));

        // Shallow merge
        assert!(docs.write_document(&doc("k1"), &object(json!({"b": 2}))).unwrap());
        assert!(docs.write_document(&doc("k1"), &object(json!({"b": 3, "c": 4}))).unwrap());
        assert_eq!(
            docs.read_document(&doc("k1")).unwrap(),
            Some(object(json!({"a": 1, "b": 3, "c": 4})))
        );

        // Nested values are replaced
        assert!(docs.write_document(&doc("k1"), &object(json!({"n": {"x": 1}}))).unwrap());
        assert!(docs.write_document(&doc("k1"), &object(json!({"n": {"y": 2}}))).unwrap());
        let k1 = docs.read_document(&doc("k1")).unwrap().unwrap();
        assert_eq!(k1["n"], json!({"y": 2}));

        // No document yet: the patch becomes the document
        assert!(docs.write_document(&doc("null"), &object(json!({"z": true}))).unwrap());
        assert_eq!(docs.read_document(&doc("null")).unwrap(), Some(object(json!({"z": true}))));
        assert!(docs.write_document(&doc("empty"), &object(json!({"e": 0}))).unwrap());
        assert_eq!(docs.read_document(&doc("empty")).unwrap(), Some(object(json!({"e": 0}))));

        // Missing and ambiguous keys are never written
        assert!(!docs.write_document(&doc("missing"), &object(json!({"x": 1}))).unwrap());
        assert_eq!(raw.count("prefs", &[("key", Value::from("missing"))]).unwrap(), 0);
        assert!(!docs.write_document(&doc("dup"), &object(json!({"x": 1}))).unwrap());
        assert_eq!(raw.count("prefs", &[("data", Value::from(r#"{"d":1}"#))]).unwrap(), 1);

        // Corrupt documents are not overwritten
        assert!(matches!(
            docs.write_document(&doc("bad"), &object(json!({"x": 1}))),
            Err(Error::CorruptDocument { .. })
        ));
        assert_eq!(
            raw.select_value("prefs", "data", &[("key", Value::from("bad"))]).unwrap(),
            Some(Value::from("not json"))
        );
    }

    #[test]
    fn test_legacy_contract() {
        let (_dir, store) = prefs_store();
        check_contract(&store, &store);
    }

    #[test]
    fn test_atomic_contract() {
        let (_dir, store) = prefs_store();
        check_contract(&store.atomic(), &store);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        volume: i64,
    }

    #[test]
    fn test_typed_documents() {
        let (_dir, store) = prefs_store();
        let settings = Settings {
            theme: "dark".to_string(),
            volume: 7,
        };
        assert!(store.write_from(&doc("null"), &settings).unwrap());
        assert_eq!(store.read_as::<Settings>(&doc("null")).unwrap(), Some(settings));

        // k1 holds {"a":1}, which lacks the Settings fields
        assert!(matches!(
            store.read_as::<Settings>(&doc("k1")),
            Err(Error::CorruptDocument { .. })
        ));
        assert!(matches!(
            store.write_from(&doc("k1"), &vec![1, 2]),
            Err(Error::InvalidStatement(_))
        ));
    }

    #[test]
    fn test_integer_keys_and_blob_documents() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::new(dir.path().join("blob.db"));
        store.commit("CREATE TABLE users (id INTEGER PRIMARY KEY, profile BLOB)", &[]).unwrap();
        store
            .insert("users", &[("id", Value::Integer(7)), ("profile", Value::Blob(br#"{"n":1}"#.to_vec()))])
            .unwrap();

        let profile = DocumentRef::new("users", "profile", "id", 7);
        assert_eq!(store.read_document(&profile).unwrap(), Some(object(json!({"n": 1}))));
        assert!(store.write_document(&profile, &object(json!({"m": 2}))).unwrap());
        assert_eq!(store.read_document(&profile).unwrap(), Some(object(json!({"n": 1, "m": 2}))));
    }

    #[test]
    fn test_invalid_utf8_text_is_corrupt() {
        let (_dir, store) = prefs_store();
        store
            .commit("INSERT INTO prefs (key, data) VALUES ('raw', CAST(X'7B2261223A22FF227D' AS TEXT))", &[])
            .unwrap();

        let raw = doc("raw");
        let patch = object(json!({"b": 2}));
        assert!(matches!(store.read_document(&raw), Err(Error::CorruptDocument { .. })));
        assert!(matches!(store.write_document(&raw, &patch), Err(Error::CorruptDocument { .. })));
        let atomic = store.atomic();
        assert!(matches!(atomic.read_document(&raw), Err(Error::CorruptDocument { .. })));
        assert!(matches!(atomic.write_document(&raw, &patch), Err(Error::CorruptDocument { .. })));

        let stored = store.select("SELECT hex(data) FROM prefs WHERE key = 'raw'", &[]).unwrap();
        assert_eq!(stored.rows, vec![vec![Value::from("7B2261223A22FF227D")]]);
    }

    const WRITES: usize = 25;

    /// Two threads patch the same row with disjoint keys.
    fn hammer<S: DocumentStore + Sync>(docs: &S) {
        let target = doc("k1");
        std::thread::scope(|s| {
            for prefix in ["left", "right"] {
                let target = &target;
                s.spawn(move || {
                    for i in 0..WRITES {
                        let patch = object(json!({ format!("{}{}", prefix, i): i }));
                        assert!(docs.write_document(target, &patch).unwrap());
                    }
                });
            }
        });
    }

    #[test]
    fn test_atomic_writes_keep_every_patch() {
        let (_dir, store) = prefs_store();
        hammer(&store.atomic());

        let document = store.read_document(&doc("k1")).unwrap().unwrap();
        assert_eq!(document.len(), 1 + 2 * WRITES);
        for i in 0..WRITES {
            assert_eq!(document[&format!("left{}", i)], json!(i));
            assert_eq!(document[&format!("right{}", i)], json!(i));
        }
    }

    #[test]
    fn test_legacy_writes_may_lose_patches() {
        let (_dir, store) = prefs_store();
        hammer(&store);

        // Interleaved read-merge-write cycles can drop keys, but whatever
        // survives is a well-formed document holding values that were written.
        let document = store.read_document(&doc("k1")).unwrap().unwrap();
        assert!(document.len() <= 1 + 2 * WRITES);
        assert!(document.len() >= 2);
        for (key, value) in &document {
            if key == "a" {
                continue;
            }
            let index = key.trim_start_matches("left").trim_start_matches("right");
            assert_eq!(value, &json!(index.parse::<usize>().unwrap()));
        }
    }

    #[test]
    fn test_row_match() {
        assert_eq!(RowMatch::from_count(0), RowMatch::Missing);
        assert_eq!(RowMatch::from_count(1), RowMatch::Single);
        assert_eq!(RowMatch::from_count(3), RowMatch::Ambiguous(3));
    }
}
