//! Rebuild field descriptors from an existing table
//!
//! Column metadata comes from `pragma_table_info`. A column counts as unique
//! when a unique index covers that column alone; indexes SQLite creates for a
//! primary key are not counted.

use super::{ColumnType, Field, TableSchema};
use crate::storage::statements::{self, Fetch};
use crate::storage::SqliteStore;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::Connection;
use std::collections::{HashMap, HashSet};

const TABLE_INFO_SQL: &str =
    r#"SELECT cid, name, type, "notnull", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid"#;
const INDEX_LIST_SQL: &str = r#"SELECT name, "unique", origin FROM pragma_index_list(?1)"#;
const INDEX_INFO_SQL: &str = "SELECT name FROM pragma_index_info(?1)";

/// Fields of `table` keyed by column name. A missing table yields an empty map.
pub fn table_fields(store: &SqliteStore, table: &str) -> Result<HashMap<String, Field>> {
    let schema = table_schema(store, table)?;
    Ok(schema
        .fields
        .into_iter()
        .map(|field| (field.name.clone(), field))
        .collect())
}

/// Fields of `table` in column order
pub fn table_schema(store: &SqliteStore, table: &str) -> Result<TableSchema> {
    store.with_connection(false, |conn| read_schema(conn, table))
}

fn read_schema(conn: &Connection, table: &str) -> Result<TableSchema> {
    let uniques = unique_columns(conn, table)?;
    let rows = statements::run(conn, TABLE_INFO_SQL, &[Value::from(table)], Fetch::All)?.into_rows();

    let mut fields = Vec::with_capacity(rows.len());
    for row in rows {
        let mut field = field_from_pragma(table, &row)?;
        field.unique = uniques.contains(&field.name);
        fields.push(field);
    }
    tracing::debug!("Reflected {} columns from {}", fields.len(), table);
    Ok(TableSchema::new(table, fields))
}

fn unique_columns(conn: &Connection, table: &str) -> Result<HashSet<String>> {
    let mut uniques = HashSet::new();
    let indexes = statements::run(conn, INDEX_LIST_SQL, &[Value::from(table)], Fetch::All)?.into_rows();

    for index in indexes {
        let [name, unique, origin] = index.as_slice() else {
            continue;
        };
        if unique.as_i64() != Some(1) || origin.as_str() == Some("pk") {
            continue;
        }
        let Some(name) = name.as_str() else {
            continue;
        };

        let columns = statements::run(conn, INDEX_INFO_SQL, &[Value::from(name)], Fetch::All)?.into_rows();
        if let [column] = columns.as_slice() {
            if let Some(column) = column.first().and_then(Value::as_str) {
                uniques.insert(column.to_string());
            }
        }
    }

    Ok(uniques)
}

fn field_from_pragma(table: &str, row: &[Value]) -> Result<Field> {
    let malformed = || Error::InvalidSchema(format!("unexpected table_info row for {}: {:?}", table, row));

    let [cid, name, column_type, not_null, default, pk] = row else {
        return Err(malformed());
    };
    let position = cid.as_i64().and_then(|c| usize::try_from(c).ok()).ok_or_else(malformed)?;
    let name = name.as_str().ok_or_else(malformed)?;
    let column_type: ColumnType = column_type.as_str().unwrap_or_default().to_string().into();

    Ok(Field {
        position,
        name: name.to_string(),
        column_type,
        not_null: not_null.as_i64().unwrap_or(0) != 0,
        default: default.as_str().map(parse_default),
        primary_key: pk.as_i64().unwrap_or(0) > 0,
        unique: false,
    })
}

/// Parse a stored default expression back into a literal.
///
/// Anything that is not a plain literal (`CURRENT_TIMESTAMP`, `(1 + 1)`) is
/// kept as text of the raw expression.
pub fn parse_default(expr: &str) -> Value {
    let expr = expr.trim();
    if expr.eq_ignore_ascii_case("NULL") {
        return Value::Null;
    }
    if let Some(text) = string_literal(expr) {
        return Value::Text(text);
    }
    if expr.len() >= 3 && (expr.starts_with("X'") || expr.starts_with("x'")) && expr.ends_with('\'') {
        if let Some(bytes) = decode_hex(&expr[2..expr.len() - 1]) {
            return Value::Blob(bytes);
        }
    }
    if let Ok(i) = expr.parse::<i64>() {
        return Value::Integer(i);
    }
    if let Ok(r) = expr.parse::<f64>() {
        return Value::Real(r);
    }
    Value::Text(expr.to_string())
}

/// Body of a single `'...'` literal whose inner quotes are all doubled
fn string_literal(expr: &str) -> Option<String> {
    let inner = expr.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.replace("''", "").contains('\'') {
        return None;
    }
    Some(inner.replace("''", "'"))
}

fn decode_hex(hex: &str) -> Option<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect()
}
