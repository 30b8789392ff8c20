//! Statement builders
//!
//! Everything here runs against a connection the caller already holds, so the
//! same code serves both the one-connection-per-call executor and the
//! single-transaction document path.

use crate::schema::is_identifier;
use crate::value::Value;
use crate::{Error, Result};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection};

/// One result row, in column order
pub type Row = Vec<Value>;

/// What to fetch from an executed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// First row only
    One,
    /// Every row
    All,
    /// At most `n` rows
    Many(usize),
    /// Result column names, without stepping the statement
    Columns,
    /// Run to completion and discard rows
    Nothing,
}

/// Result of [`run`], tagged by the [`Fetch`] mode that produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Row(Option<Row>),
    Rows(Vec<Row>),
    Columns(Vec<String>),
    Nothing,
}

impl Fetched {
    pub fn into_row(self) -> Option<Row> {
        match self {
            Fetched::Row(row) => row,
            Fetched::Rows(rows) => rows.into_iter().next(),
            _ => None,
        }
    }

    pub fn into_rows(self) -> Vec<Row> {
        match self {
            Fetched::Row(row) => row.into_iter().collect(),
            Fetched::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn into_columns(self) -> Vec<String> {
        match self {
            Fetched::Columns(columns) => columns,
            _ => Vec::new(),
        }
    }
}

/// Rows of a query together with its column headers
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResultSet {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows as JSON objects keyed by column name
    pub fn to_json(&self) -> serde_json::Value {
        let rows = self
            .rows
            .iter()
            .map(|row| {
                let object = self
                    .columns
                    .iter()
                    .zip(row)
                    .map(|(column, value)| (column.clone(), value.to_json()))
                    .collect::<serde_json::Map<_, _>>();
                serde_json::Value::Object(object)
            })
            .collect();
        serde_json::Value::Array(rows)
    }
}

fn check_identifier(kind: &str, name: &str) -> Result<()> {
    if is_identifier(name) {
        Ok(())
    } else {
        Err(Error::InvalidStatement(format!("invalid {} name: {:?}", kind, name)))
    }
}

/// `a=? AND b=?`, in filter order
fn where_clause(filter: &[(&str, Value)]) -> Result<String> {
    let mut parts = Vec::with_capacity(filter.len());
    for (column, _) in filter {
        check_identifier("column", column)?;
        parts.push(format!("{}=?", column));
    }
    Ok(parts.join(" AND "))
}

fn read_row(row: &rusqlite::Row, width: usize) -> rusqlite::Result<Row> {
    (0..width).map(|i| row.get_ref(i).map(Value::from)).collect()
}

/// Whether `sql` starts with `INSERT`, `UPDATE`, `DELETE` or `REPLACE`.
///
/// Only these run inside a transaction; everything else runs in autocommit
/// mode, since SQLite refuses statements like `VACUUM` within one.
pub fn is_dml(sql: &str) -> bool {
    let keyword: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect();
    matches!(
        keyword.to_ascii_uppercase().as_str(),
        "INSERT" | "UPDATE" | "DELETE" | "REPLACE"
    )
}

/// Prepare and run one statement, fetching according to `fetch`.
///
/// Statements that produce no result columns are executed directly and yield
/// an empty result of the requested shape.
pub fn run(conn: &Connection, sql: &str, params: &[Value], fetch: Fetch) -> Result<Fetched> {
    tracing::debug!("Executing: {} ({} params, {:?})", sql.trim(), params.len(), fetch);
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    if width == 0 {
        stmt.execute(params_from_iter(params))?;
        return Ok(match fetch {
            Fetch::One => Fetched::Row(None),
            Fetch::All | Fetch::Many(_) => Fetched::Rows(Vec::new()),
            Fetch::Columns => Fetched::Columns(Vec::new()),
            Fetch::Nothing => Fetched::Nothing,
        });
    }

    if fetch == Fetch::Columns {
        return Ok(Fetched::Columns(columns));
    }

    let limit = match fetch {
        Fetch::One => Some(1),
        Fetch::Many(n) => Some(n),
        _ => None,
    };

    let mut rows = stmt.query(params_from_iter(params))?;
    let mut collected = Vec::new();
    loop {
        if limit.is_some_and(|n| collected.len() >= n) {
            break;
        }
        let Some(row) = rows.next()? else {
            break;
        };
        if fetch != Fetch::Nothing {
            collected.push(read_row(row, width)?);
        }
    }

    Ok(match fetch {
        Fetch::Nothing => Fetched::Nothing,
        Fetch::One => Fetched::Row(collected.into_iter().next()),
        _ => Fetched::Rows(collected),
    })
}

/// Run a query and keep its column headers
pub fn select(conn: &Connection, sql: &str, params: &[Value]) -> Result<ResultSet> {
    tracing::debug!("Selecting: {}", sql.trim());
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    if width > 0 {
        let mut cursor = stmt.query(params_from_iter(params))?;
        while let Some(row) = cursor.next()? {
            rows.push(read_row(row, width)?);
        }
    } else {
        stmt.execute(params_from_iter(params))?;
    }

    Ok(ResultSet { columns, rows })
}

/// Count rows matching every `column = value` pair. An empty filter counts the whole table.
pub fn count(conn: &Connection, table: &str, filter: &[(&str, Value)]) -> Result<i64> {
    check_identifier("table", table)?;
    let mut sql = format!("SELECT COUNT(*) FROM {}", table);
    if !filter.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_clause(filter)?);
    }
    let params: Vec<&Value> = filter.iter().map(|(_, v)| v).collect();
    tracing::debug!("Counting: {}", sql);
    let count = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
    Ok(count)
}

/// Value of `column` in the first row matching `filter`
pub fn select_value(
    conn: &Connection,
    table: &str,
    column: &str,
    filter: &[(&str, Value)],
) -> Result<Option<Value>> {
    select_value_with(conn, table, column, filter, |raw| Ok(Value::from(raw)))
}

/// Like [`select_value`], but hands the raw column to `decode` while the row
/// is still borrowed, so text bytes are seen before any UTF-8 conversion.
pub fn select_value_with<T>(
    conn: &Connection,
    table: &str,
    column: &str,
    filter: &[(&str, Value)],
    decode: impl FnOnce(ValueRef<'_>) -> Result<T>,
) -> Result<Option<T>> {
    check_identifier("table", table)?;
    check_identifier("column", column)?;
    if filter.is_empty() {
        return Err(Error::InvalidStatement(format!(
            "reading {}.{} requires a filter",
            table, column
        )));
    }
    let sql = format!("SELECT {} FROM {} WHERE {}", column, table, where_clause(filter)?);
    tracing::debug!("Selecting value: {}", sql);

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(filter.iter().map(|(_, v)| v)))?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };
    let value = decode(row.get_ref(0)?)?;
    Ok(Some(value))
}

/// `INSERT INTO table (..) VALUES (?, ..)`, returning the new rowid
pub fn insert(conn: &Connection, table: &str, values: &[(&str, Value)]) -> Result<i64> {
    check_identifier("table", table)?;
    if values.is_empty() {
        return Err(Error::InvalidStatement(format!("insert into {} has no values", table)));
    }
    for (column, _) in values {
        check_identifier("column", column)?;
    }

    let columns: Vec<&str> = values.iter().map(|(c, _)| *c).collect();
    let placeholders = vec!["?"; values.len()];
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({});",
        table,
        columns.join(", "),
        placeholders.join(", ")
    );
    tracing::debug!("Inserting: {}", sql);
    conn.execute(&sql, params_from_iter(values.iter().map(|(_, v)| v)))?;
    Ok(conn.last_insert_rowid())
}

/// `UPDATE table SET .. WHERE ..` with SET values bound before WHERE values.
///
/// Both `values` and `filter` must be non-empty. Returns the number of changed rows.
pub fn update(
    conn: &Connection,
    table: &str,
    values: &[(&str, Value)],
    filter: &[(&str, Value)],
) -> Result<usize> {
    check_identifier("table", table)?;
    if filter.is_empty() {
        return Err(Error::InvalidStatement(format!(
            "update of {} requires a filter",
            table
        )));
    }
    if values.is_empty() {
        return Err(Error::InvalidStatement(format!("update of {} has no values", table)));
    }

    let mut assignments = Vec::with_capacity(values.len());
    for (column, _) in values {
        check_identifier("column", column)?;
        assignments.push(format!("{}=?", column));
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {};",
        table,
        assignments.join(", "),
        where_clause(filter)?
    );
    let params = values.iter().chain(filter).map(|(_, v)| v);
    tracing::debug!("Updating: {}", sql);
    Ok(conn.execute(&sql, params_from_iter(params))?)
}
