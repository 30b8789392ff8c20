//! `CREATE TABLE` generation from field descriptors

use super::{is_identifier, Field};
use crate::{Error, Result};
use std::collections::HashSet;

/// Compile a table name and its ordered fields into a
/// `CREATE TABLE IF NOT EXISTS` statement.
///
/// Columns keep input order. Each column renders as
/// `name TYPE [NOT NULL] [UNIQUE] [PRIMARY KEY] [DEFAULT literal]`.
///
/// The statement never alters an existing table, even one whose columns
/// differ from `fields`. More than one `primary_key` field is not rejected
/// here; SQLite refuses the statement when it runs.
pub fn compile_create_table(table: &str, fields: &[Field]) -> Result<String> {
    if table.is_empty() {
        return Err(Error::InvalidSchema("table name is empty".to_string()));
    }
    if !is_identifier(table) {
        return Err(Error::InvalidSchema(format!("invalid table name: {:?}", table)));
    }
    if fields.is_empty() {
        return Err(Error::InvalidSchema(format!("table {} has no fields", table)));
    }

    let mut seen = HashSet::new();
    for field in fields {
        if !is_identifier(&field.name) {
            return Err(Error::InvalidSchema(format!(
                "invalid column name in {}: {:?}",
                table, field.name
            )));
        }
        if !seen.insert(field.name.as_str()) {
            return Err(Error::InvalidSchema(format!(
                "duplicate column {} in {}",
                field.name, table
            )));
        }
    }

    let columns: Vec<String> = fields.iter().map(Field::column_sql).collect();
    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);",
        table,
        columns.join(",\n    ")
    ))
}
