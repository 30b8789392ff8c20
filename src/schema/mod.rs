//! Table schema descriptors
//!
//! A table is described by an ordered list of [`Field`]s. The list compiles
//! to a `CREATE TABLE IF NOT EXISTS` statement (see [`ddl`]) and can be
//! rebuilt from an existing database through PRAGMA reflection (see [`reflect`]).

pub mod ddl;
pub mod reflect;

use crate::value::Value;
use crate::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

pub use ddl::compile_create_table;
pub use reflect::{table_fields, table_schema};

static IDENTIFIER: OnceLock<Regex> = OnceLock::new();

/// SQLite keywords that are never accepted as bare names, sorted
const RESERVED: &[&str] = &[
    "ADD", "ALL", "ALTER", "AND", "AS", "AUTOINCREMENT", "BETWEEN", "CASE", "CHECK", "COLLATE",
    "COMMIT", "CONSTRAINT", "CREATE", "CURRENT_DATE", "CURRENT_TIME", "CURRENT_TIMESTAMP",
    "DEFAULT", "DEFERRABLE", "DELETE", "DISTINCT", "DROP", "ELSE", "ESCAPE", "EXCEPT", "EXISTS",
    "FOREIGN", "FROM", "GROUP", "HAVING", "IN", "INDEX", "INSERT", "INTERSECT", "INTO", "IS",
    "ISNULL", "JOIN", "LIMIT", "NOT", "NOTHING", "NOTNULL", "NULL", "ON", "OR", "ORDER",
    "PRIMARY", "REFERENCES", "RETURNING", "SELECT", "SET", "TABLE", "THEN", "TO", "TRANSACTION",
    "UNION", "UNIQUE", "UPDATE", "USING", "VALUES", "WHEN", "WHERE",
];

/// Whether `name` can be interpolated into SQL unquoted.
///
/// Names must match `[A-Za-z_][A-Za-z0-9_]*` and must not be a reserved
/// keyword. Keywords SQLite lets through as names (`key`, `replace`) are accepted.
pub fn is_identifier(name: &str) -> bool {
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"))
        .is_match(name)
        && RESERVED.binary_search(&name.to_ascii_uppercase().as_str()).is_err()
}

/// Declared type of a column.
///
/// The five storage classes render as their canonical names; anything else
/// (`VARCHAR(255)`, `DECIMAL(10,5)`, `DATETIME`) is passed through verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ColumnType {
    Integer,
    Text,
    Real,
    Numeric,
    Blob,
    Other(String),
}

impl ColumnType {
    pub fn as_str(&self) -> &str {
        match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Text => "TEXT",
            ColumnType::Real => "REAL",
            ColumnType::Numeric => "NUMERIC",
            ColumnType::Blob => "BLOB",
            ColumnType::Other(raw) => raw,
        }
    }
}

impl FromStr for ColumnType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_uppercase().as_str() {
            "INTEGER" => ColumnType::Integer,
            "TEXT" => ColumnType::Text,
            "REAL" => ColumnType::Real,
            "NUMERIC" => ColumnType::Numeric,
            "BLOB" => ColumnType::Blob,
            _ => ColumnType::Other(s.to_string()),
        })
    }
}

impl From<String> for ColumnType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(t) => t,
            Err(never) => match never {},
        }
    }
}

impl From<ColumnType> for String {
    fn from(t: ColumnType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One column of a table.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Ordinal column index (informational)
    pub position: usize,
    pub name: String,
    pub column_type: ColumnType,
    pub not_null: bool,
    /// Literal for the `DEFAULT` clause; `None` means no clause at all
    pub default: Option<Value>,
    pub primary_key: bool,
    pub unique: bool,
}

impl Field {
    /// Create a nullable, unconstrained field with no default
    pub fn new(position: usize, name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            position,
            name: name.into(),
            column_type,
            not_null: false,
            default: None,
            primary_key: false,
            unique: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    /// Render this field as a column clause of a `CREATE TABLE` statement
    pub fn column_sql(&self) -> String {
        let mut parts = vec![self.name.clone()];
        // Reflected columns declared without a type have an empty type name.
        if !self.column_type.as_str().is_empty() {
            parts.push(self.column_type.to_string());
        }
        if self.not_null {
            parts.push("NOT NULL".to_string());
        }
        if self.unique {
            parts.push("UNIQUE".to_string());
        }
        if self.primary_key {
            parts.push("PRIMARY KEY".to_string());
        }
        if let Some(default) = &self.default {
            parts.push(format!("DEFAULT {}", default.to_sql_literal()));
        }
        parts.join(" ")
    }
}

/// An ordered table definition.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<Field>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, fields: Vec<Field>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    /// Look up a field by column name
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn create_sql(&self) -> Result<String> {
        compile_create_table(&self.name, &self.fields)
    }
}
