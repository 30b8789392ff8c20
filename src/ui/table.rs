use crate::schema::{Field, TableSchema};
use crate::storage::ResultSet;
use crate::ui::output::cell;
use tabled::{builder::Builder, settings::Style, Table, Tabled};

#[derive(Tabled)]
pub struct FieldRow {
    #[tabled(rename = "#")]
    pub position: usize,
    #[tabled(rename = "Column")]
    pub name: String,
    #[tabled(rename = "Type")]
    pub column_type: String,
    #[tabled(rename = "Not null")]
    pub not_null: bool,
    #[tabled(rename = "Unique")]
    pub unique: bool,
    #[tabled(rename = "Primary key")]
    pub primary_key: bool,
    #[tabled(rename = "Default")]
    pub default: String,
}

impl From<&Field> for FieldRow {
    fn from(field: &Field) -> Self {
        Self {
            position: field.position,
            name: field.name.clone(),
            column_type: field.column_type.to_string(),
            not_null: field.not_null,
            unique: field.unique,
            primary_key: field.primary_key,
            default: field
                .default
                .as_ref()
                .map(|v| v.to_sql_literal())
                .unwrap_or_default(),
        }
    }
}

/// One row per column of `schema`
pub fn schema_table(schema: &TableSchema) -> String {
    if schema.fields.is_empty() {
        return String::new();
    }
    let rows: Vec<FieldRow> = schema.fields.iter().map(FieldRow::from).collect();
    Table::new(&rows).with(Style::rounded()).to_string()
}

/// Query results under their column headers
pub fn result_table(result: &ResultSet) -> String {
    if result.columns.is_empty() {
        return String::new();
    }

    let mut builder = Builder::default();
    builder.push_record(result.columns.iter().cloned());
    for row in &result.rows {
        builder.push_record(row.iter().map(cell));
    }
    builder.build().with(Style::rounded()).to_string()
}
