use crate::OutputFormat;
use anyhow::Context;
use mysqlite::config::{self, MysqliteConfig};
use mysqlite::schema::{self, TableSchema};
use mysqlite::ui::{self, Icons};
use mysqlite::{DocumentRef, DocumentStore, SqliteStore, Value};
use std::path::Path;

/// Parse a JSON object of column -> scalar
fn parse_pairs(raw: &str, what: &str) -> anyhow::Result<Vec<(String, Value)>> {
    let json: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("{} is not valid JSON", what))?;
    let serde_json::Value::Object(map) = json else {
        anyhow::bail!("{} must be a JSON object", what);
    };
    map.iter()
        .map(|(column, value)| -> anyhow::Result<(String, Value)> {
            Ok((column.clone(), Value::from_json(value)?))
        })
        .collect()
}

fn borrowed(pairs: &[(String, Value)]) -> Vec<(&str, Value)> {
    pairs.iter().map(|(k, v)| (k.as_str(), v.clone())).collect()
}

fn configured_schemas(config: Option<&MysqliteConfig>, table: Option<&str>) -> anyhow::Result<Vec<TableSchema>> {
    let Some(config) = config else {
        anyhow::bail!(
            "no config found (run `mysqlite init-config` to create {})",
            config::default_config_path().display()
        );
    };
    let schemas = match table {
        Some(name) => {
            let table = config
                .table(name)
                .with_context(|| format!("table {} is not configured", name))?;
            vec![table.to_schema()?]
        }
        None => config.schemas()?,
    };
    Ok(schemas)
}

pub fn run_init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    config::write_config(path, &MysqliteConfig::sample(), force)?;
    ui::success(&format!("Wrote {}", path.display()));
    Ok(())
}

pub fn run_schema(config: Option<&MysqliteConfig>, table: Option<&str>) -> anyhow::Result<()> {
    for schema in configured_schemas(config, table)? {
        println!("{}", schema.create_sql()?);
    }
    Ok(())
}

pub fn run_init(store: &SqliteStore, config: Option<&MysqliteConfig>) -> anyhow::Result<()> {
    let schemas = configured_schemas(config, None)?;
    ui::header(Icons::DATABASE, &format!("Initializing {}", store.path().display()));
    config::ensure_db_dir(store.path())?;

    for schema in &schemas {
        store.create_table(schema)?;
        ui::status(Icons::TABLE, "Table", &ui::ident(&schema.name));
    }
    ui::success(&format!("{} table(s) ready", schemas.len()));
    Ok(())
}

pub fn run_inspect(store: &SqliteStore, table: &str, format: OutputFormat) -> anyhow::Result<()> {
    let schema = schema::table_schema(store, table)?;
    match format {
        OutputFormat::Json => {
            let fields: Vec<_> = schema
                .fields
                .iter()
                .map(|f| {
                    serde_json::json!({
                        "position": f.position,
                        "name": f.name,
                        "type": f.column_type,
                        "not_null": f.not_null,
                        "unique": f.unique,
                        "primary_key": f.primary_key,
                        "default": f.default.as_ref().map(Value::to_json),
                    })
                })
                .collect();
            let out = serde_json::json!({ "table": schema.name, "fields": fields });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            if schema.fields.is_empty() {
                ui::empty(&format!("No table named {}", table));
                return Ok(());
            }
            ui::header(Icons::TABLE, &schema.name);
            println!("{}", ui::schema_table(&schema));
        }
    }
    Ok(())
}

pub fn run_query(store: &SqliteStore, sql: &str, params: &[String], format: OutputFormat) -> anyhow::Result<()> {
    let params: Vec<Value> = params.iter().map(|p| Value::parse_scalar(p)).collect();
    let result = store.select(sql, &params)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result.to_json())?),
        OutputFormat::Text => {
            if result.is_empty() {
                ui::empty("No rows");
            } else {
                println!("{}", ui::result_table(&result));
                ui::summary_row("rows:", &result.rows.len().to_string());
            }
        }
    }
    Ok(())
}

pub fn run_insert(store: &SqliteStore, table: &str, values: &str) -> anyhow::Result<()> {
    let values = parse_pairs(values, "--values")?;
    let rowid = store.insert(table, &borrowed(&values))?;
    ui::success(&format!("Inserted row {} into {}", rowid, table));
    Ok(())
}

pub fn run_update(store: &SqliteStore, table: &str, set: &str, filter: &str) -> anyhow::Result<()> {
    let values = parse_pairs(set, "--set")?;
    let filter = parse_pairs(filter, "--filter")?;
    let filter = borrowed(&filter);

    let matched = store.count(table, &filter)?;
    store.update(table, &borrowed(&values), &filter)?;
    if matched == 0 {
        ui::empty(&format!("No rows in {} matched", table));
    } else {
        ui::success(&format!("Updated {} row(s) in {}", matched, table));
    }
    Ok(())
}

pub fn run_doc_get(store: &SqliteStore, doc: &DocumentRef<'_>) -> anyhow::Result<()> {
    match store.read_document(doc)? {
        Some(document) => {
            println!("{}", serde_json::to_string_pretty(&serde_json::Value::Object(document))?);
        }
        None => ui::empty(&format!("No document at {} = {}", doc.key_column, doc.key)),
    }
    Ok(())
}

pub fn run_doc_set(store: &SqliteStore, doc: &DocumentRef<'_>, patch: &str, atomic: bool) -> anyhow::Result<()> {
    let patch: serde_json::Value = serde_json::from_str(patch).context("--patch is not valid JSON")?;
    let serde_json::Value::Object(patch) = patch else {
        anyhow::bail!("--patch must be a JSON object");
    };

    let written = if atomic {
        store.atomic().write_document(doc, &patch)?
    } else {
        store.write_document(doc, &patch)?
    };

    if written {
        ui::success(&format!("{} {} {} = {}", Icons::PENCIL, doc.table, doc.key_column, doc.key));
    } else {
        ui::warn(&format!(
            "{} = {} does not identify exactly one row of {}, nothing written",
            doc.key_column, doc.key, doc.table
        ));
    }
    Ok(())
}
