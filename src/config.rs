use crate::schema::{Field, TableSchema};
use crate::storage::ConnectionOptions;
use crate::value::Value;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MysqliteConfig {
    pub database: Option<String>,
    pub busy_timeout_ms: Option<u64>,
    pub statement_timeout_ms: Option<u64>,
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub not_null: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<toml::Value>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl FieldConfig {
    fn to_field(&self, table: &str, position: usize) -> Result<Field> {
        let default = match &self.default {
            None => None,
            Some(toml::Value::Integer(i)) => Some(Value::Integer(*i)),
            Some(toml::Value::Float(f)) => Some(Value::Real(*f)),
            Some(toml::Value::String(s)) => Some(Value::Text(s.clone())),
            Some(toml::Value::Boolean(b)) => Some(Value::from(*b)),
            Some(other) => {
                return Err(Error::InvalidSchema(format!(
                    "default for {}.{} must be an integer, float, string or boolean, got {}",
                    table,
                    self.name,
                    other.type_str()
                )));
            }
        };

        Ok(Field {
            position,
            name: self.name.clone(),
            column_type: self.column_type.clone().into(),
            not_null: self.not_null,
            default,
            primary_key: self.primary_key,
            unique: self.unique,
        })
    }
}

impl TableConfig {
    /// Build the table descriptor; positions follow the order fields appear in the file
    pub fn to_schema(&self) -> Result<TableSchema> {
        let fields = self
            .fields
            .iter()
            .enumerate()
            .map(|(position, field)| field.to_field(&self.name, position))
            .collect::<Result<Vec<_>>>()?;
        Ok(TableSchema::new(self.name.clone(), fields))
    }
}

impl MysqliteConfig {
    pub fn schemas(&self) -> Result<Vec<TableSchema>> {
        self.tables.iter().map(TableConfig::to_schema).collect()
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn to_options(&self) -> ConnectionOptions {
        let defaults = ConnectionOptions::default();
        ConnectionOptions {
            busy_timeout: self
                .busy_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.busy_timeout),
            statement_timeout: self.statement_timeout_ms.map(Duration::from_millis),
            cancel: None,
        }
    }

    /// A small config showing every supported key
    pub fn sample() -> Self {
        let field = |name: &str, column_type: &str| FieldConfig {
            name: name.to_string(),
            column_type: column_type.to_string(),
            not_null: false,
            unique: false,
            primary_key: false,
            default: None,
        };

        Self {
            database: Some(default_database_path().display().to_string()),
            busy_timeout_ms: Some(5000),
            statement_timeout_ms: None,
            tables: vec![TableConfig {
                name: "users".to_string(),
                fields: vec![
                    FieldConfig {
                        primary_key: true,
                        ..field("id", "INTEGER")
                    },
                    FieldConfig {
                        not_null: true,
                        unique: true,
                        ..field("email", "TEXT")
                    },
                    FieldConfig {
                        default: Some(toml::Value::String("{}".to_string())),
                        ..field("settings", "TEXT")
                    },
                ],
            }],
        }
    }
}

pub fn default_config_path() -> PathBuf {
    PathBuf::from("mysqlite.toml")
}

pub fn default_database_path() -> PathBuf {
    PathBuf::from("mysqlite.db")
}

/// `--database` wins, then the config's `database`, then `mysqlite.db`
pub fn resolve_database_path(cli: Option<&Path>, config: Option<&MysqliteConfig>) -> PathBuf {
    cli.map(Path::to_path_buf)
        .or_else(|| config.and_then(|c| c.database.as_ref()).map(PathBuf::from))
        .unwrap_or_else(default_database_path)
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<Option<MysqliteConfig>> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    if !path.exists() {
        return Ok(None);
    }

    let contents = std::fs::read_to_string(&path)?;
    let config: MysqliteConfig = toml::from_str(&contents)?;
    tracing::debug!("Loaded {} table(s) from {}", config.tables.len(), path.display());
    Ok(Some(config))
}

pub fn write_config(path: &Path, config: &MysqliteConfig, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("config already exists at {} (use --force to overwrite)", path.display());
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(path, contents)?;
    Ok(())
}

pub fn ensure_db_dir(db_path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnType;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
database = "app.db"
statement_timeout_ms = 2000

[[tables]]
name = "users"

[[tables.fields]]
name = "id"
type = "INTEGER"
primary_key = true

[[tables.fields]]
name = "active"
type = "integer"
not_null = true
default = true

[[tables.fields]]
name = "balance"
type = "DECIMAL(10,5)"
default = 0.5

[[tables.fields]]
name = "settings"
type = "TEXT"
default = "{}"
"#;

    #[test]
    fn test_parse_tables_in_order() {
        let config: MysqliteConfig = toml::from_str(CONFIG).unwrap();
        let schemas = config.schemas().unwrap();
        assert_eq!(schemas.len(), 1);

        let users = &schemas[0];
        let names: Vec<_> = users.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "active", "balance", "settings"]);
        assert_eq!(users.fields[2].position, 2);
        assert_eq!(users.fields[1].column_type, ColumnType::Integer);
        assert_eq!(users.fields[1].default, Some(Value::Integer(1)));
        assert_eq!(users.fields[2].column_type, ColumnType::Other("DECIMAL(10,5)".to_string()));
        assert_eq!(users.fields[3].default, Some(Value::from("{}")));
        assert!(users.fields[0].primary_key);
        assert!(users.create_sql().unwrap().contains("settings TEXT DEFAULT '{}'"));
    }

    #[test]
    fn test_options() {
        let config: MysqliteConfig = toml::from_str(CONFIG).unwrap();
        let options = config.to_options();
        assert_eq!(options.busy_timeout, Duration::from_secs(5));
        assert_eq!(options.statement_timeout, Some(Duration::from_millis(2000)));
    }

    #[test]
    fn test_rejects_non_scalar_default() {
        let config: MysqliteConfig = toml::from_str(
            r#"
[[tables]]
name = "t"

[[tables.fields]]
name = "tags"
type = "TEXT"
default = ["a", "b"]
"#,
        )
        .unwrap();
        assert!(matches!(config.schemas(), Err(Error::InvalidSchema(_))));
    }

    #[test]
    fn test_resolve_database_path() {
        let config: MysqliteConfig = toml::from_str(CONFIG).unwrap();
        assert_eq!(
            resolve_database_path(Some(Path::new("cli.db")), Some(&config)),
            PathBuf::from("cli.db")
        );
        assert_eq!(resolve_database_path(None, Some(&config)), PathBuf::from("app.db"));
        assert_eq!(resolve_database_path(None, None), PathBuf::from("mysqlite.db"));
    }

    #[test]
    fn test_write_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("mysqlite.toml");
        assert!(load_config(Some(&path)).unwrap().is_none());

        write_config(&path, &MysqliteConfig::sample(), false).unwrap();
        assert!(write_config(&path, &MysqliteConfig::sample(), false).is_err());
        write_config(&path, &MysqliteConfig::sample(), true).unwrap();

        let loaded = load_config(Some(&path)).unwrap().unwrap();
        let users = loaded.table("users").unwrap().to_schema().unwrap();
        assert_eq!(users, MysqliteConfig::sample().schemas().unwrap()[0]);
        assert!(users.field("email").unwrap().unique);
    }

    #[test]
    fn test_ensure_db_dir() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("nested").join("data").join("app.db");
        ensure_db_dir(&db).unwrap();
        assert!(db.parent().unwrap().is_dir());
    }
}
