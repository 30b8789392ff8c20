//! mysqlite CLI - declarative tables and JSON documents on SQLite

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use mysqlite::config::{self, MysqliteConfig};
use mysqlite::{DocumentRef, SqliteStore, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "mysqlite")]
#[command(version)]
#[command(about = "Declarative tables and JSON documents on an embedded SQLite database")]
#[command(long_about = r#"
mysqlite creates tables from TOML field descriptors, runs statements on a
fresh connection per call, and reads or patches JSON documents stored in a
single column.

Example usage:
  mysqlite init-config
  mysqlite init
  mysqlite insert --table users --values '{"email": "a@b.c"}'
  mysqlite doc set --table users --column settings --key-column email --key a@b.c --patch '{"theme": "dark"}'
  mysqlite query --sql "SELECT * FROM users"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "mysqlite.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a sample config file
    InitConfig {
        /// Where to write the config
        #[arg(short, long, default_value = "mysqlite.toml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print CREATE TABLE statements for configured tables
    Schema {
        /// Only this table
        #[arg(short, long)]
        table: Option<String>,
    },

    /// Create every configured table that doesn't exist yet
    Init {
        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Show the columns of an existing table
    Inspect {
        #[arg(short, long)]
        table: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a query and print its rows
    Query {
        #[arg(short, long)]
        sql: String,

        /// Positional parameter, repeatable
        #[arg(short, long = "param")]
        params: Vec<String>,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,

        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Insert one row
    Insert {
        #[arg(short, long)]
        table: String,

        /// Column values as a JSON object
        #[arg(long)]
        values: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Update rows matching a filter
    Update {
        #[arg(short, long)]
        table: String,

        /// New column values as a JSON object
        #[arg(long)]
        set: String,

        /// Column equality filter as a JSON object (required, non-empty)
        #[arg(long)]
        filter: String,

        /// Path to the database file
        #[arg(short, long)]
        database: Option<PathBuf>,
    },

    /// Read or patch a JSON document stored in a column
    Doc {
        #[command(subcommand)]
        action: DocCommand,
    },
}

#[derive(clap::Args)]
struct DocTarget {
    #[arg(short, long)]
    table: String,

    /// Column holding the document
    #[arg(long)]
    column: String,

    /// Column identifying the row
    #[arg(long)]
    key_column: String,

    /// Key value (integers are matched as integers)
    #[arg(short, long)]
    key: String,

    /// Path to the database file
    #[arg(short, long)]
    database: Option<PathBuf>,
}

impl DocTarget {
    fn doc_ref(&self) -> DocumentRef<'_> {
        DocumentRef::new(&self.table, &self.column, &self.key_column, Value::parse_scalar(&self.key))
    }
}

#[derive(Subcommand)]
enum DocCommand {
    /// Print the document
    Get {
        #[command(flatten)]
        target: DocTarget,
    },

    /// Shallow-merge a JSON object into the document
    Set {
        #[command(flatten)]
        target: DocTarget,

        #[arg(long)]
        patch: String,

        /// Hold one IMMEDIATE transaction for the whole read-merge-write
        #[arg(long)]
        atomic: bool,
    },
}

fn open_store(database: Option<&Path>, config: Option<&MysqliteConfig>) -> SqliteStore {
    let path = config::resolve_database_path(database, config);
    let options = config.map(MysqliteConfig::to_options).unwrap_or_default();
    tracing::debug!("Using database {}", path.display());
    SqliteStore::with_options(path, options)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let config = config::load_config(Some(&cli.config))?;
    let config = config.as_ref();

    let result = match cli.command {
        Commands::InitConfig { path, force } => commands::run_init_config(&path, force),
        Commands::Schema { table } => commands::run_schema(config, table.as_deref()),
        Commands::Init { database } => {
            commands::run_init(&open_store(database.as_deref(), config), config)
        }
        Commands::Inspect { table, database, format } => {
            commands::run_inspect(&open_store(database.as_deref(), config), &table, format)
        }
        Commands::Query { sql, params, database, format } => {
            commands::run_query(&open_store(database.as_deref(), config), &sql, &params, format)
        }
        Commands::Insert { table, values, database } => {
            commands::run_insert(&open_store(database.as_deref(), config), &table, &values)
        }
        Commands::Update { table, set, filter, database } => {
            commands::run_update(&open_store(database.as_deref(), config), &table, &set, &filter)
        }
        Commands::Doc { action } => match action {
            DocCommand::Get { target } => {
                let store = open_store(target.database.as_deref(), config);
                commands::run_doc_get(&store, &target.doc_ref())
            }
            DocCommand::Set { target, patch, atomic } => {
                let store = open_store(target.database.as_deref(), config);
                commands::run_doc_set(&store, &target.doc_ref(), &patch, atomic)
            }
        },
    };

    if let Err(e) = result {
        mysqlite::ui::error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
