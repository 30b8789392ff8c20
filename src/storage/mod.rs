//! Storage Layer - one SQLite connection per call
//!
//! - `sqlite`: the [`SqliteStore`] executor and its scoped connection helpers
//! - `statements`: SQL builders and runners that work on a borrowed connection

pub mod sqlite;
pub mod statements;

pub use sqlite::{CancelToken, ConnectionOptions, SqliteStore};
pub use statements::{Fetch, Fetched, ResultSet, Row};
