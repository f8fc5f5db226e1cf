//! SQLite database connection management.
//!
//! Provides a connection pool to the SQLite database with WAL mode
//! enabled, so checkpoint writes from one conversation do not block
//! retrieval reads from another.
//!
//! Two entry points:
//!
//! - [`connect`] creates the database file and its parent directories if
//!   needed. Used by `init`, `import`, and the checkpoint store.
//! - [`open_existing`] refuses to create anything. Used by the SQLite
//!   retriever, which opens a short-lived pool per retrieval.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::config::Config;

/// Create a connection pool to the configured SQLite database.
///
/// - Creates the database file and parent directories if they don't exist.
/// - Enables WAL journal mode for concurrent read/write.
/// - Returns a pool with up to 5 connections.
pub async fn connect(config: &Config) -> Result<SqlitePool> {
    let db_path = &config.db.path;

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options(db_path)?.create_if_missing(true))
        .await?;

    Ok(pool)
}

/// Open a small pool onto an existing database file.
pub async fn open_existing(db_path: &Path, max_connections: u32) -> Result<SqlitePool, sqlx::Error> {
    let options = options(db_path)?.create_if_missing(false);
    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

fn options(db_path: &Path) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(
        SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
            .journal_mode(SqliteJournalMode::Wal),
    )
}
