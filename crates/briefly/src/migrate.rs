//! Idempotent schema migrations.
//!
//! | Table | Purpose |
//! |-------|---------|
//! | `checkpoints` | Per-thread conversation state, one row per completed stage |
//! | `articles` | Aggregated documents with their embedding vectors |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_pool(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index on an open pool.
pub async fn migrate_pool(pool: &SqlitePool) -> Result<()> {
    // Create checkpoints table
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS checkpoints (
            thread_id TEXT NOT NULL,
            seq INTEGER NOT NULL,
            stage TEXT NOT NULL,
            state_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            PRIMARY KEY (thread_id, seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create articles table. Any subset of the text fields may be present.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            source TEXT,
            url TEXT,
            content TEXT,
            text TEXT,
            page_content TEXT,
            title TEXT,
            published_at INTEGER NOT NULL,
            embedding_model TEXT,
            dims INTEGER,
            embedding BLOB,
            imported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_articles_embedding_model ON articles(embedding_model)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
