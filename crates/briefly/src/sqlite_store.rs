//! SQLite-backed [`CheckpointStore`].
//!
//! Each checkpoint is one row of the `checkpoints` table, keyed by
//! `(thread_id, seq)`. The full [`ConversationState`] is stored as JSON.
//! Rows are never updated: the primary key turns a second write of the
//! same sequence number into [`StoreError::Conflict`].
//!
//! `append` opens its transaction with `BEGIN IMMEDIATE`, taking the write
//! lock before reading `MAX(seq)`. Concurrent appends therefore queue on
//! SQLite's busy timeout and each one gets the next sequence number.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use briefly_core::error::StoreError;
use briefly_core::state::{ConversationState, Stage};
use briefly_core::store::{Checkpoint, CheckpointStore};

pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn insert_error(e: sqlx::Error, thread_id: &str, seq: u64) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            thread_id: thread_id.to_string(),
            seq,
        },
        _ => backend(e),
    }
}

fn row_to_checkpoint(thread_id: &str, row: &SqliteRow) -> Result<Checkpoint, StoreError> {
    let seq: i64 = row.get("seq");
    let stage: String = row.get("stage");
    let state_json: String = row.get("state_json");
    let created_at: i64 = row.get("created_at");

    let stage: Stage = stage.parse().map_err(StoreError::Backend)?;
    let state: ConversationState = serde_json::from_str(&state_json)?;
    let created_at = DateTime::<Utc>::from_timestamp(created_at, 0).ok_or_else(|| {
        StoreError::Backend(format!("invalid checkpoint timestamp: {created_at}"))
    })?;

    Ok(Checkpoint {
        thread_id: thread_id.to_string(),
        seq: seq as u64,
        stage,
        state,
        created_at,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn append(
        &self,
        thread_id: &str,
        stage: Stage,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError> {
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(backend)?;

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM checkpoints WHERE thread_id = ?",
        )
        .bind(thread_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        let seq = next as u64;

        let mut state = state.clone();
        state.checkpoint_id = seq;
        let state_json = serde_json::to_string(&state)?;
        let created_at = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO checkpoints (thread_id, seq, stage, state_json, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(thread_id)
        .bind(next)
        .bind(stage.as_str())
        .bind(&state_json)
        .bind(created_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| insert_error(e, thread_id, seq))?;

        tx.commit().await.map_err(backend)?;

        Ok(Checkpoint {
            thread_id: thread_id.to_string(),
            seq,
            stage,
            state,
            created_at,
        })
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT seq, stage, state_json, created_at
            FROM checkpoints
            WHERE thread_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(thread_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(|r| row_to_checkpoint(thread_id, &r)).transpose()
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        // A negative LIMIT means "no limit" in SQLite.
        let limit = limit.map_or(-1, |n| n as i64);
        let rows = sqlx::query(
            r#"
            SELECT seq, stage, state_json, created_at
            FROM checkpoints
            WHERE thread_id = ?
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(thread_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|r| row_to_checkpoint(thread_id, r))
            .collect()
    }
}
