//! Checkpoint storage abstraction.
//!
//! After every stage the executor writes the full [`ConversationState`] as a
//! new [`Checkpoint`]. Checkpoints of a thread form an append-only sequence
//! numbered from `1`; the highest sequence number is the thread's current
//! state. Threads never share checkpoints.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::state::{ConversationState, Stage};

/// A persisted snapshot of a thread's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Position in the thread's checkpoint sequence, starting at `1`.
    pub seq: u64,
    /// The stage whose completion produced this snapshot.
    pub stage: Stage,
    /// Full state after `stage`. `state.checkpoint_id == seq`.
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

/// Durable per-thread checkpoint log.
///
/// # Concurrency
///
/// Distinct threads may be written concurrently. Two writers on the *same*
/// thread are not coordinated beyond sequence-number uniqueness: a second
/// write that races for the same `seq` fails with
/// [`StoreError::Conflict`] instead of silently overwriting.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `state` as the next checkpoint of `thread_id`.
    ///
    /// The store assigns the sequence number and returns the written
    /// checkpoint, whose `state.checkpoint_id` equals its `seq`.
    async fn append(
        &self,
        thread_id: &str,
        stage: Stage,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError>;

    /// The most recent checkpoint of `thread_id`, or `None` for an unknown
    /// thread.
    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    /// Checkpoints of `thread_id`, newest first, at most `limit` of them.
    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, StoreError>;
}
