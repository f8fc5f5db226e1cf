//! In-memory [`CheckpointStore`] for tests and ephemeral sessions.
//!
//! Uses a `HashMap` of per-thread `Vec`s behind `std::sync::RwLock`.
//! Nothing survives the process.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use super::{Checkpoint, CheckpointStore};
use crate::error::StoreError;
use crate::state::{ConversationState, Stage};

#[derive(Default)]
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of threads with at least one checkpoint.
    pub fn thread_count(&self) -> usize {
        self.threads
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn append(
        &self,
        thread_id: &str,
        stage: Stage,
        state: &ConversationState,
    ) -> Result<Checkpoint, StoreError> {
        let mut threads = self.threads.write().unwrap_or_else(PoisonError::into_inner);
        let log = threads.entry(thread_id.to_string()).or_default();
        let seq = log.last().map_or(1, |c| c.seq + 1);

        let mut state = state.clone();
        state.checkpoint_id = seq;
        let checkpoint = Checkpoint {
            thread_id: thread_id.to_string(),
            seq,
            stage,
            state,
            created_at: Utc::now(),
        };
        log.push(checkpoint.clone());
        Ok(checkpoint)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        Ok(threads.get(thread_id).and_then(|log| log.last().cloned()))
    }

    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Checkpoint>, StoreError> {
        let threads = self.threads.read().unwrap_or_else(PoisonError::into_inner);
        let Some(log) = threads.get(thread_id) else {
            return Ok(Vec::new());
        };
        Ok(log
            .iter()
            .rev()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Message;
    use crate::state::StateUpdate;

    fn state_with(thread: &str, text: &str) -> ConversationState {
        let mut state = ConversationState::new(thread);
        state.apply(StateUpdate::message(Message::user(text)));
        state
    }

    #[tokio::test]
    async fn test_sequence_starts_at_one_and_increments() {
        let store = InMemoryCheckpointStore::new();
        let first = store
            .append("t1", Stage::GenerateQuery, &state_with("t1", "a"))
            .await
            .unwrap();
        let second = store
            .append("t1", Stage::Retrieve, &state_with("t1", "a"))
            .await
            .unwrap();
        assert_eq!(first.seq, 1);
        assert_eq!(second.seq, 2);
        assert_eq!(second.state.checkpoint_id, 2);
    }

    #[tokio::test]
    async fn test_latest_returns_newest_checkpoint() {
        let store = InMemoryCheckpointStore::new();
        assert!(store.latest("t1").await.unwrap().is_none());

        store
            .append("t1", Stage::GenerateQuery, &state_with("t1", "old"))
            .await
            .unwrap();
        store
            .append("t1", Stage::Respond, &state_with("t1", "new"))
            .await
            .unwrap();

        let latest = store.latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.stage, Stage::Respond);
        assert_eq!(latest.state.messages[0].content, "new");
    }

    #[tokio::test]
    async fn test_threads_are_isolated() {
        let store = InMemoryCheckpointStore::new();
        store
            .append("t1", Stage::GenerateQuery, &state_with("t1", "one"))
            .await
            .unwrap();
        let other = store
            .append("t2", Stage::GenerateQuery, &state_with("t2", "two"))
            .await
            .unwrap();

        assert_eq!(other.seq, 1);
        assert_eq!(store.thread_count(), 2);
        assert_eq!(store.list("t1", None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_limited() {
        let store = InMemoryCheckpointStore::new();
        for stage in Stage::ALL {
            store
                .append("t1", stage, &state_with("t1", "q"))
                .await
                .unwrap();
        }
        let all = store.list("t1", None).await.unwrap();
        let seqs: Vec<u64> = all.iter().map(|c| c.seq).collect();
        assert_eq!(seqs, vec![3, 2, 1]);

        let limited = store.list("t1", Some(1)).await.unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].stage, Stage::Respond);

        assert!(store.list("missing", None).await.unwrap().is_empty());
    }
}
