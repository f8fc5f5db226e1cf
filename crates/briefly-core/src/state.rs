//! Conversation state and the stage state machine.
//!
//! A [`ConversationState`] is scoped to one thread. Each pipeline stage
//! returns a [`StateUpdate`] holding only the fields it changed, which is
//! merged into the running state with per-field semantics:
//!
//! | Field | Merge |
//! |-------|-------|
//! | `messages` | append |
//! | `queries` | append |
//! | `retrieved_docs` | replace |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::models::{Message, RetrievedDocument, Role};

/// One of the three fixed pipeline stages.
///
/// The pipeline is the linear chain
/// `START → GenerateQuery → Retrieve → Respond → END`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    GenerateQuery,
    Retrieve,
    Respond,
}

impl Stage {
    /// The stage entered from `START`.
    pub const FIRST: Stage = Stage::GenerateQuery;

    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::GenerateQuery, Stage::Retrieve, Stage::Respond];

    /// The stage that follows this one, or `None` when the next state is `END`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::GenerateQuery => Some(Stage::Retrieve),
            Stage::Retrieve => Some(Stage::Respond),
            Stage::Respond => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::GenerateQuery => "generate_query",
            Stage::Retrieve => "retrieve",
            Stage::Respond => "respond",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate_query" => Ok(Stage::GenerateQuery),
            "retrieve" => Ok(Stage::Retrieve),
            "respond" => Ok(Stage::Respond),
            other => Err(format!("unknown stage: '{other}'")),
        }
    }
}

/// Durable pipeline state for one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    /// Stable identifier of the conversation.
    pub thread_id: String,
    /// Sequence number of the checkpoint this state was loaded from or last
    /// written as. `0` means the state has never been persisted.
    pub checkpoint_id: u64,
    /// Every turn record, oldest first.
    pub messages: Vec<Message>,
    /// Every search query generated so far, oldest first.
    pub queries: Vec<String>,
    /// Documents from the most recent retrieval only.
    pub retrieved_docs: Vec<RetrievedDocument>,
}

impl ConversationState {
    /// Empty state for a thread that has no checkpoint yet.
    pub fn new(thread_id: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: 0,
            messages: Vec::new(),
            queries: Vec::new(),
            retrieved_docs: Vec::new(),
        }
    }

    /// Merge a stage's partial update into this state.
    pub fn apply(&mut self, update: StateUpdate) {
        self.messages.extend(update.messages);
        self.queries.extend(update.queries);
        if let Some(docs) = update.retrieved_docs {
            self.retrieved_docs = docs;
        }
    }

    /// The query the next retrieval should run.
    pub fn latest_query(&self) -> Option<&str> {
        self.queries.last().map(String::as_str)
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.role == Role::Assistant)
    }
}

/// Externally supplied seed for a run: the new messages of this turn.
///
/// Merged into the loaded (or fresh) thread state before the first stage;
/// never persisted on its own.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    pub messages: Vec<Message>,
}

impl InputState {
    /// Input consisting of a single user question.
    pub fn question(text: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(text)],
        }
    }
}

/// Partial state returned by a stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    /// Appended to `messages`.
    pub messages: Vec<Message>,
    /// Appended to `queries`.
    pub queries: Vec<String>,
    /// Replaces `retrieved_docs` when present.
    pub retrieved_docs: Option<Vec<RetrievedDocument>>,
}

impl StateUpdate {
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            queries: vec![query.into()],
            ..Default::default()
        }
    }

    pub fn documents(docs: Vec<RetrievedDocument>) -> Self {
        Self {
            retrieved_docs: Some(docs),
            ..Default::default()
        }
    }

    pub fn message(message: Message) -> Self {
        Self {
            messages: vec![message],
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(content: &str, score: f64) -> RetrievedDocument {
        RetrievedDocument {
            content: content.to_string(),
            score,
        }
    }

    #[test]
    fn test_stage_chain_is_linear() {
        let mut order = Vec::new();
        let mut next = Some(Stage::FIRST);
        while let Some(stage) = next {
            order.push(stage);
            next = stage.next();
        }
        assert_eq!(order, Stage::ALL.to_vec());
    }

    #[test]
    fn test_stage_roundtrips_through_str() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("summarize".parse::<Stage>().is_err());
    }

    #[test]
    fn test_messages_and_queries_append() {
        let mut state = ConversationState::new("t1");
        state.apply(StateUpdate::message(Message::user("first")));
        state.apply(StateUpdate::query("q1"));
        state.apply(StateUpdate::message(Message::assistant("answer")));
        state.apply(StateUpdate::query("q2"));

        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.queries, vec!["q1", "q2"]);
        assert_eq!(state.latest_query(), Some("q2"));
    }

    #[test]
    fn test_retrieved_docs_replace_not_union() {
        let mut state = ConversationState::new("t1");
        state.apply(StateUpdate::documents(vec![doc("a", 0.9), doc("b", 0.8)]));
        state.apply(StateUpdate::documents(vec![doc("c", 0.7)]));
        assert_eq!(state.retrieved_docs, vec![doc("c", 0.7)]);
    }

    #[test]
    fn test_update_without_docs_keeps_existing_docs() {
        let mut state = ConversationState::new("t1");
        state.apply(StateUpdate::documents(vec![doc("a", 0.9)]));
        state.apply(StateUpdate::query("q"));
        assert_eq!(state.retrieved_docs.len(), 1);
    }

    #[test]
    fn test_last_assistant_message() {
        let mut state = ConversationState::new("t1");
        assert!(state.last_assistant_message().is_none());
        state.apply(StateUpdate::message(Message::assistant("one")));
        state.apply(StateUpdate::message(Message::user("two")));
        assert_eq!(state.last_assistant_message().unwrap().content, "one");
    }
}
