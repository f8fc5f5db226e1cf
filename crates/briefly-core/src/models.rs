//! Core data models shared by the pipeline, stores, and backends.
//!
//! These types represent conversation messages and the documents that flow
//! from a vector-search backend into the response prompt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Author of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One turn record in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}

/// A retrieved text snippet with its relevance score (higher = better).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedDocument {
    pub content: String,
    pub score: f64,
}

/// Names of the text fields consulted when resolving document content,
/// in priority order.
pub const CONTENT_FIELDS: [&str; 4] = ["content", "text", "page_content", "title"];

/// The text-bearing fields of an upstream document.
///
/// Aggregated content arrives in different shapes: news articles carry
/// `content`, social posts carry `text`, scraped pages carry
/// `page_content`, and some records only have a `title`. All are optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentFields {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub page_content: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

impl DocumentFields {
    /// Resolve the document's text: the first non-empty field among
    /// `content`, `text`, `page_content`, `title` (see [`CONTENT_FIELDS`]).
    ///
    /// Returns `None` when every field is absent or empty.
    ///
    /// ```rust
    /// use briefly_core::models::DocumentFields;
    ///
    /// let doc = DocumentFields {
    ///     content: Some(String::new()),
    ///     text: Some("tweet body".to_string()),
    ///     title: Some("headline".to_string()),
    ///     ..Default::default()
    /// };
    /// assert_eq!(doc.resolve_content(), Some("tweet body"));
    /// ```
    pub fn resolve_content(&self) -> Option<&str> {
        [&self.content, &self.text, &self.page_content, &self.title]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .find(|s| !s.is_empty())
    }
}

/// A raw search hit as returned by a vector-search backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    #[serde(flatten)]
    pub fields: DocumentFields,
    #[serde(default)]
    pub score: f64,
}

impl RawDocument {
    /// Normalize into a [`RetrievedDocument`], or `None` if no field
    /// carries any text.
    pub fn into_retrieved(self) -> Option<RetrievedDocument> {
        let score = self.score;
        self.fields.resolve_content().map(|content| RetrievedDocument {
            content: content.to_string(),
            score,
        })
    }
}
