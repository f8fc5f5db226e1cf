//! # Briefly Core
//!
//! Runtime-agnostic logic for Briefly: conversation state, the
//! `generate_query → retrieve → respond` pipeline, and the traits its
//! collaborators implement (checkpoint store, retriever backend, embedder,
//! chat model).
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem dependencies.
//! The in-memory store and vector backend are enough to run the whole
//! pipeline in tests.

pub mod chat;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod models;
pub mod prompts;
pub mod retrieval;
pub mod stages;
pub mod state;
pub mod store;

pub use config::Configuration;
pub use error::PipelineError;
pub use graph::ConversationGraph;
pub use state::{ConversationState, InputState, Stage};
