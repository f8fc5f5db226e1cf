//! # Briefly
//!
//! **Conversational retrieval over aggregated news.**
//!
//! Each user question runs a fixed three-stage pipeline from
//! [`briefly_core`]:
//!
//! ```text
//! question ─▶ generate_query ─▶ retrieve ─▶ respond ─▶ reply
//!                  │                │           │
//!                  ▼                ▼           ▼
//!            ┌──────────────────────────────────────┐
//!            │  SQLite: checkpoints (per thread)    │
//!            │          articles (+ embeddings)     │
//!            └──────────────────────────────────────┘
//! ```
//!
//! This crate supplies the native pieces around the core: TOML
//! configuration ([`config`]), the SQLite connection and schema ([`db`],
//! [`migrate`]), the SQLite checkpoint store ([`sqlite_store`]) and vector
//! backend ([`vector`]), OpenAI and Ollama model clients ([`chat`],
//! [`embedding`], [`catalog`]), article import ([`import`]), and the
//! commands behind the `briefly` CLI ([`commands`]).
//!
//! ## Quick Start
//!
//! ```bash
//! briefly init
//! briefly import articles.jsonl
//! THREAD=$(briefly thread new)
//! briefly ask "What happened in the markets today?" --thread "$THREAD"
//! briefly history "$THREAD"
//! ```

pub mod catalog;
pub mod chat;
pub mod commands;
pub mod config;
pub mod db;
pub mod embedding;
pub mod http;
pub mod import;
pub mod migrate;
pub mod sqlite_store;
pub mod vector;
