//! Command implementations behind the `briefly` CLI.
//!
//! Each `run_*` function loads what it needs from the [`Config`], does its
//! work, prints human-readable output to stdout, and closes its pool.

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use briefly_core::chat::ModelCatalog;
use briefly_core::retrieval::{RetrieverRegistry, SearchParams};
use briefly_core::{Configuration, ConversationGraph};

use crate::catalog::ProviderCatalog;
use crate::config::Config;
use crate::sqlite_store::SqliteCheckpointStore;
use crate::vector::SqliteRetrieverProvider;
use crate::{db, import, migrate};

/// Per-invocation overrides of the file configuration.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub retriever: Option<String>,
    pub k: Option<usize>,
    pub num_candidates: Option<usize>,
    pub query_model: Option<String>,
    pub response_model: Option<String>,
    pub embedding_model: Option<String>,
}

impl RunOverrides {
    pub fn apply(&self, mut config: Configuration) -> Configuration {
        if let Some(retriever) = &self.retriever {
            config.retriever_provider = retriever.clone();
        }
        if let Some(k) = self.k {
            config.k = k;
        }
        if let Some(num_candidates) = self.num_candidates {
            config.num_candidates = num_candidates;
        }
        if let Some(model) = &self.query_model {
            config.query_model = model.clone();
        }
        if let Some(model) = &self.response_model {
            config.response_model = model.clone();
        }
        if let Some(model) = &self.embedding_model {
            config.embedding_model = model.clone();
        }
        config
    }
}

/// Retriever backends available to this binary.
pub fn retriever_registry(config: &Config) -> RetrieverRegistry {
    let mut registry = RetrieverRegistry::new();
    registry.register(Arc::new(SqliteRetrieverProvider::new(config.db.path.clone())));
    registry
}

async fn open_pool(config: &Config) -> Result<SqlitePool> {
    let pool = db::connect(config)
        .await
        .with_context(|| format!("Failed to open database: {}", config.db.path.display()))?;
    migrate::migrate_pool(&pool).await?;
    Ok(pool)
}

/// Assemble the pipeline over the SQLite store and the configured providers.
pub fn build_graph(
    config: &Config,
    pool: SqlitePool,
    models: Arc<dyn ModelCatalog>,
) -> ConversationGraph {
    ConversationGraph::new(
        Arc::new(SqliteCheckpointStore::new(pool)),
        models,
        Arc::new(retriever_registry(config)),
    )
}

pub async fn run_init(config: &Config) -> Result<()> {
    migrate::run_migrations(config).await?;
    println!("Database initialized successfully.");
    Ok(())
}

pub fn run_thread_new() -> Result<()> {
    println!("{}", Uuid::new_v4());
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    user_id: Option<&str>,
    thread_id: &str,
    overrides: &RunOverrides,
) -> Result<()> {
    let user_id = user_id.unwrap_or(&config.conversation.default_user);
    let conversation = overrides.apply(config.conversation_config(user_id, thread_id));

    let pool = open_pool(config).await?;
    let models = Arc::new(ProviderCatalog::from_env(&config.models)?);
    let graph = build_graph(config, pool.clone(), models);

    let result = graph
        .run_turn(question, user_id, thread_id, &conversation)
        .await;
    pool.close().await;

    let reply = result?;
    println!("{}", reply);
    Ok(())
}

pub async fn run_history(config: &Config, thread_id: &str, limit: Option<usize>) -> Result<()> {
    let pool = open_pool(config).await?;
    let graph = build_graph(
        config,
        pool.clone(),
        Arc::new(ProviderCatalog::from_env(&config.models)?),
    );
    let checkpoints = graph.history(thread_id, limit).await;
    pool.close().await;
    let checkpoints = checkpoints?;

    if checkpoints.is_empty() {
        println!("No checkpoints for thread {}.", thread_id);
        return Ok(());
    }

    for checkpoint in &checkpoints {
        let state = &checkpoint.state;
        println!(
            "#{} {} at {}",
            checkpoint.seq,
            checkpoint.stage,
            checkpoint.created_at.format("%Y-%m-%d %H:%M:%S")
        );
        println!(
            "    messages: {}, queries: {}, docs: {}",
            state.messages.len(),
            state.queries.len(),
            state.retrieved_docs.len()
        );
        if let Some(query) = state.latest_query() {
            println!("    latest query: \"{}\"", query);
        }
    }
    Ok(())
}

pub async fn run_show(config: &Config, thread_id: &str) -> Result<()> {
    let pool = open_pool(config).await?;
    let graph = build_graph(
        config,
        pool.clone(),
        Arc::new(ProviderCatalog::from_env(&config.models)?),
    );
    let state = graph.state(thread_id).await;
    pool.close().await;

    let Some(state) = state? else {
        println!("No checkpoints for thread {}.", thread_id);
        return Ok(());
    };

    println!("--- Thread ---");
    println!("thread_id:  {}", state.thread_id);
    println!("checkpoint: {}", state.checkpoint_id);
    println!();

    println!("--- Messages ({}) ---", state.messages.len());
    for message in &state.messages {
        println!("[{}] {}", message.role.as_str(), message.content);
    }
    println!();

    println!("--- Queries ({}) ---", state.queries.len());
    for (i, query) in state.queries.iter().enumerate() {
        println!("{}. {}", i + 1, query);
    }
    println!();

    println!("--- Retrieved documents ({}) ---", state.retrieved_docs.len());
    for doc in &state.retrieved_docs {
        println!("[{:.4}] {}", doc.score, doc.content.replace('\n', " ").trim());
    }
    Ok(())
}

/// Run only the retriever for `query` and print the scored documents.
pub async fn run_search(config: &Config, query: &str, overrides: &RunOverrides) -> Result<()> {
    let conversation = overrides.apply(config.conversation_config(
        &config.conversation.default_user,
        "search",
    ));
    conversation.validate()?;

    let registry = retriever_registry(config);
    let provider = registry
        .find(&conversation.retriever_provider)
        .with_context(|| {
            format!(
                "Unknown retriever provider: '{}'",
                conversation.retriever_provider
            )
        })?;
    let catalog = ProviderCatalog::from_env(&config.models)?;
    let embedder = catalog.embedder(&conversation.embedding_model)?;

    let params = SearchParams {
        k: conversation.k,
        num_candidates: conversation.num_candidates,
    };
    let retriever = provider.open(embedder, params).await?;
    let result = retriever.search(query).await;
    retriever.close().await;
    let docs = result?;

    if docs.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, doc) in docs.iter().enumerate() {
        println!("{}. [{:.4}] {}", i + 1, doc.score, doc.content.replace('\n', " ").trim());
    }
    Ok(())
}

pub async fn run_import(config: &Config, path: &Path, embedding_model: Option<&str>) -> Result<()> {
    let catalog = ProviderCatalog::from_env(&config.models)?;
    let embedder = catalog.embedder(embedding_model.unwrap_or(&config.models.embedding))?;

    let pool = open_pool(config).await?;
    let stats = import::import_file(&pool, path, embedder.as_ref(), config.models.batch_size).await;
    pool.close().await;
    let stats = stats?;

    println!(
        "Imported {} of {} records ({} skipped: no text).",
        stats.imported, stats.read, stats.skipped
    );
    Ok(())
}
