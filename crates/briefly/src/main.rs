//! # Briefly CLI (`briefly`)
//!
//! Ask questions about aggregated news in persistent conversation threads.
//!
//! ## Usage
//!
//! ```bash
//! briefly --config ./config/briefly.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `briefly init` | Create the SQLite database and run schema migrations |
//! | `briefly thread new` | Print a fresh thread id |
//! | `briefly ask "<question>" --thread <id>` | Run one conversation turn and print the reply |
//! | `briefly history <thread>` | List a thread's checkpoints, newest first |
//! | `briefly show <thread>` | Print a thread's current state |
//! | `briefly search "<query>"` | Run only the retriever and print scored documents |
//! | `briefly import <file.jsonl>` | Embed and store articles |
//!
//! Logs go to stderr. Set `RUST_LOG` or pass `-v` / `-vv` for more detail.

use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use briefly::commands::{self, RunOverrides};
use briefly::config;

/// Briefly: conversational retrieval over aggregated news.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/briefly.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "briefly",
    about = "Briefly: conversational retrieval over aggregated news",
    version,
    long_about = "Briefly answers questions about aggregated news. Each question runs a \
    generate-query, retrieve, respond pipeline whose state is checkpointed per conversation \
    thread in SQLite."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/briefly.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug). Ignored when RUST_LOG is set.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `checkpoints` and
    /// `articles` tables. Idempotent.
    Init,

    /// Manage conversation threads.
    Thread {
        #[command(subcommand)]
        action: ThreadAction,
    },

    /// Ask a question in a thread and print the reply.
    Ask {
        /// The question.
        question: String,

        /// Thread to continue. Use `briefly thread new` to start one.
        #[arg(long)]
        thread: String,

        /// User id recorded with the turn. Defaults to `conversation.default_user`.
        #[arg(long)]
        user: Option<String>,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// List a thread's checkpoints, newest first.
    History {
        thread: String,

        /// Maximum number of checkpoints to show.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Print a thread's current messages, queries, and retrieved documents.
    Show { thread: String },

    /// Run only the retriever and print scored documents.
    Search {
        query: String,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Embed and store articles from a JSON Lines file.
    Import {
        path: PathBuf,

        /// Embedding model to use instead of `models.embedding`.
        #[arg(long)]
        embedding_model: Option<String>,
    },
}

#[derive(Subcommand)]
enum ThreadAction {
    /// Print a fresh thread id (UUID v4).
    New,
}

#[derive(Args, Debug, Clone, Default)]
struct OverrideArgs {
    /// Retriever backend.
    #[arg(long)]
    retriever: Option<String>,

    /// Number of documents to retrieve.
    #[arg(long)]
    k: Option<usize>,

    /// Candidate pool size for the similarity search.
    #[arg(long)]
    num_candidates: Option<usize>,

    /// Query model (`<provider>/<model>`).
    #[arg(long)]
    query_model: Option<String>,

    /// Response model (`<provider>/<model>`).
    #[arg(long)]
    response_model: Option<String>,

    /// Embedding model (`<provider>/<model>`).
    #[arg(long)]
    embedding_model: Option<String>,
}

impl From<OverrideArgs> for RunOverrides {
    fn from(args: OverrideArgs) -> Self {
        Self {
            retriever: args.retriever,
            k: args.k,
            num_candidates: args.num_candidates,
            query_model: args.query_model,
            response_model: args.response_model,
            embedding_model: args.embedding_model,
        }
    }
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that don't require config
    if let Commands::Thread {
        action: ThreadAction::New,
    } = &cli.command
    {
        return commands::run_thread_new();
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            commands::run_init(&cfg).await?;
        }
        Commands::Thread { .. } => {}
        Commands::Ask {
            question,
            thread,
            user,
            overrides,
        } => {
            commands::run_ask(&cfg, &question, user.as_deref(), &thread, &overrides.into())
                .await?;
        }
        Commands::History { thread, limit } => {
            commands::run_history(&cfg, &thread, limit).await?;
        }
        Commands::Show { thread } => {
            commands::run_show(&cfg, &thread).await?;
        }
        Commands::Search { query, overrides } => {
            commands::run_search(&cfg, &query, &overrides.into()).await?;
        }
        Commands::Import {
            path,
            embedding_model,
        } => {
            commands::run_import(&cfg, &path, embedding_model.as_deref()).await?;
        }
    }

    Ok(())
}
