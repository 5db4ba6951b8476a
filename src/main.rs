//! Agentic RAG CLI - main entry point
//!
//! Ingest documents, search them, and ask questions through the agent loop.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

use agentic_rag::agents::AskOptions;
use agentic_rag::commands::{self, ask::AskArgs};
use agentic_rag::metrics;
use tracing::warn;

#[derive(Parser)]
#[command(name = "agentic_rag")]
#[command(about = "Hybrid retrieval with an agentic question-answering loop", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the YAML configuration (default: ./agentic_rag.yml if present)
    #[arg(long, env = "AGENTIC_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a text file, or every .md/.txt file under a directory
    Ingest {
        /// File or directory
        path: PathBuf,

        /// Document id (a prefix when ingesting a directory)
        #[arg(long)]
        doc_id: Option<String>,
    },

    /// Ask a question through the agent loop
    Ask {
        query: String,

        /// Print progress and the answer as it is written
        #[arg(long, default_value_t = false)]
        stream: bool,

        /// Hits per search (default from config)
        #[arg(short, long)]
        k: Option<usize>,

        /// Iteration budget (default from config)
        #[arg(long)]
        max_iterations: Option<usize>,

        /// Print the answer object as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Hybrid search without the agent loop
    Search {
        query: String,

        /// Number of results
        #[arg(short, long, default_value = "5")]
        k: usize,
    },

    /// List ingested documents
    Docs,

    /// Document, chunk and entity counts
    Status {
        /// Print as JSON
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Delete a document and its entities
    Delete { doc_id: String },

    /// Sync folders into the corpus
    Sync {
        /// Source as <id>=<dir>; repeatable
        #[arg(long = "source", required = true)]
        sources: Vec<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Ingest { .. } => "ingest",
            Commands::Ask { .. } => "ask",
            Commands::Search { .. } => "search",
            Commands::Docs => "docs",
            Commands::Status { .. } => "status",
            Commands::Delete { .. } => "delete",
            Commands::Sync { .. } => "sync",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("agentic_rag=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let command_name = cli.command.name();
    let start = Instant::now();

    let result = execute_command(cli.config, cli.command).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(config: Option<PathBuf>, command: Commands) -> anyhow::Result<()> {
    let system = commands::open_system(config.as_deref())?;

    match command {
        Commands::Ingest { path, doc_id } => {
            commands::ingest::run(&system, &path, doc_id.as_deref()).await?;
        }
        Commands::Ask {
            query,
            stream,
            k,
            max_iterations,
            json,
        } => {
            let args = AskArgs {
                stream,
                json,
                options: AskOptions {
                    top_k: k,
                    max_iterations,
                },
            };
            commands::ask::run(&system, &query, args).await?;
        }
        Commands::Search { query, k } => {
            commands::search::run(&system, &query, k).await?;
        }
        Commands::Docs => {
            commands::docs::list(&system).await?;
        }
        Commands::Status { json } => {
            commands::status::run(&system, json).await?;
        }
        Commands::Delete { doc_id } => {
            commands::docs::delete(&system, &doc_id).await?;
        }
        Commands::Sync { sources } => {
            commands::sync::run(&system, &sources).await?;
        }
    }

    Ok(())
}
