//! `localrag` command-line interface.
//!
//! ```text
//! localrag ingest ./data --chunk-size 1000 --chunk-overlap 200
//! localrag query "What are the Q1 2025 budget projections?" --top-k 3
//! localrag info --json
//! localrag backup ./vector_db.bak
//! ```
//!
//! Exit status is 0 on full success and 1 when any stage fails.

mod commands;
mod telemetry;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "localrag", author, version, about = "Ask questions about your documents with a local RAG pipeline")]
struct Cli {
    #[command(flatten)]
    store: StoreArgs,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true, env = "LOCALRAG_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, chunk, embed and store every document in a directory
    Ingest(IngestArgs),
    /// Answer a question from the stored documents
    Query(QueryArgs),
    /// Show collection details
    Info {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Copy the vector database into another directory
    Backup {
        /// Directory to write the copy into
        destination: PathBuf,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

/// Which embedding backend to use.
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum EmbedderKind {
    /// Local Ollama server
    Ollama,
    /// Deterministic feature hashing; no model server needed
    Hashing,
}

#[derive(Args, Debug, Clone)]
pub struct StoreArgs {
    /// Collection to read from or write to
    #[arg(long, global = true, env = "LOCALRAG_COLLECTION", default_value = "documents")]
    pub collection_name: String,

    /// Directory holding the vector database
    #[arg(long, global = true, env = "LOCALRAG_STORAGE_PATH", default_value = "./vector_db")]
    pub storage_path: PathBuf,

    /// Distance metric for new collections (cosine, l2, ip)
    #[arg(long, global = true, env = "LOCALRAG_METRIC", default_value = "cosine")]
    pub metric: String,

    #[arg(long, global = true, value_enum, env = "LOCALRAG_EMBEDDER", default_value = "ollama")]
    pub embedder: EmbedderKind,

    /// Ollama embedding model
    #[arg(long, global = true, env = "LOCALRAG_EMBEDDING_MODEL", default_value = "all-minilm")]
    pub embedding_model: String,

    /// Vector size for the hashing embedder
    #[arg(long, global = true, env = "LOCALRAG_HASHING_DIMENSIONS", default_value_t = 384)]
    pub hashing_dimensions: usize,

    /// Ollama base URL
    #[arg(long, global = true, env = "LOCALRAG_OLLAMA_URL", default_value = "http://localhost:11434")]
    pub ollama_url: String,
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    /// Directory containing documents
    #[arg(default_value = "./data", env = "LOCALRAG_DATA_DIRECTORY")]
    pub data_directory: PathBuf,

    /// Also read subdirectories
    #[arg(long)]
    pub recursive: bool,

    #[arg(long, env = "LOCALRAG_CHUNK_SIZE", default_value_t = 1000)]
    pub chunk_size: usize,

    #[arg(long, env = "LOCALRAG_CHUNK_OVERLAP", default_value_t = 200)]
    pub chunk_overlap: usize,

    #[arg(long, env = "LOCALRAG_BATCH_SIZE", default_value_t = 32)]
    pub batch_size: usize,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    /// Your question about the documents
    pub question: String,

    /// Ollama generation model
    #[arg(long, env = "LOCALRAG_MODEL", default_value = localrag::generation::DEFAULT_GENERATION_MODEL)]
    pub model_name: String,

    /// Number of chunks to retrieve
    #[arg(long, env = "LOCALRAG_TOP_K", default_value_t = 5)]
    pub top_k: usize,

    /// Character budget for the context
    #[arg(long = "max-context", env = "LOCALRAG_MAX_CONTEXT", default_value_t = 2000)]
    pub max_context_length: usize,

    /// Seconds to wait for the answer
    #[arg(long, env = "LOCALRAG_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Only use chunks whose metadata matches, e.g. `--filter file_type=.md`
    #[arg(long = "filter", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    /// Show pipeline statistics after the answer
    #[arg(long)]
    pub show_stats: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    telemetry::init(cli.log_json);

    let succeeded = match cli.command {
        Command::Ingest(args) => commands::ingest(&cli.store, args).await?,
        Command::Query(args) => commands::query(&cli.store, args).await?,
        Command::Info { json } => commands::info(&cli.store, json).await?,
        Command::Backup { destination, json } => {
            commands::backup(&cli.store, &destination, json).await?
        }
    };

    Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}
