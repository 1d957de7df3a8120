//! # DocuMind CLI (`dmind`)
//!
//! Index documents and ask questions about them.
//!
//! ## Usage
//!
//! ```bash
//! dmind --config ./documind.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `dmind index <files...>` | Extract, chunk, embed, and store a batch of files |
//! | `dmind ask "<question>"` | Answer a question with cited sources |
//! | `dmind search "<query>"` | Show the retrieved chunks without generating |
//! | `dmind summarize <file>` | Summarise one document (not indexed) |
//! | `dmind status` | Entry count, indexed documents, backend health |
//! | `dmind check` | Probe the generation backend (exit 1 when unhealthy) |
//! | `dmind reset` | Delete every indexed document |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use documind::bridge::SubprocessBridge;
use documind::config::{self, Config};
use documind::embedding::create_embedder;
use documind::extract::extract;
use documind::ingest::{read_source, FileOutcome, Indexer};
use documind::query::QueryOrchestrator;
use documind::sqlite_index::SqliteVectorIndex;
use documind_core::bridge::GenerationBridge;
use documind_core::models::Query;
use documind_core::prompt::excerpt;
use documind_core::store::VectorIndex;

/// DocuMind: question answering over your own documents.
#[derive(Parser)]
#[command(
    name = "dmind",
    about = "DocuMind: ask questions about your documents and get cited answers",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./documind.toml` when present, otherwise built-in
    /// defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log pipeline progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index a batch of files (plain text, PDF, DOCX).
    ///
    /// Directories are walked recursively. A file that fails to extract is
    /// reported and skipped; the rest of the batch is still indexed.
    Index {
        /// Files or directories to index.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        k: Option<usize>,

        /// Print the answer and citations as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Retrieve the most similar chunks without generating an answer.
    Search {
        query: String,

        /// Number of chunks to retrieve.
        #[arg(long)]
        k: Option<usize>,
    },

    /// Summarise one document with the generation backend.
    ///
    /// The file is extracted but not indexed.
    Summarize {
        /// Plain text, PDF, or DOCX file.
        file: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show index contents and generation backend health.
    Status,

    /// Probe the generation backend.
    Check,

    /// Delete all indexed data.
    Reset,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "documind=debug,info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_or_default(cli.config.as_deref())?;
    let index = Arc::new(
        SqliteVectorIndex::new(&cfg.index.dir).with_embedding_model(cfg.embedding.model_name()),
    );

    let result = run(cli.command, &cfg, index.clone()).await;
    index.close().await;
    result
}

async fn run(command: Commands, cfg: &Config, index: Arc<SqliteVectorIndex>) -> anyhow::Result<()> {
    match command {
        Commands::Index { paths } => {
            let embedder = create_embedder(&cfg.embedding)?;
            let indexer = Indexer::from_config(cfg, embedder, index);
            let report = indexer.index_paths(&paths).await?;

            for file in &report.files {
                match &file.outcome {
                    FileOutcome::Indexed { pages, chunks, .. } => {
                        println!(
                            "indexed  {}  ({} pages, {} chunks)",
                            file.filename, pages, chunks
                        );
                    }
                    FileOutcome::Failed { kind, message } => {
                        println!("failed   {}  [{}] {}", file.filename, kind, message);
                    }
                }
            }
            let stats = &report.stats;
            println!("documents: {}", stats.documents);
            println!("chunks: {}", stats.chunks);
            println!("characters: {}", stats.characters);
            println!("average chunk size: {:.1}", stats.average_chunk_size);
        }
        Commands::Ask { question, k, json } => {
            let orchestrator = orchestrator(cfg, index)?;
            let query = Query::new(question).with_k(k.unwrap_or(cfg.retrieval.k));
            let answer = orchestrator.ask(&query).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}", answer.text);
                if !answer.citations.is_empty() {
                    println!();
                    println!("Sources:");
                    for (i, c) in answer.citations.iter().enumerate() {
                        println!("  {}. {} (page {})", i + 1, c.document_name, c.page_number);
                        println!("     {}", one_line(&c.excerpt));
                    }
                }
            }
        }
        Commands::Search { query, k } => {
            let orchestrator = orchestrator(cfg, index)?;
            let query = Query::new(query).with_k(k.unwrap_or(cfg.retrieval.k));
            let context = orchestrator.retrieve(&query).await?;

            if context.is_empty() {
                println!("No results.");
            }
            for (i, item) in context.items.iter().enumerate() {
                let m = &item.metadata;
                println!(
                    "{}. [{:.3}] {} (page {}, chunk {})",
                    i + 1,
                    item.score,
                    m.document_name,
                    m.page_number,
                    m.chunk_index
                );
                println!("   {}", one_line(&excerpt(&m.text)));
            }
        }
        Commands::Summarize { file, json } => {
            let doc = read_source(&file, cfg.ingest.max_file_bytes).await?;
            let pages = extract(&doc).await?;
            let bridge = SubprocessBridge::from_settings(&cfg.generation);
            let summary = bridge
                .summarize(&doc.filename, &pages, &cfg.generation.model)
                .await?;

            if json {
                let out = serde_json::json!({
                    "document_name": doc.filename,
                    "pages": pages.len(),
                    "summary": summary,
                });
                println!("{}", serde_json::to_string_pretty(&out)?);
            } else {
                println!("{}", summary);
            }
        }
        Commands::Status => {
            let count = index.count().await?;
            let documents = index.documents().await?;
            println!("index: {}", cfg.index.dir.display());
            if let Some(event) = index.last_recovery() {
                println!("  recovered from corruption: {}", event.reason);
            }
            println!("  entries: {}", count);
            if let Some(embedding) = index.embedding().await? {
                println!(
                    "  embedding: {} ({} dims)",
                    embedding.model.as_deref().unwrap_or("unknown"),
                    embedding.dims
                );
            }
            println!("  documents: {}", documents.len());
            for doc in &documents {
                println!(
                    "    {}  ({} chunks, {} pages)",
                    doc.document_name, doc.chunks, doc.pages
                );
            }

            let bridge = SubprocessBridge::from_settings(&cfg.generation);
            let health = bridge.health_check().await;
            match health.error {
                None if health.ok => println!("generation: ok ({})", cfg.generation.model),
                error => println!(
                    "generation: unavailable ({})",
                    error.unwrap_or_else(|| "unknown".to_string())
                ),
            }
        }
        Commands::Check => {
            let bridge = SubprocessBridge::from_settings(&cfg.generation);
            let health = bridge.health_check().await;
            println!("{}", serde_json::to_string(&health)?);
            if !health.ok {
                std::process::exit(1);
            }
        }
        Commands::Reset => {
            index.reset().await?;
            println!("reset {}", cfg.index.dir.display());
        }
    }

    Ok(())
}

fn orchestrator(cfg: &Config, index: Arc<SqliteVectorIndex>) -> anyhow::Result<QueryOrchestrator> {
    let embedder = create_embedder(&cfg.embedding)?;
    let bridge = Arc::new(SubprocessBridge::from_settings(&cfg.generation));
    Ok(QueryOrchestrator::from_config(cfg, embedder, index, bridge))
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
