//! # diary CLI
//!
//! Thin entry point: parses arguments, loads configuration, reads secrets
//! from the environment, wires the components together, and prints results.
//!
//! ## Usage
//!
//! ```bash
//! diary --config ./config/diary.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `diary sync [--days N] [--inclusive]` | Upload Drive files modified in the last N days |
//! | `diary upload <dir>` | Upload every diary file in a local directory |
//! | `diary convert <dir>` | Write a `.txt` next to each `.docx` |
//! | `diary list` | Print the Drive folder listing as JSON lines |
//! | `diary search "<query>" [-k K]` | Vector similarity search |
//! | `diary chat "<question>"` | Answer a question from the diary |
//!
//! ## Environment
//!
//! | Variable | Used by |
//! |----------|---------|
//! | `GOOGLE_DRIVE_ACCESS_TOKEN`, `DRIVE_FOLDER_ID` | `sync`, `list` |
//! | `OPENAI_API_KEY` | `sync`, `upload`, `search`, `chat` |
//! | `AZURE_SEARCH_ENDPOINT`, `AZURE_SEARCH_ADMIN_KEY` | `sync`, `upload`, `search`, `chat` |
//! | `GOOGLE_API_KEY` | `chat` |

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use diary_rag::chat::{ChatSession, GeminiChat};
use diary_rag::config::{
    self, Config, DriveCredentials, GeminiCredentials, OpenAiCredentials, SearchCredentials,
};
use diary_rag::convert::convert_directory;
use diary_rag::embedding::OpenAIEmbedder;
use diary_rag::index::AzureSearchIndex;
use diary_rag::models::SyncSummary;
use diary_rag::retry::RetryPolicy;
use diary_rag::source::{DocumentSource, DriveSource, LocalDirectorySource};
use diary_rag::sync::{SyncOrchestrator, SyncWindow};
use diary_rag::vector_client::VectorIndexClient;

/// Diary RAG: sync diary entries into a vector index and chat with them.
#[derive(Parser)]
#[command(name = "diary", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when it is absent.
    #[arg(long, global = true, default_value = "./config/diary.toml")]
    config: PathBuf,

    /// Log at debug level (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload Drive files modified inside the sync window.
    Sync {
        /// Window length in days, at least 1 (default: sync.window_days).
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        days: Option<u32>,

        /// Include files modified exactly N days ago.
        #[arg(long)]
        inclusive: bool,
    },

    /// Upload every `.txt` / `.docx` file under a local directory.
    Upload { dir: PathBuf },

    /// Convert each `.docx` in a directory to a sibling `.txt`.
    Convert { dir: PathBuf },

    /// List files in the Drive folder.
    List,

    /// Find the diary entries nearest to a query.
    Search {
        query: String,

        /// Number of results.
        #[arg(short, long, default_value_t = 3)]
        k: usize,
    },

    /// Ask a question answered from the diary.
    Chat { question: String },
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "diary_rag=debug,diary=debug,info"
    } else {
        "diary_rag=info,diary=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let load = || config::load_or_default(&cli.config);

    match cli.command {
        Commands::Sync { days, inclusive } => {
            let cfg = load()?;
            let mut window = SyncWindow::from_config(&cfg.sync);
            if let Some(days) = days {
                window.days = days;
            }
            if inclusive {
                window = window.inclusive();
            }
            let source = drive_source(&cfg)?;
            let orchestrator = SyncOrchestrator::new(source, vector_client(&cfg)?)
                .with_cancellation(cancel_on_ctrl_c());
            let summary = orchestrator.sync_recent(window).await?;
            print_summary("sync drive", &summary);
        }
        Commands::Upload { dir } => {
            let cfg = load()?;
            let source = LocalDirectorySource::new(dir.clone(), &cfg.local)?;
            let orchestrator = SyncOrchestrator::new(Arc::new(source), vector_client(&cfg)?)
                .with_cancellation(cancel_on_ctrl_c());
            let summary = orchestrator.sync_all().await?;
            print_summary(&format!("upload {}", dir.display()), &summary);
        }
        Commands::Convert { dir } => run_convert(&dir)?,
        Commands::List => {
            let cfg = load()?;
            let source = drive_source(&cfg)?;
            let mut files = source.list().await?;
            files.sort_by(|a, b| b.modified_time.cmp(&a.modified_time));
            for file in &files {
                println!("{}", serde_json::to_string(file)?);
            }
        }
        Commands::Search { query, k } => {
            let cfg = load()?;
            let client = vector_client(&cfg)?;
            let hits = client.similarity_search(&query, k).await?;
            if hits.is_empty() {
                println!("No results.");
            }
            for (i, hit) in hits.iter().enumerate() {
                println!("{}. [{:.3}] {}", i + 1, hit.score, hit.id);
                println!("    metadata: {}", hit.metadata);
                println!("    {}", snippet(&hit.content, 200));
                println!();
            }
        }
        Commands::Chat { question } => {
            let cfg = load()?;
            let client = vector_client(&cfg)?;
            let credentials = GeminiCredentials::from_env()?;
            let model = GeminiChat::new(&cfg.chat, credentials)?;
            let session = ChatSession::new(
                &client,
                &model,
                &cfg.chat,
                RetryPolicy::from_config(&cfg.retry),
            );
            let answer = session.ask(&question).await?;
            tracing::info!(sources = answer.sources.len(), "answered");
            println!("{}", answer.text);
        }
    }

    Ok(())
}

fn run_convert(dir: &Path) -> Result<()> {
    let report = convert_directory(dir)?;
    println!("convert {}", dir.display());
    println!("  converted: {}", report.converted.len());
    println!("  failed: {}", report.failed.len());
    for (path, reason) in &report.failed {
        println!("    {}: {}", path.display(), reason);
    }
    Ok(())
}

fn drive_source(cfg: &Config) -> Result<Arc<dyn DocumentSource>> {
    let credentials = DriveCredentials::from_env(&cfg.drive)?;
    let source = DriveSource::new(&cfg.drive, credentials, RetryPolicy::from_config(&cfg.retry))
        .context("Failed to set up Drive client")?;
    Ok(Arc::new(source))
}

fn vector_client(cfg: &Config) -> Result<VectorIndexClient> {
    let embedder = OpenAIEmbedder::new(&cfg.embedding, OpenAiCredentials::from_env()?)
        .context("Failed to set up embedding client")?;
    let index = AzureSearchIndex::new(&cfg.index, SearchCredentials::from_env()?)
        .context("Failed to set up search client")?;
    Ok(VectorIndexClient::new(
        Arc::new(embedder),
        Arc::new(index),
        &cfg.index,
        RetryPolicy::from_config(&cfg.retry),
    )
    .with_embedding_batch(cfg.embedding.batch_size))
}

/// A flag raised by the first Ctrl-C.
fn cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, stopping after the current file");
            let _ = tx.send(true);
        }
    });
    rx
}

fn print_summary(label: &str, summary: &SyncSummary) {
    println!("{}", label);
    println!("  considered: {}", summary.considered);
    println!("  skipped (outside window): {}", summary.skipped);
    println!("  uploaded: {}", summary.uploaded);
    println!("  failed: {}", summary.failed);
    for (id, reason) in &summary.failures {
        println!("    {}: {}", id, reason);
    }
    if summary.cancelled {
        println!("  cancelled before completion");
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
