//! # Leap Assist CLI (`leap-assist`)
//!
//! ## Usage
//!
//! ```bash
//! leap-assist --config ./config/leap.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `leap-assist serve` | Start the HTTP server (with periodic repository sync) |
//! | `leap-assist index` | Build the index from `[index].source_dir` and save it |
//! | `leap-assist sync` | Run one repository sync cycle |
//! | `leap-assist search "<query>"` | Show the chunks retrieved for a query |
//! | `leap-assist chunk <file>` | Show how a source file is chunked |

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use leap_assist::chunk::chunk_source;
use leap_assist::config;
use leap_assist::embedding::OllamaEmbedder;
use leap_assist::index::{self, IndexHandle};
use leap_assist::logging;
use leap_assist::search;
use leap_assist::server;
use leap_assist::sync::{GitCli, RepoSync, SyncOutcome};

/// Leap Assist: retrieval-augmented chat for the LEAP language.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults plus environment overrides.
#[derive(Parser)]
#[command(name = "leap-assist", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/leap.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server.
    Serve,

    /// Build the index from the source directory and save it.
    Index,

    /// Fetch and fast-forward the repository; rebuild the index if HEAD moved.
    Sync,

    /// Embed a query and print the best-matching chunks.
    Search {
        query: String,

        /// Number of results (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Print the chunks produced for a source file.
    Chunk {
        file: PathBuf,

        /// Emit JSON instead of a readable listing.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init();
    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Chunk { file, json } = &cli.command {
        return print_chunks(file, *json);
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Index => {
            let embedder = OllamaEmbedder::new(&cfg.embedding)?;
            let (built, stats) = index::build(&cfg.index.source_dir, &embedder, &cfg.index).await?;
            index::save(&built, &cfg.index.path)?;
            println!(
                "Indexed {} chunks from {} files ({} reused, {} dropped) into {}",
                stats.chunks,
                stats.files,
                stats.reused,
                stats.dropped,
                cfg.index.path.display()
            );
        }
        Commands::Sync => {
            let handle = IndexHandle::new(index::load(&cfg.index.path));
            let sync = Arc::new(RepoSync::new(
                Arc::new(GitCli::from_config(&cfg.sync)),
                Arc::new(OllamaEmbedder::new(&cfg.embedding)?),
                handle,
                cfg.index.clone(),
                cfg.companion.clone(),
            ));
            let outcome = sync.sync().await;
            sync.wait_companion().await;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            if let SyncOutcome::Failed { reason } = outcome {
                anyhow::bail!("sync failed: {}", reason);
            }
        }
        Commands::Search { query, k } => {
            search::run_search(&cfg, &query, k).await?;
        }
        Commands::Chunk { .. } => unreachable!(),
    }

    Ok(())
}

fn print_chunks(file: &Path, json: bool) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let chunks = chunk_source(&content, &file.to_string_lossy());

    if json {
        println!("{}", serde_json::to_string_pretty(&chunks)?);
        return Ok(());
    }

    if chunks.is_empty() {
        println!("No chunks.");
        return Ok(());
    }
    for (i, chunk) in chunks.iter().enumerate() {
        println!("--- #{} [{}] {} lines ---", i + 1, chunk.context_label, chunk.lines);
        println!("{}", chunk.text);
    }
    Ok(())
}
