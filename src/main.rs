use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use mnema::cli;
use mnema::config::MnemaConfig;
use mnema::memory::search::SearchSources;

#[derive(Parser)]
#[command(name = "mnema", version, about = "Temporal memory engine with decay, review, and promotion")]
struct Cli {
    /// Path to a config file (default: ~/.mnema/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show store and index statistics
    Stats,
    /// Search memories across STM and the vault
    Search {
        /// Query text
        query: Option<String>,
        /// Filter by tags (any match)
        #[arg(long)]
        tags: Vec<String>,
        /// Maximum results
        #[arg(long, default_value_t = 10)]
        limit: usize,
        /// Sources: stm, ltm, or both
        #[arg(long, default_value = "both")]
        sources: String,
    },
    /// Inspect a single memory with relations and score
    Inspect {
        /// Memory id
        id: String,
    },
    /// Garbage-collect low-scoring memories
    Gc {
        /// Preview without deleting
        #[arg(long)]
        dry_run: bool,
        /// Archive instead of deleting
        #[arg(long)]
        archive: bool,
        /// Process at most N memories
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Rewrite the JSONL files, dropping superseded lines
    Compact,
    /// Promote memories into the vault
    Promote {
        /// Specific memory id
        id: Option<String>,
        /// Detect candidates automatically
        #[arg(long)]
        auto: bool,
        /// Show what would be written without writing
        #[arg(long)]
        dry_run: bool,
        /// Promote even when criteria have not fired
        #[arg(long)]
        force: bool,
    },
    /// Re-scan the vault into the LTM index
    RefreshLtm,
    /// Run one full maintenance pass (gc + compaction + refresh)
    Maintain,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MnemaConfig::load_from(path)?,
        None => MnemaConfig::load()?,
    };

    // Log to stderr so stdout stays clean for command output.
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Stats => cli::stats::run(config),
        Command::Search {
            query,
            tags,
            limit,
            sources,
        } => {
            let sources: SearchSources = sources
                .parse()
                .map_err(|e: String| anyhow::anyhow!(e))?;
            cli::search::run(config, query, tags, limit, sources)
        }
        Command::Inspect { id } => cli::inspect::run(config, id),
        Command::Gc {
            dry_run,
            archive,
            limit,
        } => cli::maintenance::gc(config, dry_run, archive, limit),
        Command::Compact => cli::maintenance::compact(config),
        Command::Promote {
            id,
            auto,
            dry_run,
            force,
        } => cli::promote::run(config, id, auto, dry_run, force),
        Command::RefreshLtm => cli::maintenance::refresh_ltm(config),
        Command::Maintain => cli::maintenance::run_all(config),
    }
}
