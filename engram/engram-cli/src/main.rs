//! Engram CLI - operator access to the analysis memory store.
//!
//! # Usage
//!
//! ```bash
//! # Store statistics
//! engram --config engram.toml stats
//!
//! # Precedents for a new analysis
//! engram similar --subject Peru --agent fiscal_agent --context inflation=3.5
//!
//! # Learned score adjustment
//! engram suggest --subject Peru --agent fiscal_agent --score 7.0
//! ```

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use engram_memory::RetrievalStrategy;
use std::path::PathBuf;
use std::process;

#[derive(Parser)]
#[command(name = "engram")]
#[command(about = "Engram - memory and learning for scoring agents", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ENGRAM_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show store statistics
    Stats,

    /// Delete expired entries
    PurgeExpired,

    /// Find past analyses similar to a subject/agent pair
    Similar {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long)]
        agent: String,

        /// Context as key=value (repeatable)
        #[arg(long = "context", value_name = "KEY=VALUE")]
        context: Vec<String>,

        /// Maximum number of matches
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// similarity, structural, temporal, frequency, hybrid or relevance
        #[arg(long, default_value = "hybrid")]
        strategy: RetrievalStrategy,
    },

    /// Recognize scoring patterns
    Patterns {
        #[arg(short, long)]
        subject: Option<String>,

        #[arg(short, long)]
        agent: Option<String>,

        /// Only consider analyses from the last N days
        #[arg(short, long)]
        window_days: Option<i64>,

        /// Persist recognized patterns as procedural memories
        #[arg(long)]
        learn: bool,
    },

    /// Most frequent justification phrases
    Phrases {
        #[arg(short, long)]
        agent: Option<String>,

        #[arg(short, long)]
        subject: Option<String>,
    },

    /// Suggest a score adjustment learned from expert feedback
    Suggest {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long)]
        agent: String,

        /// Current score
        #[arg(long)]
        score: f64,
    },

    /// Expert consensus on one analysis
    Consensus {
        /// Analysis identifier
        analysis_id: String,
    },

    /// Delete every memory
    Clear {
        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        output::error(format!("{:#}", e));
        process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let manager = commands::open(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Stats => commands::stats(&manager).await,
        Commands::PurgeExpired => commands::purge_expired(&manager).await,
        Commands::Similar {
            subject,
            agent,
            context,
            top_k,
            strategy,
        } => commands::similar(&manager, &subject, &agent, &context, top_k, strategy).await,
        Commands::Patterns {
            subject,
            agent,
            window_days,
            learn,
        } => {
            commands::patterns(
                &manager,
                subject.as_deref(),
                agent.as_deref(),
                window_days,
                learn,
            )
            .await
        }
        Commands::Phrases { agent, subject } => {
            commands::phrases(&manager, agent.as_deref(), subject.as_deref()).await
        }
        Commands::Suggest {
            subject,
            agent,
            score,
        } => commands::suggest(&manager, &subject, &agent, score).await,
        Commands::Consensus { analysis_id } => commands::consensus(&manager, &analysis_id).await,
        Commands::Clear { yes } => commands::clear(&manager, yes).await,
    }
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    let filter = if verbose {
        EnvFilter::new("engram=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("engram=info,warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
