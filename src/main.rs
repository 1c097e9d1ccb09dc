use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vigil::config::Config;
use vigil::storage::{Database, TaxonomyRepository};
use vigil::taxonomy::TaxonomyStore;

#[derive(Parser)]
#[command(
    name = "vigil",
    version,
    about = "Security-assessment knowledge pipeline: extract, deduplicate, classify, review",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true, default_value = "vigil.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true, default_value = "text")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and seed the taxonomy
    Init,

    /// Run one document through the extraction pipeline
    Ingest {
        /// Path to the text-extracted document
        path: PathBuf,

        /// Document title (defaults to the filename)
        #[arg(short, long)]
        title: Option<String>,
    },

    /// Review staged submissions
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Run the learning feedback cycle
    Learn {
        /// Keep cycling on this interval in seconds
        #[arg(short, long)]
        watch: Option<u64>,
    },
}

#[derive(Subcommand)]
enum ReviewAction {
    /// List submissions awaiting review
    List,

    /// Approve a submission, promoting it into production
    Approve {
        /// Submission id
        id: String,

        /// Reviewer name recorded on the submission
        #[arg(short, long, default_value = "analyst")]
        reviewer: String,
    },

    /// Reject a submission, discarding its staged records
    Reject {
        /// Submission id
        id: String,

        /// Reviewer name recorded in the learning log
        #[arg(short, long, default_value = "analyst")]
        reviewer: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(Some(&cli.config))?;
    init_tracing(&cli, &config);

    match cli.command {
        Commands::Init => {
            let db = Database::open(&config.database.path)?;
            db.seed(&TaxonomyStore::seeded())?;
            println!("Database initialized at {}", config.database.path.display());
            Ok(())
        }
        Commands::Ingest { path, title } => {
            vigil::commands::ingest::run(&config, &path, title).await
        }
        Commands::Review { action } => match action {
            ReviewAction::List => vigil::commands::review::list(&config),
            ReviewAction::Approve { id, reviewer } => {
                vigil::commands::review::approve(&config, &id, &reviewer)
            }
            ReviewAction::Reject { id, reviewer } => {
                vigil::commands::review::reject(&config, &id, &reviewer)
            }
        },
        Commands::Learn { watch } => vigil::commands::learn::run(&config, watch).await,
    }
}

fn init_tracing(cli: &Cli, config: &Config) {
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("vigil={level}")));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.log_format == "json" || config.logging.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
