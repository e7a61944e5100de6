use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use punchup::config::Config;

mod commands;

#[derive(Parser)]
#[command(
    name = "punchup",
    version,
    about = "Comedy event aggregator: scheduled collection, batch processing and a query API",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file; falls back to PUNCHUP_* environment variables
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (pretty, json); overrides logging.format
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler, collection workers, processing pipeline and API
    Serve,

    /// Evaluate every schedule once
    Tick {
        /// Evaluate as of this RFC 3339 instant instead of now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Manage sources
    Source {
        #[command(subcommand)]
        action: SourceAction,
    },

    /// Manage SKUs
    Sku {
        #[command(subcommand)]
        action: SkuAction,
    },

    /// Manage schedules
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Manage jobs
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
}

#[derive(Subcommand)]
enum SourceAction {
    /// Register a source
    Add {
        name: String,
        /// Source website (http or https)
        website: String,
    },
}

#[derive(Subcommand)]
enum SkuAction {
    /// Register a SKU under a source
    Add {
        #[arg(long)]
        source_id: Uuid,
        name: String,
        /// full_crawl or incremental
        #[arg(long = "type", default_value = "full_crawl")]
        sku_type: String,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Create a schedule
    Add {
        #[arg(long)]
        source_id: Uuid,
        #[arg(long)]
        sku_id: Uuid,
        name: String,
        /// Cron expression with 5, 6 or 7 fields
        #[arg(long)]
        cron: Option<String>,
    },
    /// Show a schedule
    Show { id: Uuid },
}

#[derive(Subcommand)]
enum JobAction {
    /// Create a job from source and SKU names
    Add {
        #[arg(long)]
        source: String,
        #[arg(long)]
        sku: String,
        name: String,
        #[arg(long)]
        cron: Option<String>,
        /// Sitemap URL to collect; repeatable
        #[arg(long = "url")]
        urls: Vec<String>,
    },
    /// Dispatch a job and wait for it to finish
    Run { id: Uuid },
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::from_file(path)?,
        None if PathBuf::from("config.toml").exists() => {
            Config::from_file(&PathBuf::from("config.toml"))?
        }
        None => Config::from_env().context("No config file given and environment is incomplete")?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    if let Err(e) = punchup::metrics::init_metrics() {
        tracing::warn!(error = %e, "Metrics registry unavailable");
    }

    match cli.command {
        Commands::Serve => {
            tracing::info!(address = %config.bind_address(), "Starting serve command");
            commands::serve(config).await?;
        }

        Commands::Tick { at } => {
            tracing::info!(at = ?at, "Starting tick command");
            commands::tick(config, at).await?;
        }

        Commands::Source {
            action: SourceAction::Add { name, website },
        } => {
            commands::source_add(config, name, website).await?;
        }

        Commands::Sku {
            action:
                SkuAction::Add {
                    source_id,
                    name,
                    sku_type,
                },
        } => {
            commands::sku_add(config, source_id, name, &sku_type).await?;
        }

        Commands::Schedule { action } => match action {
            ScheduleAction::Add {
                source_id,
                sku_id,
                name,
                cron,
            } => commands::schedule_add(config, source_id, sku_id, name, cron).await?,
            ScheduleAction::Show { id } => commands::schedule_show(config, id).await?,
        },

        Commands::Job { action } => match action {
            JobAction::Add {
                source,
                sku,
                name,
                cron,
                urls,
            } => commands::job_add(config, source, sku, name, cron, urls).await?,
            JobAction::Run { id } => {
                tracing::info!(job_id = %id, "Starting job run command");
                commands::job_run(config, id).await?;
            }
        },
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("punchup=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("punchup={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}
