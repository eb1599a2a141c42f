use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use enrichment::config::default_config_path;
use enrichment::{load_config, ClientConfig, EnrichmentJobClient, ProcessorTier};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "enrichctl",
    version,
    about = "Create, follow and cancel AI enrichment jobs",
    subcommand_required = true,
    arg_required_else_help = true
)]
struct Cli {
    /// Client config file (defaults to <config dir>/enrichment/client.json when present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Backend base URL, overriding config and environment
    #[arg(long, global = true, value_name = "URL")]
    base_url: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the processor tiers the backend offers
    Processors {
        #[arg(long)]
        json: bool,
    },
    /// Start an enrichment job on one column of an export
    Create {
        #[arg(long)]
        export: String,
        /// Name of the new column
        #[arg(long)]
        column: String,
        /// Question asked for every row
        #[arg(long)]
        prompt: String,
        /// lite, base, core, pro or ultra (backend default when omitted)
        #[arg(long)]
        processor: Option<ProcessorTier>,
        /// Follow progress until the job finishes
        #[arg(long)]
        follow: bool,
    },
    /// Show one job
    Get {
        job_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Request cancellation of a job
    Cancel { job_id: String },
    /// List the jobs of an export in backend order
    Jobs {
        export_id: String,
        /// Keep the list refreshed until interrupted
        #[arg(long)]
        watch: bool,
        #[arg(long)]
        json: bool,
    },
    /// Poll a job until it finishes
    Watch { job_id: String },
    /// Follow a job's pushed progress, polling if the stream drops
    Stream { job_id: String },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// File (explicit or default location), then `ENRICHMENT_*` variables, then `--base-url`.
fn resolve_config(cli: &Cli) -> Result<ClientConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));

    let mut config = match path {
        Some(path) => load_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    config.apply_env()?;

    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
        config.validate()?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let config = resolve_config(&cli)?;
    let client = EnrichmentJobClient::from_config(&config)?;

    match cli.command {
        Commands::Processors { json } => commands::processors(&client, json).await,
        Commands::Create {
            export,
            column,
            prompt,
            processor,
            follow,
        } => commands::create(&client, export, column, prompt, processor, follow).await,
        Commands::Get { job_id, json } => commands::get(&client, &job_id, json).await,
        Commands::Cancel { job_id } => commands::cancel(&client, &job_id).await,
        Commands::Jobs {
            export_id,
            watch,
            json,
        } => commands::jobs(&client, &export_id, watch, json).await,
        Commands::Watch { job_id } => commands::watch(&client, &job_id).await,
        Commands::Stream { job_id } => commands::stream(&client, &job_id).await,
    }
}
