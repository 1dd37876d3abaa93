//! S3 ClamAV scanner CLI.
//!
//! Runs as an AWS Lambda function handling S3 "object created"
//! notifications, or processes a saved notification file locally.

use anyhow::{Context, Result};
use clap::Parser;
use lambda_runtime::{service_fn, LambdaEvent};
use s3_clamav_scanner::{
    BatchSummary, ClamscanEngine, Config, S3Event, S3Store, ScanDeadline, ScanOrchestrator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type Orchestrator = ScanOrchestrator<S3Store, ClamscanEngine>;

/// Malware scanning for S3 uploads with ClamAV.
#[derive(Parser, Debug)]
#[command(name = "s3-clamav-scanner")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file. Environment variables override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,

    /// Process this S3 notification JSON file instead of running as a Lambda.
    #[arg(long)]
    event: Option<PathBuf>,

    /// Time budget for --event processing, in milliseconds.
    #[arg(long, default_value_t = 900_000)]
    remaining_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    if args.example_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let config = load_config(args.config.as_deref())?;

    if args.validate {
        info!("Configuration is valid");
        return Ok(());
    }

    let store = Arc::new(S3Store::from_env().await);
    let engine = ClamscanEngine::new(config.clamscan.clone(), config.limits.max_bytes);
    let orchestrator = Arc::new(ScanOrchestrator::new(&config, store, engine));

    match args.event {
        Some(path) => run_local(&orchestrator, &path, args.remaining_ms).await,
        None => run_lambda(orchestrator).await,
    }
}

/// File settings (if any) with environment overrides applied.
fn load_config(path: Option<&Path>) -> Result<Config> {
    let Some(path) = path else {
        return Config::from_env();
    };
    let mut config = Config::load(path)?;
    config.apply_env(|name| std::env::var(name).ok())?;
    config.validate()?;
    Ok(config)
}

async fn run_local(orchestrator: &Orchestrator, path: &Path, remaining_ms: u64) -> Result<()> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading event file {}", path.display()))?;
    let event: S3Event = serde_json::from_str(&content)
        .with_context(|| format!("parsing event file {}", path.display()))?;

    info!(
        event = %path.display(),
        records = event.records.len(),
        remaining_ms,
        "Processing notification from file"
    );

    let deadline = ScanDeadline::after(Duration::from_millis(remaining_ms));
    let summary = orchestrator.handle_event(&event, deadline).await;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

async fn run_lambda(orchestrator: Arc<Orchestrator>) -> Result<()> {
    info!("Starting Lambda runtime");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<S3Event>| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            let deadline = ScanDeadline::from_epoch_millis(event.context.deadline);
            let summary = orchestrator.handle_event(&event.payload, deadline).await;
            Ok::<BatchSummary, lambda_runtime::Error>(summary)
        }
    }))
    .await
    .map_err(|e| anyhow::anyhow!("lambda runtime failed: {}", e))
}
