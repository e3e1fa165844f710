//! Contract deployer binary
//!
//! Compiles the configured contracts, reads secret keys, and runs the
//! configured pipeline for every key against one chain.

use anyhow::{Context, Result};
use clap::Parser;
use contract_deployer::artifact::{ArtifactSource, SolcArtifactSource};
use contract_deployer::chain::{ChainClient, RpcChainClient};
use contract_deployer::config::Settings;
use contract_deployer::error::DeployError;
use contract_deployer::input::read_keys;
use contract_deployer::metrics;
use contract_deployer::orchestrator::{BatchRunner, DeploymentOrchestrator, DeploymentResult, Pipeline};
use contract_deployer::report::{summarize, RunReport};

use chrono::Utc;
use ethers::utils::{format_ether, to_checksum};
use futures::StreamExt;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "contract-deployer", version, about)]
struct Cli {
    /// Configuration file; `DEPLOYER_CONFIG` or `config/default.toml` when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// File with one 0x-prefixed secret key per line; stdin when omitted
    #[arg(long)]
    keys: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    info!("Starting contract deployer v{}", env!("CARGO_PKG_VERSION"));

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path)?,
        None => Settings::load()?,
    };
    info!(
        "Loaded configuration for {} with {} pipeline steps",
        settings.chain.name,
        settings.pipeline.steps.len()
    );

    // Compilation failures abort before any account is touched
    let compiler = SolcArtifactSource::new();
    let mut artifacts = HashMap::new();
    for (contract, path) in Pipeline::sources(&settings.pipeline) {
        let source = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read contract source {:?}", path))?;
        let artifact = compiler
            .compile(&source, &contract, &settings.compiler)
            .await?;
        artifacts.insert(contract, artifact);
    }
    let pipeline = Arc::new(Pipeline::from_config(&settings.pipeline, &artifacts)?);

    let keys = match &cli.keys {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
            read_keys(BufReader::new(file))?
        }
        None => {
            eprintln!("Enter secret keys (0x + 64 hex digits), one per line; blank line to finish:");
            io::stderr().flush()?;
            read_keys(io::stdin().lock())?
        }
    };
    if keys.is_empty() {
        anyhow::bail!("No secret keys provided");
    }

    let client: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(settings.chain.clone())?);
    let orchestrator = DeploymentOrchestrator::connect(client, settings.deployer.clone()).await?;
    if let Some(expected) = settings.chain.chain_id {
        if expected != orchestrator.chain_id() {
            return Err(DeployError::Config(format!(
                "Node reports chain {} but {} is configured",
                orchestrator.chain_id(),
                expected
            ))
            .into());
        }
    }
    let chain_id = orchestrator.chain_id();

    let runner = BatchRunner::new(
        Arc::new(orchestrator),
        settings.deployer.max_concurrent_accounts,
    );

    let shutdown = runner.shutdown_handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown.trigger().await;
    });

    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    info!("Run {} processing {} accounts", run_id, keys.len());

    let results: Vec<DeploymentResult> = runner
        .run(keys, pipeline)
        .inspect(log_result)
        .collect()
        .instrument(info_span!("run", %run_id))
        .await;

    for (outcome, count) in summarize(&results) {
        info!("{}: {}", outcome, count);
    }

    if let Some(path) = &settings.report.output_path {
        RunReport::new(run_id, chain_id, started_at, &results).write_to(path)?;
        info!("Report written to {:?}", path);
    }

    if settings.metrics.enabled {
        if let Some(path) = &settings.metrics.output_path {
            metrics::write_to(path)?;
        }
    }

    info!("Contract deployer finished");
    Ok(())
}

fn log_result(result: &DeploymentResult) {
    match (&result.error, result.contract_address) {
        (None, Some(contract)) => info!(
            "{}: contract deployed at {}",
            result.account,
            to_checksum(&contract, None)
        ),
        (None, None) => info!("{}: all steps confirmed", result.account),
        (Some(DeployError::InsufficientFunds { have, need, .. }), _) => warn!(
            "{}: balance {} below required {}, skipped",
            result.account,
            format_ether(*have),
            format_ether(*need)
        ),
        (Some(e), _) => error!("{}: {}", result.account, e),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,contract_deployer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(io::stderr))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
