//! Peer liveness prober.
//!
//! Periodically claims the stalest peers from the store, dials (and pings)
//! each one, and folds the outcome into per-minute daily history.
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                           PROBER DAEMON                              │
//!   │                                                                      │
//!   │  ┌────────────┐  targets  ┌────────────┐  outcomes  ┌────────────┐   │
//!   │  │   loader   │──────────▶│ probe pool │───────────▶│  recorder  │   │
//!   │  │ (claim tx) │           │ N workers  │            │ (batch tx) │   │
//!   │  └─────┬──────┘           └─────┬──────┘            └─────┬──────┘   │
//!   │        │                        │                         │          │
//!   │        ▼                        ▼                         ▼          │
//!   │  ┌──────────┐            remote peers              ┌────────────┐    │
//!   │  │  store   │◀─────────────────────────────────────│  history   │    │
//!   │  └──────────┘                                      │ slot codec │    │
//!   │                                                    └────────────┘    │
//!   │  ┌────────────────────────────────────────────────────────────────┐  │
//!   │  │ supervisor: error slot, Running → Draining → Stopped | Failed  │  │
//!   │  │ cross-cutting: config, observability, lifecycle, resilience    │  │
//!   │  └────────────────────────────────────────────────────────────────┘  │
//!   └──────────────────────────────────────────────────────────────────────┘
//! ```

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use uuid::Uuid;

use peer_prober::config::{load_config, validate_config, ConfigError, ProberConfig};
use peer_prober::lifecycle::{export_history, open_store, start_pipeline, wait_for_termination};
use peer_prober::observability::{logging, metrics};
use peer_prober::target::{OwnerId, TargetId};
use peer_prober::PipelineState;

#[derive(Debug, Parser)]
#[command(name = "peer-prober", version, about = "Probe peers and record liveness history")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter directive, overrides the configured level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(args.config.as_deref())?;

    logging::init_logging(args.log_level.as_deref().unwrap_or(&config.observability.log_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "peer-prober starting");

    tracing::info!(
        owner = %config.recorder.owner_id,
        targets = config.targets.len(),
        batch_size = config.loader.batch_size,
        concurrency = config.probe.concurrency,
        timeout_ms = config.probe.timeout_ms,
        chunk_size = config.recorder.chunk_size,
        store = %config.store.path,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        // validated at load time
        let addr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr)?;
    }

    let store = open_store(&config).await?;
    let supervisor = start_pipeline(&config, store.clone());

    let mut state = supervisor.subscribe_state();
    tokio::select! {
        signal = wait_for_termination() => {
            tracing::info!(%signal, "Termination requested, draining pipeline");
            supervisor.stop().await;
        }
        _ = state.wait_for(|s| *s == PipelineState::Failed) => {}
    }

    let terminal = supervisor.wait().await;
    let stats = supervisor.stats();
    tracing::info!(
        state = %terminal,
        claimed = stats.claimed,
        probed = stats.probed,
        recorded = stats.recorded,
        "Pipeline finished"
    );

    if terminal == PipelineState::Failed {
        if let Some(err) = supervisor.error() {
            tracing::error!(error = %err, "Pipeline failed");
        }
        return Ok(ExitCode::FAILURE);
    }

    if let Some(dir) = &config.export.path {
        let targets: Vec<TargetId> = config.targets.iter().map(|t| t.id).collect();
        let today = chrono::Utc::now().date_naive();
        export_history(
            store.as_ref(),
            Path::new(dir),
            config.recorder.owner_id,
            &targets,
            today,
            config.export.days,
        )
        .await?;
    }

    tracing::info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Load the file when given; otherwise run on defaults under a fresh owner id.
fn resolve_config(path: Option<&Path>) -> Result<ProberConfig, ConfigError> {
    match path {
        Some(path) => load_config(path),
        None => {
            let mut config = ProberConfig::default();
            config.recorder.owner_id = OwnerId(Uuid::new_v4());
            validate_config(&config).map_err(ConfigError::Validation)?;
            Ok(config)
        }
    }
}
