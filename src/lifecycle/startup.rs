//! Startup orchestration and the exit-time history export.
//!
//! # Responsibilities
//! - Open the database and upsert configured targets
//! - Build the dialer and start the pipeline
//! - Write one binary history export per target on clean exit
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Export reads through `HistoryReader`, the same path a reporting job uses

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Days, NaiveDate};
use thiserror::Error;

use crate::config::ProberConfig;
use crate::history::export::{write_export, ExportError};
use crate::pipeline::PipelineSupervisor;
use crate::probe::TcpDialer;
use crate::store::{HistoryReader, Lease, OutcomeStore, SqlStore, StoreError};
use crate::target::{OwnerId, Target, TargetId};

#[derive(Debug, Error)]
pub enum HistoryExportError {
    #[error("reading history failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Encode(#[from] ExportError),

    #[error("writing {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Open the configured database and make sure every configured target has a
/// row. Rows already in the database keep their claim and liveness state.
pub async fn open_store(config: &ProberConfig) -> Result<Arc<SqlStore>, StoreError> {
    let store = SqlStore::open(&config.store.path).await?;
    let targets: Vec<Target> = config.targets.iter().map(Target::from).collect();
    let upserted = store.upsert_targets(&targets).await?;
    tracing::info!(path = %config.store.path, targets = upserted, "Store ready");
    Ok(Arc::new(store))
}

/// Start the pipeline against `store` with the TCP dialer.
pub fn start_pipeline<S>(config: &ProberConfig, store: Arc<S>) -> PipelineSupervisor
where
    S: Lease + OutcomeStore + 'static,
{
    let dialer = Arc::new(TcpDialer::new(config.probe.verify_identity));
    PipelineSupervisor::start(config, store.clone(), store, dialer)
}

/// Export the last `days` days (ending `today`) for each target into
/// `<dir>/<target hex>.bin`. Returns the number of files written.
pub async fn export_history(
    reader: &dyn HistoryReader,
    dir: &Path,
    owner: OwnerId,
    targets: &[TargetId],
    today: NaiveDate,
    days: u32,
) -> Result<usize, HistoryExportError> {
    let from = today
        .checked_sub_days(Days::new(days.saturating_sub(1) as u64))
        .unwrap_or(NaiveDate::MIN);

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| HistoryExportError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

    let mut written = 0;
    for target in targets {
        let rows = reader.history_range(*target, owner, from, today).await?;
        let mut buf = Vec::new();
        let records = write_export(&rows, &mut buf)?;

        let path = dir.join(format!("{target}.bin"));
        tokio::fs::write(&path, &buf)
            .await
            .map_err(|source| HistoryExportError::Io {
                path: path.clone(),
                source,
            })?;
        tracing::debug!(target_id = %target, records, path = %path.display(), "History exported");
        written += 1;
    }

    tracing::info!(files = written, from = %from, to = %today, dir = %dir.display(), "History export complete");
    Ok(written)
}
