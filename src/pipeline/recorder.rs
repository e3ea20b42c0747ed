//! Transactional persistence of probe outcomes.
//!
//! # Responsibilities
//! - Buffer outcomes into chunks of `chunk_size`
//! - Derive each outcome's history slot and hand the chunk to the store
//! - Flush a partial chunk when the channel goes idle or closes
//!
//! # Design Decisions
//! - One chunk is one transaction: it commits whole or not at all
//! - A failed transaction is fatal; the buffered outcomes are dropped and
//!   their targets come round again on a later cycle
//! - Replaying a chunk is harmless (same slot, same metadata)
//! - Commit counts never wait on the stats channel

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::RecorderConfig;
use crate::history::SlotWrite;
use crate::observability::metrics;
use crate::pipeline::stats::{report_remaining, try_report, StatsReport};
use crate::pipeline::PipelineError;
use crate::store::{BatchReport, OutcomeRecord, OutcomeStore};
use crate::target::{OwnerId, ProbeOutcome};

pub struct ResultRecorder {
    store: Arc<dyn OutcomeStore>,
    owner: OwnerId,
    chunk_size: usize,
    flush_interval: Duration,
}

impl ResultRecorder {
    pub fn new(store: Arc<dyn OutcomeStore>, config: &RecorderConfig) -> Self {
        Self {
            store,
            owner: config.owner_id,
            chunk_size: config.chunk_size.max(1),
            flush_interval: config.flush_interval(),
        }
    }

    /// Persist one batch of outcomes in a single transaction.
    pub async fn record(&self, outcomes: &[ProbeOutcome]) -> Result<BatchReport, PipelineError> {
        if outcomes.is_empty() {
            return Ok(BatchReport::default());
        }

        let records: Vec<OutcomeRecord> = outcomes
            .iter()
            .map(|outcome| OutcomeRecord {
                slot: SlotWrite::from_outcome(self.owner, outcome),
                outcome: outcome.clone(),
            })
            .collect();

        let started = Instant::now();
        match self.store.record_batch(&records).await {
            Ok(report) => {
                metrics::record_batch_committed(records.len(), started.elapsed());
                tracing::debug!(
                    outcomes = records.len(),
                    targets_updated = report.targets_updated,
                    slots_updated = report.slots_updated,
                    rows_inserted = report.rows_inserted,
                    "Batch committed"
                );
                Ok(report)
            }
            Err(e) => {
                metrics::record_batch_failed();
                tracing::error!(outcomes = records.len(), error = %e, "Batch rolled back");
                Err(PipelineError::Persist(e))
            }
        }
    }

    pub async fn run(
        self,
        mut outcomes: mpsc::Receiver<ProbeOutcome>,
        reports: mpsc::Sender<StatsReport>,
    ) -> Result<(), PipelineError> {
        tracing::info!(
            owner = %self.owner,
            chunk_size = self.chunk_size,
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            "Recorder starting"
        );

        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut buffer = Vec::with_capacity(self.chunk_size);
        let mut unreported = Committed::default();
        let result = self
            .drain(&mut outcomes, &reports, &mut ticker, &mut buffer, &mut unreported)
            .await;
        report_remaining(&reports, unreported, Committed::report).await;
        result
    }

    async fn drain(
        &self,
        outcomes: &mut mpsc::Receiver<ProbeOutcome>,
        reports: &mpsc::Sender<StatsReport>,
        ticker: &mut tokio::time::Interval,
        buffer: &mut Vec<ProbeOutcome>,
        unreported: &mut Committed,
    ) -> Result<(), PipelineError> {
        loop {
            tokio::select! {
                next = outcomes.recv() => match next {
                    Some(outcome) => {
                        buffer.push(outcome);
                        if buffer.len() >= self.chunk_size {
                            self.flush(buffer, unreported).await?;
                            try_report(reports, unreported, Committed::report);
                            ticker.reset();
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !buffer.is_empty() {
                        tracing::trace!(buffered = buffer.len(), "Idle flush");
                        self.flush(buffer, unreported).await?;
                    }
                    try_report(reports, unreported, Committed::report);
                }
            }
        }

        // channel closed: upstream has drained
        self.flush(buffer, unreported).await?;
        tracing::info!("Recorder drained");
        Ok(())
    }

    async fn flush(&self, buffer: &mut Vec<ProbeOutcome>, unreported: &mut Committed) -> Result<(), PipelineError> {
        if buffer.is_empty() {
            return Ok(());
        }
        self.record(buffer).await?;
        unreported.outcomes += buffer.len() as u64;
        unreported.batches += 1;
        buffer.clear();
        Ok(())
    }
}

/// Commits not yet reported to the stats collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Committed {
    outcomes: u64,
    batches: u64,
}

impl Committed {
    fn report(self) -> StatsReport {
        StatsReport::Committed {
            outcomes: self.outcomes,
            batches: self.batches,
        }
    }
}
