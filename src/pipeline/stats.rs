//! Progress accounting.
//!
//! # Responsibilities
//! - Per-worker local counters (no shared atomics between tasks)
//! - Flush counters over a bounded reporting channel
//! - Aggregate reports, log a periodic summary, publish a snapshot
//!
//! # Design Decisions
//! - Stages report with `try_send`; a full channel just defers the report,
//!   the unreported total keeps accumulating locally
//! - Only a stage's last report on exit waits for channel space
//! - The collector exits once every reporter has dropped its sender

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::target::{ErrorClass, ProbeOutcome};

/// Counters accumulated locally by one probe worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub probed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Failures that matched no known signature.
    pub unknown: u64,
}

impl StageCounters {
    pub fn observe(&mut self, outcome: &ProbeOutcome) {
        self.probed += 1;
        match outcome.error_class() {
            None => self.succeeded += 1,
            Some(class) => {
                self.failed += 1;
                if class == ErrorClass::Unknown {
                    self.unknown += 1;
                }
            }
        }
    }
}

/// A message on the reporting channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsReport {
    Claimed(u64),
    Probed(StageCounters),
    Committed { outcomes: u64, batches: u64 },
}

/// Try to hand the unreported total in `pending` to the collector without
/// waiting. `pending` is reset only when the report was accepted.
pub fn try_report<T>(
    reports: &mpsc::Sender<StatsReport>,
    pending: &mut T,
    report: impl FnOnce(T) -> StatsReport,
) -> bool
where
    T: Copy + Default + PartialEq,
{
    if *pending == T::default() {
        return true;
    }
    match reports.try_send(report(*pending)) {
        Ok(()) => {
            *pending = T::default();
            true
        }
        Err(_) => false,
    }
}

/// Final report of a stage that is exiting. Waits for channel space.
pub async fn report_remaining<T>(
    reports: &mpsc::Sender<StatsReport>,
    pending: T,
    report: impl FnOnce(T) -> StatsReport,
) where
    T: Copy + Default + PartialEq,
{
    if pending != T::default() && reports.send(report(pending)).await.is_err() {
        tracing::debug!("Stats collector gone, final report dropped");
    }
}

/// Aggregated pipeline progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub claimed: u64,
    pub probed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub unknown: u64,
    pub recorded: u64,
    pub batches: u64,
}

impl PipelineStats {
    pub fn apply(&mut self, report: StatsReport) {
        match report {
            StatsReport::Claimed(n) => self.claimed += n,
            StatsReport::Probed(c) => {
                self.probed += c.probed;
                self.succeeded += c.succeeded;
                self.failed += c.failed;
                self.unknown += c.unknown;
            }
            StatsReport::Committed { outcomes, batches } => {
                self.recorded += outcomes;
                self.batches += batches;
            }
        }
    }
}

/// Drains the reporting channel into a [`PipelineStats`] snapshot.
pub struct StatsCollector {
    reports: mpsc::Receiver<StatsReport>,
    snapshot: watch::Sender<PipelineStats>,
    interval: Duration,
}

impl StatsCollector {
    pub fn new(
        reports: mpsc::Receiver<StatsReport>,
        interval: Duration,
    ) -> (Self, watch::Receiver<PipelineStats>) {
        let (snapshot, rx) = watch::channel(PipelineStats::default());
        (
            Self {
                reports,
                snapshot,
                interval,
            },
            rx,
        )
    }

    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        let mut totals = PipelineStats::default();
        loop {
            tokio::select! {
                report = self.reports.recv() => match report {
                    Some(report) => {
                        totals.apply(report);
                        self.snapshot.send_replace(totals);
                    }
                    None => break,
                },
                _ = ticker.tick() => log_summary(&totals),
            }
        }

        log_summary(&totals);
        tracing::debug!("Stats collector exiting");
    }
}

fn log_summary(totals: &PipelineStats) {
    tracing::info!(
        claimed = totals.claimed,
        probed = totals.probed,
        ok = totals.succeeded,
        failed = totals.failed,
        unknown = totals.unknown,
        recorded = totals.recorded,
        batches = totals.batches,
        "Pipeline progress"
    );
}
