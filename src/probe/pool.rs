//! Bounded-concurrency probe worker pool.
//!
//! # Responsibilities
//! - Spawn `concurrency` workers sharing one target receiver
//! - Dial (and ping) each target under one deadline covering the whole attempt
//! - Emit exactly one outcome per consumed target
//!
//! # Design Decisions
//! - Workers exit only when the target channel is closed and drained
//! - Every failure becomes an outcome; nothing a peer does can stop a worker
//! - The connection is closed on every path once dialed
//! - Emitting blocks when the recorder is behind (backpressure)

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::config::ProbeConfig;
use crate::observability::metrics;
use crate::pipeline::stats::{report_remaining, try_report, StageCounters, StatsReport};
use crate::pipeline::{PipelineError, Stage};
use crate::probe::classify::{classify, ProbeError, ProbePhase};
use crate::probe::dialer::{DialError, Dialer};
use crate::resilience::{with_deadline, Budget, DeadlineError};
use crate::target::{ErrorClass, ProbeMode, ProbeOutcome, Target};

/// Outcomes between opportunistic stats flushes.
const FLUSH_EVERY: u64 = 32;

/// Upper bound for closing a connection, outside the probe deadline.
const CLOSE_GRACE: Duration = Duration::from_millis(250);

type SharedTargets = Arc<Mutex<mpsc::Receiver<Target>>>;

pub struct ProbePool {
    dialer: Arc<dyn Dialer>,
    concurrency: usize,
    deadline: Duration,
}

impl ProbePool {
    pub fn new(dialer: Arc<dyn Dialer>, config: &ProbeConfig) -> Self {
        Self {
            dialer,
            concurrency: config.concurrency.max(1),
            deadline: config.timeout(),
        }
    }

    pub async fn run(
        self,
        targets: mpsc::Receiver<Target>,
        outcomes: mpsc::Sender<ProbeOutcome>,
        reports: mpsc::Sender<StatsReport>,
    ) -> Result<(), PipelineError> {
        tracing::info!(
            concurrency = self.concurrency,
            deadline_ms = self.deadline.as_millis() as u64,
            "Probe pool starting"
        );

        let shared: SharedTargets = Arc::new(Mutex::new(targets));
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency {
            workers.spawn(worker_loop(
                worker,
                shared.clone(),
                outcomes.clone(),
                reports.clone(),
                self.dialer.clone(),
                self.deadline,
            ));
        }
        drop(outcomes);
        drop(reports);

        let mut aborted = None;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Probe worker aborted");
                aborted.get_or_insert_with(|| e.to_string());
            }
        }

        tracing::info!("Probe pool drained");
        match aborted {
            Some(reason) => Err(PipelineError::StageAborted {
                stage: Stage::Probe,
                reason,
            }),
            None => Ok(()),
        }
    }
}

async fn worker_loop(
    worker: usize,
    targets: SharedTargets,
    outcomes: mpsc::Sender<ProbeOutcome>,
    reports: mpsc::Sender<StatsReport>,
    dialer: Arc<dyn Dialer>,
    deadline: Duration,
) {
    let mut counters = StageCounters::default();

    loop {
        let next = targets.lock().await.recv().await;
        let Some(target) = next else { break };

        let outcome = probe_target(dialer.as_ref(), &target, deadline).await;
        log_outcome(worker, &target, &outcome);
        metrics::record_outcome(&outcome);
        counters.observe(&outcome);

        if outcomes.send(outcome).await.is_err() {
            tracing::warn!(worker, target_id = %target.id, "Outcome channel closed, dropping outcome");
            break;
        }

        if counters.probed >= FLUSH_EVERY {
            try_report(&reports, &mut counters, StatsReport::Probed);
        }
    }

    report_remaining(&reports, counters, StatsReport::Probed).await;
    tracing::debug!(worker, "Probe worker exiting");
}

fn log_outcome(worker: usize, target: &Target, outcome: &ProbeOutcome) {
    match &outcome.failure {
        None => tracing::debug!(worker, target_id = %target.id, latency_ms = outcome.latency_ms, "Probe succeeded"),
        Some(f) if f.class == ErrorClass::Unknown => tracing::warn!(
            worker,
            target_id = %target.id,
            address = %target.address,
            error = %f.message,
            "Probe failed with unclassified error"
        ),
        Some(f) => tracing::debug!(
            worker,
            target_id = %target.id,
            class = %f.class,
            error = %f.message,
            "Probe failed"
        ),
    }
}

/// Probe one target and turn the result into an outcome.
pub async fn probe_target(dialer: &dyn Dialer, target: &Target, deadline: Duration) -> ProbeOutcome {
    let captured_at = Utc::now();
    let started = Instant::now();

    match attempt(dialer, target, deadline, started).await {
        Ok(elapsed) => ProbeOutcome::success(target.id, captured_at, millis(elapsed)),
        Err(e) => ProbeOutcome::failed(
            target.id,
            captured_at,
            millis(started.elapsed()),
            classify(&e),
            e.to_string(),
        ),
    }
}

/// Returns the time from `started` until the last phase completed.
async fn attempt(
    dialer: &dyn Dialer,
    target: &Target,
    deadline: Duration,
    started: Instant,
) -> Result<Duration, ProbeError> {
    if target.mode == ProbeMode::Off {
        return Err(ProbeError::Disabled);
    }

    let budget = Budget::start(deadline);
    let mut conn = budget
        .run(dialer.dial(&target.address, &target.id))
        .await
        .map_err(|e| phase_error(ProbePhase::Dial, e))?;

    let result = if target.mode == ProbeMode::Ping {
        budget
            .run(conn.ping())
            .await
            .map_err(|e| phase_error(ProbePhase::Ping, e))
    } else {
        Ok(())
    };
    let elapsed = started.elapsed();

    if let Err(e) = with_deadline(CLOSE_GRACE, conn.close()).await {
        tracing::trace!(target_id = %target.id, error = ?e, "Connection close failed");
    }

    result.map(|()| elapsed)
}

fn phase_error(phase: ProbePhase, err: DeadlineError<DialError>) -> ProbeError {
    match (phase, err) {
        (phase, DeadlineError::Elapsed(after)) => ProbeError::DeadlineExceeded { phase, after },
        (ProbePhase::Dial, DeadlineError::Inner(e)) => ProbeError::Dial(e),
        (ProbePhase::Ping, DeadlineError::Inner(e)) => ProbeError::Ping(e),
    }
}

fn millis(d: Duration) -> u32 {
    u32::try_from(d.as_millis()).unwrap_or(u32::MAX)
}
