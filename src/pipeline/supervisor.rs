//! Pipeline ownership and fail-fast teardown.
//!
//! # Responsibilities
//! - Wire the three stages together with bounded channels
//! - Run each stage as its own task and collect its result
//! - Keep the first fatal error, tear the pipeline down top-down
//! - Publish the pipeline state for polling or blocking waits
//!
//! # Design Decisions
//! - First error wins; later errors are logged only
//! - Teardown never aborts a stage: the loader is told to stop and every
//!   later stage exits when its input closes, so no write is cut short
//! - A panicking stage is reported through the same error slot

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;

use crate::config::ProberConfig;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::pipeline::stats::{PipelineStats, StatsCollector};
use crate::pipeline::{PipelineError, ResultRecorder, Stage, StaleTargetLoader};
use crate::probe::{Dialer, ProbePool};
use crate::store::{Lease, OutcomeStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineState {
    Running,
    Draining,
    Stopped,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Stopped | PipelineState::Failed)
    }

    /// Gauge encoding.
    pub fn code(self) -> u8 {
        match self {
            PipelineState::Running => 0,
            PipelineState::Draining => 1,
            PipelineState::Stopped => 2,
            PipelineState::Failed => 3,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineState::Running => f.write_str("running"),
            PipelineState::Draining => f.write_str("draining"),
            PipelineState::Stopped => f.write_str("stopped"),
            PipelineState::Failed => f.write_str("failed"),
        }
    }
}

/// Single-slot error report shared by all stages.
#[derive(Debug, Clone, Default)]
pub struct ErrorSlot(Arc<OnceLock<PipelineError>>);

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `err` unless an earlier error is already held. Returns whether
    /// this report was the one kept.
    pub fn report(&self, stage: Stage, err: PipelineError) -> bool {
        let first = self.0.set(err.clone()).is_ok();
        if first {
            tracing::error!(%stage, error = %err, "Stage failed, stopping pipeline");
        } else {
            tracing::warn!(%stage, error = %err, "Stage failed after pipeline already failing");
        }
        first
    }

    pub fn get(&self) -> Option<&PipelineError> {
        self.0.get()
    }
}

type StageResult = (Stage, Result<(), PipelineError>);

pub struct PipelineSupervisor {
    state: Arc<watch::Sender<PipelineState>>,
    finished: watch::Receiver<bool>,
    errors: ErrorSlot,
    stats: watch::Receiver<PipelineStats>,
    shutdown: Arc<Shutdown>,
}

impl PipelineSupervisor {
    /// Build and start the pipeline. Must be called inside a Tokio runtime.
    pub fn start(
        config: &ProberConfig,
        lease: Arc<dyn Lease>,
        store: Arc<dyn OutcomeStore>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        let capacity = config.channels.capacity.max(1);
        let (target_tx, target_rx) = mpsc::channel(capacity);
        let (outcome_tx, outcome_rx) = mpsc::channel(capacity);
        let (report_tx, report_rx) = mpsc::channel(capacity * 4);

        let shutdown = Arc::new(Shutdown::new());
        let loader = StaleTargetLoader::new(lease, &config.loader);
        let pool = ProbePool::new(dialer, &config.probe);
        let recorder = ResultRecorder::new(store, &config.recorder);

        let mut stages = JoinSet::new();
        supervise(
            &mut stages,
            Stage::Loader,
            loader.run(target_tx, report_tx.clone(), shutdown.subscribe()),
        );
        supervise(
            &mut stages,
            Stage::Probe,
            pool.run(target_rx, outcome_tx, report_tx.clone()),
        );
        supervise(&mut stages, Stage::Recorder, recorder.run(outcome_rx, report_tx));

        let (collector, stats) = StatsCollector::new(report_rx, config.observability.stats_interval());
        let collector = tokio::spawn(collector.run());

        let (state, _) = watch::channel(PipelineState::Running);
        let state = Arc::new(state);
        metrics::record_pipeline_state(PipelineState::Running.code());
        let (finished_tx, finished) = watch::channel(false);
        let errors = ErrorSlot::new();

        tokio::spawn(monitor(
            stages,
            collector,
            state.clone(),
            errors.clone(),
            shutdown.clone(),
            finished_tx,
        ));

        tracing::info!(capacity, "Pipeline started");
        Self {
            state,
            finished,
            errors,
            stats,
            shutdown,
        }
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn error(&self) -> Option<PipelineError> {
        self.errors.get().cloned()
    }

    pub fn stats(&self) -> PipelineStats {
        *self.stats.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    /// Block until every stage has exited, returning the terminal state.
    pub async fn wait(&self) -> PipelineState {
        let mut finished = self.finished.clone();
        let _ = finished.wait_for(|done| *done).await;
        self.state()
    }

    /// Caller-initiated shutdown: stop claiming, let in-flight work drain.
    pub async fn stop(&self) -> PipelineState {
        let draining = self.state.send_if_modified(|state| {
            if *state == PipelineState::Running {
                *state = PipelineState::Draining;
                true
            } else {
                false
            }
        });
        if draining {
            metrics::record_pipeline_state(PipelineState::Draining.code());
            tracing::info!("Pipeline draining");
        }
        self.shutdown.trigger();
        self.wait().await
    }
}

fn supervise<F>(stages: &mut JoinSet<StageResult>, stage: Stage, fut: F)
where
    F: Future<Output = Result<(), PipelineError>> + Send + 'static,
{
    stages.spawn(async move {
        let result = match tokio::spawn(fut).await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::StageAborted {
                stage,
                reason: e.to_string(),
            }),
        };
        (stage, result)
    });
}

async fn monitor(
    mut stages: JoinSet<StageResult>,
    collector: tokio::task::JoinHandle<()>,
    state: Arc<watch::Sender<PipelineState>>,
    errors: ErrorSlot,
    shutdown: Arc<Shutdown>,
    finished: watch::Sender<bool>,
) {
    while let Some(joined) = stages.join_next().await {
        // stage panics are caught inside the wrapper
        let (stage, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!(error = %e, "Stage wrapper task failed");
                continue;
            }
        };

        match result {
            Ok(()) => tracing::info!(%stage, "Stage finished"),
            Err(err) => {
                if errors.report(stage, err) {
                    state.send_replace(PipelineState::Failed);
                    metrics::record_pipeline_state(PipelineState::Failed.code());
                }
                shutdown.trigger();
            }
        }
    }

    if let Err(e) = collector.await {
        tracing::warn!(error = %e, "Stats collector aborted");
    }

    let terminal = if errors.get().is_some() {
        PipelineState::Failed
    } else {
        PipelineState::Stopped
    };
    state.send_replace(terminal);
    metrics::record_pipeline_state(terminal.code());
    tracing::info!(state = %terminal, "Pipeline terminated");
    let _ = finished.send(true);
}
