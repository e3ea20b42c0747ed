//! Probe-and-record pipeline.
//!
//! # Data Flow
//! ```text
//!  ┌──────────────────┐  Target   ┌───────────┐  ProbeOutcome  ┌────────────────┐
//!  │ StaleTargetLoader│──────────▶│ ProbePool │───────────────▶│ ResultRecorder │
//!  │   (loader.rs)    │  bounded  │ N workers │    bounded     │  (recorder.rs) │
//!  └────────┬─────────┘           └─────┬─────┘                └───────┬────────┘
//!           │ claim (Lease)             │ dial/ping (Dialer)           │ batch tx (OutcomeStore)
//!           ▼                           ▼                              ▼
//!        store                     remote peers                      store
//!
//!  stats.rs: StatsReport channel ← every stage
//!  supervisor.rs: owns all stage tasks, single error slot, Running → Draining → Stopped | Failed
//! ```
//!
//! # Design Decisions
//! - All cross-stage communication is by value over bounded channels
//! - Shutdown is cooperative: the loader stops, closure propagates downstream
//! - Per-target errors become data; only store errors reach the supervisor

pub mod loader;
pub mod recorder;
pub mod stats;
pub mod supervisor;

use std::fmt;

use thiserror::Error;

use crate::store::StoreError;

pub use loader::StaleTargetLoader;
pub use recorder::ResultRecorder;
pub use stats::{PipelineStats, StageCounters, StatsReport};
pub use supervisor::{ErrorSlot, PipelineState, PipelineSupervisor};

/// Pipeline stage names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Loader,
    Probe,
    Recorder,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Loader => f.write_str("loader"),
            Stage::Probe => f.write_str("probe"),
            Stage::Recorder => f.write_str("recorder"),
        }
    }
}

/// Errors that stop the whole pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("claim failed: {0}")]
    Claim(#[source] StoreError),

    #[error("persist failed: {0}")]
    Persist(#[source] StoreError),

    #[error("{stage} stage aborted: {reason}")]
    StageAborted { stage: Stage, reason: String },
}
