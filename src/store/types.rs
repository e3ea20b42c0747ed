//! Store records and error definitions.

use thiserror::Error;

use crate::history::SlotWrite;
use crate::target::{ProbeOutcome, TargetId};

/// Errors raised by a backing store. Every one of them is fatal to the stage that hit it.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A transaction failed while applying one of its rows.
    #[error("transaction failed at row {row} (target {target}): {reason}")]
    RowFailed {
        row: usize,
        target: TargetId,
        reason: String,
    },

    /// Stored data violates an invariant (e.g. wrong slot count).
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One outcome together with its precomputed history slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub outcome: ProbeOutcome,
    pub slot: SlotWrite,
}

/// What a committed batch changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Target rows whose liveness metadata was written.
    pub targets_updated: usize,
    /// Slots written into existing history rows.
    pub slots_updated: usize,
    /// History rows created by the insert fallback.
    pub rows_inserted: usize,
}
