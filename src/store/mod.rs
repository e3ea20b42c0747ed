//! Backing store collaborators.
//!
//! # Data Flow
//! ```text
//! Lease (loader side):
//!     try_claim_batch(n)
//!     → oldest last_claimed_at first (never-claimed first of all)
//!     → mark claimed + return, atomically
//!
//! OutcomeStore (recorder side):
//!     record_batch(records)
//!     → lock target rows
//!     → write liveness metadata (last-write-wins)
//!     → update history slot in place, insert default-filled row on miss
//!     → commit all or nothing
//!
//! HistoryReader (reporting side):
//!     history_range(target, owner, from, to) → rows in date order
//! ```
//!
//! # Design Decisions
//! - The claim strategy hides behind `Lease` so row locks, optimistic
//!   versioning or an external queue can be swapped in
//! - The store is the only shared mutable resource in the pipeline
//! - `SqlStore` (libSQL file) backs the daemon; `MemoryStore` is the
//!   in-process double with fault hooks for tests

pub mod memory;
pub mod sql;
pub mod types;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::history::DailyHistory;
use crate::target::{OwnerId, Target, TargetId};

pub use memory::MemoryStore;
pub use sql::SqlStore;
pub use types::{BatchReport, OutcomeRecord, StoreError, StoreResult};

/// Exclusive, batch-wise claiming of stale targets.
#[async_trait]
pub trait Lease: Send + Sync {
    /// Claim up to `limit` targets with probing enabled, stalest first, stamping
    /// them with `now`. Either every returned target is claimed or none is.
    async fn try_claim_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<Target>>;
}

/// Transactional persistence of probe outcomes.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Apply a whole batch in one transaction.
    async fn record_batch(&self, records: &[OutcomeRecord]) -> StoreResult<BatchReport>;
}

/// Read access to history rows.
#[async_trait]
pub trait HistoryReader: Send + Sync {
    /// Touched rows for `target`/`owner` with `from <= date <= to`, ascending.
    async fn history_range(
        &self,
        target: TargetId,
        owner: OwnerId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<DailyHistory>>;
}
