//! In-process transactional store.
//!
//! # Responsibilities
//! - Hold the targets and daily history tables
//! - Claim stale targets atomically
//! - Apply outcome batches all-or-nothing
//! - Expose hooks to stall writes or inject row failures
//!
//! # Design Decisions
//! - The table mutex stands in for row-level locks: a claim and a batch
//!   transaction never interleave
//! - Transactions stage copies of the rows they touch and swap them in on
//!   commit; dropping a transaction is a rollback

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::sync::{watch, Mutex, MutexGuard};

use crate::history::{DailyHistory, HistoryKey, SlotWrite};
use crate::store::types::{BatchReport, OutcomeRecord, StoreError, StoreResult};
use crate::store::{HistoryReader, Lease, OutcomeStore};
use crate::target::{OwnerId, ProbeMode, ProbeOutcome, Target, TargetId};

const NO_FAULT: usize = usize::MAX;

#[derive(Debug, Default)]
struct Tables {
    targets: BTreeMap<TargetId, Target>,
    history: BTreeMap<HistoryKey, DailyHistory>,
}

/// A backing store kept entirely in memory.
#[derive(Debug)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    writes_paused: watch::Sender<bool>,
    fail_at_row: AtomicUsize,
    fail_next_claim: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (writes_paused, _) = watch::channel(false);
        Self {
            tables: Mutex::new(Tables::default()),
            writes_paused,
            fail_at_row: AtomicUsize::new(NO_FAULT),
            fail_next_claim: AtomicBool::new(false),
        }
    }

    /// Insert or replace a target row.
    pub async fn insert_target(&self, target: Target) {
        self.tables.lock().await.targets.insert(target.id, target);
    }

    pub async fn seed(&self, targets: impl IntoIterator<Item = Target>) {
        let mut tables = self.tables.lock().await;
        for target in targets {
            tables.targets.insert(target.id, target);
        }
    }

    pub async fn target(&self, id: &TargetId) -> Option<Target> {
        self.tables.lock().await.targets.get(id).cloned()
    }

    pub async fn targets(&self) -> Vec<Target> {
        self.tables.lock().await.targets.values().cloned().collect()
    }

    pub async fn history(&self, key: &HistoryKey) -> Option<DailyHistory> {
        self.tables.lock().await.history.get(key).cloned()
    }

    pub async fn history_row_count(&self) -> usize {
        self.tables.lock().await.history.len()
    }

    /// Number of targets that have been claimed at least once.
    pub async fn claimed_count(&self) -> usize {
        self.tables
            .lock()
            .await
            .targets
            .values()
            .filter(|t| t.last_claimed_at.is_some())
            .count()
    }

    /// Block every subsequent batch write until [`resume_writes`](Self::resume_writes).
    pub fn pause_writes(&self) {
        self.writes_paused.send_replace(true);
    }

    pub fn resume_writes(&self) {
        self.writes_paused.send_replace(false);
    }

    /// Make the next batch transaction fail while applying row `row` (0-based).
    pub fn fail_batch_at_row(&self, row: usize) {
        self.fail_at_row.store(row, Ordering::SeqCst);
    }

    /// Make the next claim transaction fail before it marks anything.
    pub fn fail_next_claim(&self) {
        self.fail_next_claim.store(true, Ordering::SeqCst);
    }

    async fn wait_writable(&self) -> StoreResult<()> {
        let mut paused = self.writes_paused.subscribe();
        paused
            .wait_for(|paused| !*paused)
            .await
            .map(|_| ())
            .map_err(|_| StoreError::Unavailable("write gate closed".into()))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Lease for MemoryStore {
    async fn try_claim_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<Target>> {
        if self.fail_next_claim.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Unavailable("claim transaction aborted".into()));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tables = self.tables.lock().await;

        let mut eligible: Vec<&Target> = tables
            .targets
            .values()
            .filter(|t| t.mode != ProbeMode::Off)
            .collect();
        // None sorts before Some: never-claimed targets come first
        eligible.sort_by_key(|t| (t.last_claimed_at, t.id));
        let ids: Vec<TargetId> = eligible.into_iter().take(limit).map(|t| t.id).collect();

        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(target) = tables.targets.get_mut(&id) {
                target.last_claimed_at = Some(now);
                claimed.push(target.clone());
            }
        }
        Ok(claimed)
    }
}

#[async_trait]
impl OutcomeStore for MemoryStore {
    async fn record_batch(&self, records: &[OutcomeRecord]) -> StoreResult<BatchReport> {
        self.wait_writable().await?;
        let fail_at = self.fail_at_row.swap(NO_FAULT, Ordering::SeqCst);

        let mut tx = Transaction::begin(self.tables.lock().await);
        let ids: Vec<TargetId> = records.iter().map(|r| r.outcome.target_id).collect();
        tx.lock_targets(&ids);

        let mut report = BatchReport::default();
        for (row, record) in records.iter().enumerate() {
            if row == fail_at {
                return Err(StoreError::RowFailed {
                    row,
                    target: record.outcome.target_id,
                    reason: "injected fault".into(),
                });
            }

            if tx.update_target(&record.outcome) == 0 {
                tracing::debug!(target_id = %record.outcome.target_id, "Target row gone, metadata update skipped");
            } else {
                report.targets_updated += 1;
            }

            if tx.update_slot(&record.slot) == 0 {
                tx.insert_history(&record.slot);
                report.rows_inserted += 1;
            } else {
                report.slots_updated += 1;
            }
        }

        tx.commit();
        Ok(report)
    }
}

#[async_trait]
impl HistoryReader for MemoryStore {
    async fn history_range(
        &self,
        target: TargetId,
        owner: OwnerId,
        from: NaiveDate,
        to: NaiveDate,
    ) -> StoreResult<Vec<DailyHistory>> {
        if from > to {
            return Ok(Vec::new());
        }
        let lo = HistoryKey { target, owner, date: from };
        let hi = HistoryKey { target, owner, date: to };

        let tables = self.tables.lock().await;
        Ok(tables.history.range(lo..=hi).map(|(_, row)| row.clone()).collect())
    }
}

/// A batch write in progress. Dropping it without `commit` rolls back.
struct Transaction<'a> {
    tables: MutexGuard<'a, Tables>,
    targets: BTreeMap<TargetId, Target>,
    history: BTreeMap<HistoryKey, DailyHistory>,
}

impl<'a> Transaction<'a> {
    fn begin(tables: MutexGuard<'a, Tables>) -> Self {
        Self {
            tables,
            targets: BTreeMap::new(),
            history: BTreeMap::new(),
        }
    }

    /// Take the rows for `ids` into the transaction. Returns how many exist.
    fn lock_targets(&mut self, ids: &[TargetId]) -> usize {
        for id in ids {
            if let Some(target) = self.tables.targets.get(id) {
                self.targets.entry(*id).or_insert_with(|| target.clone());
            }
        }
        self.targets.len()
    }

    /// Write liveness metadata. Returns rows affected.
    fn update_target(&mut self, outcome: &ProbeOutcome) -> usize {
        let Some(target) = self.targets.get_mut(&outcome.target_id) else {
            return 0;
        };
        target.last_probe_ok = Some(outcome.is_success());
        if outcome.is_success() {
            target.last_success_at = Some(outcome.captured_at);
            target.last_latency_ms = Some(outcome.latency_ms);
        }
        1
    }

    /// Overwrite one slot of an existing row. Returns rows affected.
    fn update_slot(&mut self, write: &SlotWrite) -> usize {
        if let Some(row) = self.history.get_mut(&write.key) {
            row.set(write.minute, write.value);
            return 1;
        }
        match self.tables.history.get(&write.key) {
            Some(existing) => {
                let mut row = existing.clone();
                row.set(write.minute, write.value);
                self.history.insert(write.key, row);
                1
            }
            None => 0,
        }
    }

    fn insert_history(&mut self, write: &SlotWrite) {
        self.history.insert(
            write.key,
            DailyHistory::with_slot(write.key, write.minute, write.value),
        );
    }

    fn commit(self) {
        let Transaction {
            mut tables,
            targets,
            history,
        } = self;
        tables.targets.extend(targets);
        tables.history.extend(history);
    }
}
