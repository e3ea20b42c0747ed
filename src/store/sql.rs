//! Durable store on a local libSQL (SQLite) database.
//!
//! # Responsibilities
//! - Own the schema: `targets` plus `daily_history` keyed by
//!   (target, owner, day) with the 1440 slots as one little-endian BLOB
//! - Claim stale targets under `BEGIN IMMEDIATE`
//! - Apply an outcome batch in one transaction, rolled back on any row error
//!
//! # Design Decisions
//! - One connection per store behind a tokio mutex; other processes sharing
//!   the file are serialized by SQLite's write lock and wait on busy_timeout
//! - Timestamps are stored as unix milliseconds
//! - A slot BLOB of the wrong length is reported as corrupt, never patched

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use libsql::{params, Builder, Connection, Database, Row};
use tokio::sync::Mutex;

use crate::history::{DailyHistory, HistoryKey};
use crate::store::types::{BatchReport, OutcomeRecord, StoreError, StoreResult};
use crate::store::{HistoryReader, Lease, OutcomeStore};
use crate::target::types::TARGET_ID_LEN;
use crate::target::{OwnerId, ProbeMode, Target, TargetId};

const SCHEMA_VERSION: i64 = 1;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TARGET_COLUMNS: &str =
    "id, address, mode, last_claimed_at, last_success_at, last_latency_ms, last_probe_ok";

impl From<libsql::Error> for StoreError {
    fn from(e: libsql::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// A backing store persisted in a libSQL database file.
pub struct SqlStore {
    conn: Mutex<Connection>,
    // the connection borrows the database's underlying handle
    _db: Database,
}

impl SqlStore {
    /// Open (or create) the database at `path` and bring its schema up to date.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        let db = Builder::new_local(path).build().await?;
        let conn = db.connect()?;

        let mut rows = conn
            .query(&format!("PRAGMA busy_timeout = {}", BUSY_TIMEOUT.as_millis()), ())
            .await?;
        rows.next().await?;
        drop(rows);

        run_migrations(&conn).await?;
        tracing::info!(path = %path.display(), "Store opened");

        Ok(Self {
            conn: Mutex::new(conn),
            _db: db,
        })
    }

    /// Insert configured targets, or refresh address and mode of existing
    /// ones. Claim times, liveness metadata and history are kept.
    pub async fn upsert_targets(&self, targets: &[Target]) -> StoreResult<usize> {
        let conn = self.conn.lock().await;
        begin(&conn).await?;

        let upserted = async {
            for target in targets {
                conn.execute(
                    "INSERT INTO targets (id, address, mode) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET address = excluded.address, mode = excluded.mode",
                    params![
                        target.id.as_bytes().to_vec(),
                        target.address.clone(),
                        target.mode.as_str()
                    ],
                )
                .await?;
            }
            Ok::<_, StoreError>(targets.len())
        }
        .await;

        finish(&conn, upserted).await
    }

    pub async fn target(&self, id: &TargetId) -> StoreResult<Option<Target>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!("SELECT {TARGET_COLUMNS} FROM targets WHERE id = ?1"),
                params![id.as_bytes().to_vec()],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(target_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl Lease for SqlStore {
    async fn try_claim_batch(&self, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<Target>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock().await;
        begin(&conn).await?;
        let claimed = claim(&conn, limit, now).await;
        finish(&conn, claimed).await
    }
}

#[async_trait]
impl OutcomeStore for SqlStore {
    async fn record_batch(&self, records: &[OutcomeRecord]) -> StoreResult<BatchReport> {
        if records.is_empty() {
            return Ok(BatchReport::default());
        }

        let conn = self.conn.lock().await;
        begin(&conn).await?;

        let mut report = BatchReport::default();
        let mut applied = Ok(());
        for (row, record) in records.iter().enumerate() {
            if let Err(e) = apply_record(&conn, record, &mut report).await {
                applied = Err(match e {
                    StoreError::Unavailable(reason) => StoreError::RowFailed {
                        row,
                        target: record.outcome.target_id,
                        reason,
                    },
                    other => other,
                });
                break;
            }
        }

        finish(&conn, applied.map(|()| report)).await
    }
}

#[async_trait]
impl HistoryReader for SqlStore {
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

        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT day, slots FROM daily_history
                 WHERE target_id = ?1 AND owner_id = ?2 AND day BETWEEN ?3 AND ?4
                 ORDER BY day",
                params![
                    target.as_bytes().to_vec(),
                    owner.to_string(),
                    from.to_string(),
                    to.to_string()
                ],
            )
            .await?;

        let mut history = Vec::new();
        while let Some(row) = rows.next().await? {
            let day: String = row.get(0)?;
            let date = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                .map_err(|e| StoreError::Corrupt(format!("history day '{day}': {e}")))?;
            let blob: Vec<u8> = row.get(1)?;
            history.push(decode_slots(HistoryKey { target, owner, date }, &blob)?);
        }
        Ok(history)
    }
}

async fn run_migrations(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL,
            description TEXT
        )",
        (),
    )
    .await?;

    let current = current_version(conn).await?;
    if current >= SCHEMA_VERSION {
        tracing::debug!(version = current, "Store schema is up to date");
        return Ok(());
    }

    if current < 1 {
        migrate_v1(conn).await?;
        record_migration(conn, 1, "targets and daily history").await?;
    }
    Ok(())
}

async fn current_version(conn: &Connection) -> StoreResult<i64> {
    let mut rows = conn.query("SELECT MAX(version) FROM schema_migrations", ()).await?;
    match rows.next().await? {
        Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or(0)),
        None => Ok(0),
    }
}

async fn record_migration(conn: &Connection, version: i64, description: &str) -> StoreResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at, description) VALUES (?1, ?2, ?3)",
        params![version, Utc::now().timestamp(), description],
    )
    .await?;
    tracing::info!(version, description, "Applied store migration");
    Ok(())
}

async fn migrate_v1(conn: &Connection) -> StoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS targets (
            id BLOB PRIMARY KEY,
            address TEXT NOT NULL,
            mode TEXT NOT NULL,
            last_claimed_at INTEGER,
            last_success_at INTEGER,
            last_latency_ms INTEGER,
            last_probe_ok INTEGER
        )",
        (),
    )
    .await?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_targets_last_claimed ON targets (last_claimed_at)",
        (),
    )
    .await?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS daily_history (
            target_id BLOB NOT NULL,
            owner_id TEXT NOT NULL,
            day TEXT NOT NULL,
            slots BLOB NOT NULL,
            PRIMARY KEY (target_id, owner_id, day)
        )",
        (),
    )
    .await?;
    Ok(())
}

async fn begin(conn: &Connection) -> StoreResult<()> {
    conn.execute("BEGIN IMMEDIATE", ()).await?;
    Ok(())
}

/// Commit on success, roll back otherwise. The caller's error wins over a
/// failed rollback.
async fn finish<T>(conn: &Connection, result: StoreResult<T>) -> StoreResult<T> {
    match result {
        Ok(value) => match conn.execute("COMMIT", ()).await {
            Ok(_) => Ok(value),
            Err(e) => {
                rollback(conn).await;
                Err(e.into())
            }
        },
        Err(e) => {
            rollback(conn).await;
            Err(e)
        }
    }
}

async fn rollback(conn: &Connection) {
    if let Err(e) = conn.execute("ROLLBACK", ()).await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

async fn claim(conn: &Connection, limit: usize, now: DateTime<Utc>) -> StoreResult<Vec<Target>> {
    let stamp = now.timestamp_millis();
    let now = from_millis(stamp)?;

    let mut rows = conn
        .query(
            &format!(
                "SELECT {TARGET_COLUMNS} FROM targets
                 WHERE mode != 'off'
                 ORDER BY last_claimed_at IS NOT NULL, last_claimed_at, id
                 LIMIT ?1"
            ),
            params![limit as i64],
        )
        .await?;
    let mut claimed = Vec::with_capacity(limit);
    while let Some(row) = rows.next().await? {
        claimed.push(target_from_row(&row)?);
    }
    drop(rows);

    for target in &mut claimed {
        conn.execute(
            "UPDATE targets SET last_claimed_at = ?1 WHERE id = ?2",
            params![stamp, target.id.as_bytes().to_vec()],
        )
        .await?;
        target.last_claimed_at = Some(now);
    }
    Ok(claimed)
}

async fn apply_record(conn: &Connection, record: &OutcomeRecord, report: &mut BatchReport) -> StoreResult<()> {
    let outcome = &record.outcome;
    let id = outcome.target_id.as_bytes().to_vec();

    let updated = if outcome.is_success() {
        conn.execute(
            "UPDATE targets SET last_probe_ok = 1, last_success_at = ?1, last_latency_ms = ?2 WHERE id = ?3",
            params![outcome.captured_at.timestamp_millis(), outcome.latency_ms as i64, id],
        )
        .await?
    } else {
        conn.execute("UPDATE targets SET last_probe_ok = 0 WHERE id = ?1", params![id])
            .await?
    };
    if updated == 0 {
        tracing::debug!(target_id = %outcome.target_id, "Target row gone, metadata update skipped");
    } else {
        report.targets_updated += 1;
    }

    let write = &record.slot;
    let key = &write.key;
    let key_params = (key.target.as_bytes().to_vec(), key.owner.to_string(), key.date.to_string());

    let mut rows = conn
        .query(
            "SELECT slots FROM daily_history WHERE target_id = ?1 AND owner_id = ?2 AND day = ?3",
            params![key_params.0.clone(), key_params.1.clone(), key_params.2.clone()],
        )
        .await?;
    let existing = match rows.next().await? {
        Some(row) => Some(decode_slots(*key, &row.get::<Vec<u8>>(0)?)?),
        None => None,
    };
    drop(rows);

    match existing {
        Some(mut history) => {
            history.set(write.minute, write.value);
            conn.execute(
                "UPDATE daily_history SET slots = ?1 WHERE target_id = ?2 AND owner_id = ?3 AND day = ?4",
                params![encode_slots(history.slots()), key_params.0, key_params.1, key_params.2],
            )
            .await?;
            report.slots_updated += 1;
        }
        None => {
            let history = DailyHistory::with_slot(*key, write.minute, write.value);
            conn.execute(
                "INSERT INTO daily_history (target_id, owner_id, day, slots) VALUES (?1, ?2, ?3, ?4)",
                params![key_params.0, key_params.1, key_params.2, encode_slots(history.slots())],
            )
            .await?;
            report.rows_inserted += 1;
        }
    }
    Ok(())
}

fn target_from_row(row: &Row) -> StoreResult<Target> {
    let raw: Vec<u8> = row.get(0)?;
    let bytes: [u8; TARGET_ID_LEN] = raw
        .as_slice()
        .try_into()
        .map_err(|_| StoreError::Corrupt(format!("target id of {} bytes", raw.len())))?;
    let id = TargetId::from_bytes(bytes);

    let mode: String = row.get(2)?;
    let mode = match mode.as_str() {
        "off" => ProbeMode::Off,
        "dial" => ProbeMode::Dial,
        "ping" => ProbeMode::Ping,
        other => return Err(StoreError::Corrupt(format!("target {id} has mode '{other}'"))),
    };

    let mut target = Target::new(id, row.get::<String>(1)?, mode);
    target.last_claimed_at = row.get::<Option<i64>>(3)?.map(from_millis).transpose()?;
    target.last_success_at = row.get::<Option<i64>>(4)?.map(from_millis).transpose()?;
    target.last_latency_ms = row
        .get::<Option<i64>>(5)?
        .map(|ms| u32::try_from(ms).map_err(|_| StoreError::Corrupt(format!("target {id} latency {ms}"))))
        .transpose()?;
    target.last_probe_ok = row.get::<Option<i64>>(6)?.map(|ok| ok != 0);
    Ok(target)
}

fn from_millis(ms: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| StoreError::Corrupt(format!("timestamp {ms} out of range")))
}

fn encode_slots(slots: &[u16]) -> Vec<u8> {
    slots.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn decode_slots(key: HistoryKey, blob: &[u8]) -> StoreResult<DailyHistory> {
    let corrupt = || {
        StoreError::Corrupt(format!(
            "history row {}/{}/{} has a {}-byte slot blob",
            key.target,
            key.owner,
            key.date,
            blob.len()
        ))
    };
    if blob.len() % 2 != 0 {
        return Err(corrupt());
    }
    let slots = blob
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    DailyHistory::from_slots(key, slots).ok_or_else(corrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{SlotReading, SlotWrite};
    use crate::target::{ErrorClass, ProbeOutcome};
    use chrono::TimeZone;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn id(n: u8) -> TargetId {
        TargetId::from_bytes([n; 32])
    }

    fn owner() -> OwnerId {
        OwnerId(Uuid::from_u128(42))
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, 12, minute, 0).unwrap()
    }

    fn record(outcome: ProbeOutcome) -> OutcomeRecord {
        OutcomeRecord {
            slot: SlotWrite::from_outcome(owner(), &outcome),
            outcome,
        }
    }

    async fn open(dir: &TempDir) -> SqlStore {
        SqlStore::open(dir.path().join("prober.db")).await.unwrap()
    }

    async fn seeded(dir: &TempDir, n: u8) -> SqlStore {
        let store = open(dir).await;
        let targets: Vec<Target> = (1..=n)
            .map(|i| Target::new(id(i), format!("10.0.0.{i}:7777"), ProbeMode::Ping))
            .collect();
        store.upsert_targets(&targets).await.unwrap();
        store
    }

    async fn history_count(store: &SqlStore) -> i64 {
        let conn = store.conn.lock().await;
        let mut rows = conn.query("SELECT COUNT(*) FROM daily_history", ()).await.unwrap();
        rows.next().await.unwrap().unwrap().get::<i64>(0).unwrap()
    }

    #[tokio::test]
    async fn claims_never_claimed_then_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir).await;
        store
            .upsert_targets(&[
                Target::new(id(1), "a:1", ProbeMode::Dial),
                Target::new(id(2), "b:1", ProbeMode::Ping),
                Target::new(id(3), "c:1", ProbeMode::Ping),
                Target::new(id(4), "d:1", ProbeMode::Off),
            ])
            .await
            .unwrap();

        assert_eq!(store.try_claim_batch(1, at(0)).await.unwrap()[0].id, id(1));
        assert_eq!(store.try_claim_batch(1, at(30)).await.unwrap()[0].id, id(2));

        let claimed = store.try_claim_batch(10, at(45)).await.unwrap();
        let order: Vec<TargetId> = claimed.iter().map(|t| t.id).collect();
        assert_eq!(order, vec![id(3), id(1), id(2)]);
        assert!(claimed.iter().all(|t| t.last_claimed_at == Some(at(45))));
        assert_eq!(store.target(&id(4)).await.unwrap().unwrap().last_claimed_at, None);
        assert!(store.try_claim_batch(0, at(50)).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stores_sharing_a_file_claim_disjoint_targets() {
        let dir = tempfile::tempdir().unwrap();
        let first = Arc::new(seeded(&dir, 50).await);
        let second = Arc::new(open(&dir).await);

        let mut handles = Vec::new();
        for n in 0..8 {
            let store = if n % 2 == 0 { first.clone() } else { second.clone() };
            handles.push(tokio::spawn(async move { store.try_claim_batch(5, at(1)).await.unwrap() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for target in handle.await.unwrap() {
                assert!(seen.insert(target.id), "target claimed twice");
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[tokio::test]
    async fn batch_inserts_then_updates_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, 2).await;

        let first = store
            .record_batch(&[record(ProbeOutcome::success(id(1), at(0), 40))])
            .await
            .unwrap();
        assert_eq!(first.rows_inserted, 1);
        assert_eq!(first.targets_updated, 1);

        let failed = ProbeOutcome::failed(id(1), at(1), 900, ErrorClass::TransientNetwork, "reset");
        let second = store.record_batch(&[record(failed)]).await.unwrap();
        assert_eq!(second.rows_inserted, 0);
        assert_eq!(second.slots_updated, 1);
        assert_eq!(history_count(&store).await, 1);

        let day = at(0).date_naive();
        let rows = store.history_range(id(1), owner(), day, day).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].filled(), 2);
        assert_eq!(rows[0].reading(12 * 60), SlotReading::Latency { time_hint: 0, ms: 40 });
        assert_eq!(rows[0].reading(12 * 60 + 1), SlotReading::Failed { time_hint: 0 });

        // a failure leaves the last success alone
        let target = store.target(&id(1)).await.unwrap().unwrap();
        assert_eq!(target.last_probe_ok, Some(false));
        assert_eq!(target.last_success_at, Some(at(0)));
        assert_eq!(target.last_latency_ms, Some(40));
    }

    #[tokio::test]
    async fn failing_row_rolls_back_whole_batch() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, 8).await;
        store
            .conn
            .lock()
            .await
            .execute(
                &format!(
                    "CREATE TRIGGER reject_five BEFORE UPDATE OF last_probe_ok ON targets
                     WHEN NEW.id = X'{}'
                     BEGIN SELECT RAISE(ABORT, 'rejected'); END",
                    hex::encode(id(5).as_bytes())
                ),
                (),
            )
            .await
            .unwrap();

        let batch: Vec<OutcomeRecord> = (1..=8)
            .map(|n| record(ProbeOutcome::success(id(n), at(n as u32), 30)))
            .collect();
        match store.record_batch(&batch).await {
            Err(StoreError::RowFailed { row, target, .. }) => {
                assert_eq!(row, 4);
                assert_eq!(target, id(5));
            }
            other => panic!("unexpected result {other:?}"),
        }

        assert_eq!(history_count(&store).await, 0);
        for n in 1..=8 {
            let target = store.target(&id(n)).await.unwrap().unwrap();
            assert_eq!(target.last_probe_ok, None, "target {n} was written");
        }

        // the connection is usable again after the rollback
        store.record_batch(&batch[..4]).await.unwrap();
        assert_eq!(history_count(&store).await, 4);
    }

    #[tokio::test]
    async fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = seeded(&dir, 1).await;
            store.try_claim_batch(1, at(3)).await.unwrap();
            store
                .record_batch(&[record(ProbeOutcome::success(id(1), at(3), 55))])
                .await
                .unwrap();
        }

        let store = open(&dir).await;
        // reseeding refreshes the address only
        store
            .upsert_targets(&[Target::new(id(1), "10.9.9.9:7777", ProbeMode::Dial)])
            .await
            .unwrap();

        let target = store.target(&id(1)).await.unwrap().unwrap();
        assert_eq!(target.address, "10.9.9.9:7777");
        assert_eq!(target.mode, ProbeMode::Dial);
        assert_eq!(target.last_claimed_at, Some(at(3)));
        assert_eq!(target.last_latency_ms, Some(55));

        let day = at(3).date_naive();
        let rows = store.history_range(id(1), owner(), day, day).await.unwrap();
        assert_eq!(rows[0].reading(12 * 60 + 3), SlotReading::Latency { time_hint: 0, ms: 55 });
    }

    #[tokio::test]
    async fn short_slot_blob_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = seeded(&dir, 1).await;
        let day = at(0).date_naive();
        store
            .conn
            .lock()
            .await
            .execute(
                "INSERT INTO daily_history (target_id, owner_id, day, slots) VALUES (?1, ?2, ?3, ?4)",
                params![id(1).as_bytes().to_vec(), owner().to_string(), day.to_string(), vec![0u8; 10]],
            )
            .await
            .unwrap();

        let read = store.history_range(id(1), owner(), day, day).await;
        assert!(matches!(read, Err(StoreError::Corrupt(_))), "{read:?}");

        let write = store
            .record_batch(&[record(ProbeOutcome::success(id(1), at(0), 40))])
            .await;
        assert!(matches!(write, Err(StoreError::Corrupt(_))), "{write:?}");
        assert_eq!(store.target(&id(1)).await.unwrap().unwrap().last_probe_ok, None);
    }

    #[test]
    fn slot_blob_round_trips_little_endian() {
        let key = HistoryKey {
            target: id(1),
            owner: owner(),
            date: at(0).date_naive(),
        };
        let row = DailyHistory::with_slot(key, 1, 0x0102);
        let blob = encode_slots(row.slots());
        assert_eq!(blob.len(), 2880);
        assert_eq!(&blob[2..4], &[0x02, 0x01]);
        assert_eq!(decode_slots(key, &blob).unwrap(), row);
    }
}
