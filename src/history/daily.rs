//! Per-day history rows.

use chrono::{DateTime, NaiveDate, Timelike, Utc};

use crate::history::slot::{self, SlotReading};
use crate::target::{OwnerId, ProbeOutcome, TargetId};

/// One slot per minute of a UTC day.
pub const SLOTS_PER_DAY: usize = 1440;

/// Primary key of a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistoryKey {
    pub target: TargetId,
    pub owner: OwnerId,
    pub date: NaiveDate,
}

/// Minute index within the UTC day, in `0..1440`.
pub fn minute_of_day(ts: &DateTime<Utc>) -> u16 {
    (ts.hour() * 60 + ts.minute()) as u16
}

/// A fixed-length array of encoded slots for one (target, owner, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyHistory {
    key: HistoryKey,
    slots: Vec<u16>,
}

impl DailyHistory {
    /// A default-filled row with every slot set to "no data".
    pub fn empty(key: HistoryKey) -> Self {
        Self {
            key,
            slots: vec![0; SLOTS_PER_DAY],
        }
    }

    /// A fresh row carrying a single written slot.
    pub fn with_slot(key: HistoryKey, minute: u16, value: u16) -> Self {
        let mut row = Self::empty(key);
        row.set(minute, value);
        row
    }

    /// Rebuild a row from stored slots. Returns `None` unless exactly 1440 slots are given.
    pub fn from_slots(key: HistoryKey, slots: Vec<u16>) -> Option<Self> {
        (slots.len() == SLOTS_PER_DAY).then_some(Self { key, slots })
    }

    pub fn key(&self) -> &HistoryKey {
        &self.key
    }

    pub fn slots(&self) -> &[u16] {
        &self.slots
    }

    /// Overwrite the slot for `minute`. Out-of-range minutes are ignored.
    pub fn set(&mut self, minute: u16, value: u16) {
        if let Some(slot) = self.slots.get_mut(minute as usize) {
            *slot = value;
        }
    }

    pub fn get(&self, minute: u16) -> u16 {
        self.slots.get(minute as usize).copied().unwrap_or(0)
    }

    pub fn reading(&self, minute: u16) -> SlotReading {
        slot::decode(self.get(minute))
    }

    /// Number of minutes carrying data.
    pub fn filled(&self) -> usize {
        self.slots.iter().filter(|v| **v != 0).count()
    }
}

/// A single encoded slot write derived from an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotWrite {
    pub key: HistoryKey,
    pub minute: u16,
    pub value: u16,
}

impl SlotWrite {
    pub fn from_outcome(owner: OwnerId, outcome: &ProbeOutcome) -> Self {
        let ts = &outcome.captured_at;
        let value = if outcome.is_success() {
            slot::encode_latency(ts, outcome.latency_ms)
        } else {
            slot::encode_failure(ts)
        };
        Self {
            key: HistoryKey {
                target: outcome.target_id,
                owner,
                date: ts.date_naive(),
            },
            minute: minute_of_day(ts),
            value,
        }
    }
}
