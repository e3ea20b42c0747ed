//! Binary history export.
//!
//! # Format
//! ```text
//! record := day_timestamp: u32 LE   (UTC midnight, Unix seconds)
//!           slots: [u16 LE; 1440]
//! file   := record*                 (ascending date order)
//! ```

use std::io::{self, Write};

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::history::daily::{DailyHistory, SLOTS_PER_DAY};

/// Size of one exported record in bytes.
pub const RECORD_LEN: usize = 4 + SLOTS_PER_DAY * 2;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("export length {0} is not a whole number of records")]
    Truncated(usize),

    #[error("date {0} cannot be represented as a 32-bit day timestamp")]
    DateOutOfRange(NaiveDate),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One parsed export record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRecord {
    pub day_timestamp: u32,
    pub slots: Vec<u16>,
}

impl ExportRecord {
    pub fn date(&self) -> Option<NaiveDate> {
        DateTime::<Utc>::from_timestamp(self.day_timestamp as i64, 0).map(|ts| ts.date_naive())
    }
}

/// UTC midnight of `date` as a 32-bit Unix timestamp.
pub fn day_timestamp(date: NaiveDate) -> Result<u32, ExportError> {
    let secs = date
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .ok_or(ExportError::DateOutOfRange(date))?;
    u32::try_from(secs).map_err(|_| ExportError::DateOutOfRange(date))
}

/// Write `rows` in ascending date order. Returns the number of records written.
pub fn write_export<W: Write>(rows: &[DailyHistory], out: &mut W) -> Result<usize, ExportError> {
    let mut ordered: Vec<&DailyHistory> = rows.iter().collect();
    ordered.sort_by_key(|row| row.key().date);

    let mut buf = Vec::with_capacity(RECORD_LEN);
    for row in &ordered {
        buf.clear();
        buf.extend_from_slice(&day_timestamp(row.key().date)?.to_le_bytes());
        for slot in row.slots() {
            buf.extend_from_slice(&slot.to_le_bytes());
        }
        out.write_all(&buf)?;
    }
    Ok(ordered.len())
}

/// Parse an export produced by [`write_export`].
pub fn read_export(bytes: &[u8]) -> Result<Vec<ExportRecord>, ExportError> {
    if bytes.len() % RECORD_LEN != 0 {
        return Err(ExportError::Truncated(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(RECORD_LEN)
        .map(|record| {
            let (head, body) = record.split_at(4);
            let day_timestamp = u32::from_le_bytes([head[0], head[1], head[2], head[3]]);
            let slots = body
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            ExportRecord { day_timestamp, slots }
        })
        .collect())
}
