//! 16-bit history slot encoding.
//!
//! A slot packs a coarse sub-minute time hint and a latency bucket:
//!
//! ```text
//! value = time_hint * 2000 + bucket
//!
//! 0              no data for the minute
//! bucket 1       probe failed
//! bucket 2..1999 latency in milliseconds (clamped)
//! time_hint      second_of_minute / 4, in 0..=14
//! ```
//!
//! Latencies below 2 ms are raised to 2 and latencies of 2000 ms or more are
//! stored as 1999. The resolution loss at both ends is deliberate.

use chrono::{DateTime, Timelike, Utc};

/// Number of bucket values per time hint.
pub const BUCKET_SPAN: u16 = 2000;
/// Bucket recorded for a failed probe.
pub const FAILED_BUCKET: u16 = 1;
pub const MIN_LATENCY_MS: u16 = 2;
pub const MAX_LATENCY_MS: u16 = 1999;
pub const MAX_TIME_HINT: u8 = 14;

/// A decoded slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotReading {
    NoData,
    Failed { time_hint: u8 },
    Latency { time_hint: u8, ms: u16 },
}

/// Clamp a measured latency into the storable bucket range.
pub fn latency_bucket(latency_ms: u32) -> u16 {
    latency_ms.clamp(MIN_LATENCY_MS as u32, MAX_LATENCY_MS as u32) as u16
}

/// Derive the time hint for a capture instant.
pub fn time_hint(captured_at: &DateTime<Utc>) -> u8 {
    // 60 seconds / 4 = 15 distinct hints
    (captured_at.second() / 4).min(MAX_TIME_HINT as u32) as u8
}

/// Pack a hint and bucket into a slot value.
pub fn encode(time_hint: u8, bucket: u16) -> u16 {
    debug_assert!((FAILED_BUCKET..BUCKET_SPAN).contains(&bucket));
    let hint = time_hint.min(MAX_TIME_HINT) as u16;
    let bucket = bucket.clamp(FAILED_BUCKET, MAX_LATENCY_MS);
    hint * BUCKET_SPAN + bucket
}

/// Encode a successful probe.
pub fn encode_latency(captured_at: &DateTime<Utc>, latency_ms: u32) -> u16 {
    encode(time_hint(captured_at), latency_bucket(latency_ms))
}

/// Encode a failed probe.
pub fn encode_failure(captured_at: &DateTime<Utc>) -> u16 {
    encode(time_hint(captured_at), FAILED_BUCKET)
}

/// Unpack a slot value.
///
/// Values above the highest valid encoding are reported as `NoData`.
pub fn decode(value: u16) -> SlotReading {
    if value == 0 || value >= (MAX_TIME_HINT as u16 + 1) * BUCKET_SPAN {
        return SlotReading::NoData;
    }
    let time_hint = (value / BUCKET_SPAN) as u8;
    match value % BUCKET_SPAN {
        0 => SlotReading::NoData,
        FAILED_BUCKET => SlotReading::Failed { time_hint },
        ms => SlotReading::Latency { time_hint, ms },
    }
}
