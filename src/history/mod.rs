//! Compact per-day latency history.
//!
//! # Data Flow
//! ```text
//! ProbeOutcome
//!     → slot.rs (time hint + latency bucket → u16)
//!     → daily.rs (SlotWrite: key + minute-of-day + value)
//!     → store (update-in-place, insert default-filled row on miss)
//!
//! Reporting:
//!     store range query → export.rs ([u32 day][1440 × u16] records)
//! ```
//!
//! # Design Decisions
//! - Encoding is pure and isolated so writer and reader cannot drift
//! - A row always carries exactly 1440 slots once first touched
//! - One slot per minute; later writes overwrite

pub mod daily;
pub mod export;
pub mod slot;

pub use daily::{minute_of_day, DailyHistory, HistoryKey, SlotWrite, SLOTS_PER_DAY};
pub use slot::SlotReading;
