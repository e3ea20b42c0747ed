//! Probe targets and the outcomes produced for them.
//!
//! # Data Flow
//! ```text
//! store (targets table)
//!     → Target (claimed by the loader)
//!     → ProbePool dials/pings
//!     → ProbeOutcome (success | failure + ErrorClass)
//!     → ResultRecorder (metadata write-back + history slot)
//! ```
//!
//! # Design Decisions
//! - Targets are passed by value between stages; no shared mutable state
//! - Outcomes are never persisted verbatim, they are compressed into history
//! - Identity is a fixed 32-byte key, rendered as lowercase hex

pub mod types;

pub use types::{ErrorClass, OwnerId, ProbeFailure, ProbeMode, ProbeOutcome, Target, TargetId};
