//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Probe phase (dial, ping):
//!     → timeouts.rs (one Budget bounds dial and ping together)
//!     → Elapsed is reported distinctly from the phase's own error
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every remote call has a deadline
//! - No immediate retries: a failed target becomes eligible again on its
//!   next staleness cycle

pub mod timeouts;

pub use timeouts::{with_deadline, Budget, DeadlineError};
