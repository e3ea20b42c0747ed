//! Probing remote peers.
//!
//! # Data Flow
//! ```text
//! Target (from the loader channel)
//!     → pool.rs worker (shared receiver, N workers)
//!     → dialer.rs Dialer::dial (identity check) under deadline
//!     → Connection::ping under deadline (ping mode only)
//!     → Connection::close (always, once dialed)
//!     → classify.rs (error → ErrorClass)
//!     → ProbeOutcome (to the recorder channel)
//! ```
//!
//! # Design Decisions
//! - Transport sits behind the `Dialer` trait; `tcp.rs` is the default
//! - Classification prefers typed errors, falls back to message signatures
//! - Latency stops at the end of the last probe phase, before close

pub mod classify;
pub mod dialer;
pub mod pool;
pub mod tcp;

pub use classify::{classify, ProbeError, ProbePhase};
pub use dialer::{Connection, DialError, Dialer};
pub use pool::{probe_target, ProbePool};
pub use tcp::TcpDialer;
