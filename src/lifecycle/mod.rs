//! Process lifecycle.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Validate → Open store, upsert targets → Build dialer → Start pipeline
//!
//! Shutdown (shutdown.rs):
//!     trigger() → loader stops claiming → channels close top-down → stages drain
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → supervisor.stop()
//!
//! Exit (startup.rs):
//!     Stopped → export history per target (when configured)
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then store, then the pipeline
//! - Shutdown is cooperative, stages are never aborted mid-write
//! - Export runs only after a clean stop

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::{wait_for_termination, Termination};
pub use startup::{export_history, open_store, start_pipeline, HistoryExportError};
