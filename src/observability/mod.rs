//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All stages produce:
//!     → tracing events (structured fields: target_id, batch, stage)
//!     → metrics.rs (counters, gauges, histograms)
//!     → pipeline::stats (worker-local progress counters)
//!
//! Consumers:
//!     → logging.rs subscriber (stdout)
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! # Design Decisions
//! - Structured logging for machine parsing
//! - Metrics are cheap; recording without an installed exporter is a no-op
//! - Unknown probe errors log at warn so operators can find them

pub mod logging;
pub mod metrics;
