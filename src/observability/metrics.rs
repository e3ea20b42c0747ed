//! Metrics collection and exposition.
//!
//! # Metrics
//! - `prober_targets_claimed_total` (counter)
//! - `prober_outcomes_total` (counter): by result and error class
//! - `prober_probe_latency_ms` (histogram): successful probes only
//! - `prober_batches_committed_total` / `prober_batch_failures_total` (counters)
//! - `prober_outcomes_recorded_total` (counter): outcomes in committed batches
//! - `prober_batch_commit_seconds` (histogram)
//! - `prober_pipeline_state` (gauge): 0=running, 1=draining, 2=stopped, 3=failed

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::target::ProbeOutcome;

/// Install the Prometheus recorder and its HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_claimed(count: usize) {
    counter!("prober_targets_claimed_total").increment(count as u64);
}

pub fn record_outcome(outcome: &ProbeOutcome) {
    match outcome.error_class() {
        None => {
            counter!("prober_outcomes_total", "result" => "ok", "class" => "none").increment(1);
            histogram!("prober_probe_latency_ms").record(outcome.latency_ms as f64);
        }
        Some(class) => {
            counter!("prober_outcomes_total", "result" => "failed", "class" => class.as_str())
                .increment(1);
        }
    }
}

pub fn record_batch_committed(size: usize, elapsed: Duration) {
    counter!("prober_batches_committed_total").increment(1);
    counter!("prober_outcomes_recorded_total").increment(size as u64);
    histogram!("prober_batch_commit_seconds").record(elapsed.as_secs_f64());
}

pub fn record_batch_failed() {
    counter!("prober_batch_failures_total").increment(1);
}

pub fn record_pipeline_state(code: u8) {
    gauge!("prober_pipeline_state").set(code as f64);
}
