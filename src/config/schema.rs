//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the prober.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::target::{OwnerId, ProbeMode, Target, TargetId};

/// Root configuration for the probe pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProberConfig {
    /// Stale target selection.
    pub loader: LoaderConfig,

    /// Probe worker pool.
    pub probe: ProbeConfig,

    /// Batched result persistence.
    pub recorder: RecorderConfig,

    /// Inter-stage channel sizing.
    pub channels: ChannelConfig,

    /// Backing database.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// History export written on clean shutdown.
    pub export: ExportConfig,

    /// Targets seeded into the store at startup.
    pub targets: Vec<TargetConfig>,
}

/// Stale target loader configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum targets claimed per transaction.
    pub batch_size: usize,

    /// Delay before claiming again when nothing was eligible, in milliseconds.
    pub idle_backoff_ms: u64,
}

impl LoaderConfig {
    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            idle_backoff_ms: 10_000,
        }
    }
}

/// Probe pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Number of concurrent probe workers.
    pub concurrency: usize,

    /// Deadline for one probe attempt (dial and ping together) in milliseconds.
    pub timeout_ms: u64,

    /// Require peers to present the expected identity on connect.
    pub verify_identity: bool,
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 16,
            timeout_ms: 5_000,
            verify_identity: true,
        }
    }
}

/// Result recorder configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Identity of this vantage point; keys every history row written.
    pub owner_id: OwnerId,

    /// Outcomes per transaction.
    pub chunk_size: usize,

    /// Flush a partial batch after this long without filling, in milliseconds.
    pub flush_interval_ms: u64,
}

impl RecorderConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            owner_id: OwnerId::default(),
            chunk_size: 16,
            flush_interval_ms: 5_000,
        }
    }
}

/// Channel capacities (backpressure).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Capacity of the target, outcome and stats channels.
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { capacity: 16 }
    }
}

/// Store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the libSQL database file. Probers sharing a file share targets.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "peer-prober.db".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level or filter directive (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,

    /// Interval between progress summaries in seconds.
    pub stats_interval_secs: u64,
}

impl ObservabilityConfig {
    pub fn stats_interval(&self) -> Duration {
        Duration::from_secs(self.stats_interval_secs)
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
            stats_interval_secs: 60,
        }
    }
}

/// History export configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory receiving one `<target>.bin` per target. Disabled when unset.
    pub path: Option<String>,

    /// Number of days (ending today) to export.
    pub days: u32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { path: None, days: 7 }
    }
}

/// A target seeded from configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TargetConfig {
    /// Hex-encoded 32-byte identity.
    pub id: TargetId,

    /// Network address (e.g., "10.0.0.5:28967").
    pub address: String,

    /// Probe mode (default: ping).
    #[serde(default)]
    pub mode: ProbeMode,
}

impl From<&TargetConfig> for Target {
    fn from(config: &TargetConfig) -> Self {
        Target::new(config.id, config.address.clone(), config.mode)
    }
}
