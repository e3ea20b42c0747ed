//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (sizes > 0, timeouts > 0)
//! - Detect duplicate targets
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProberConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::ProberConfig;

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ProberConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.loader.batch_size == 0 {
        errors.push(ValidationError::new("loader.batch_size", "must be greater than 0"));
    }
    if config.loader.idle_backoff_ms == 0 {
        errors.push(ValidationError::new("loader.idle_backoff_ms", "must be greater than 0"));
    }
    if config.probe.concurrency == 0 {
        errors.push(ValidationError::new("probe.concurrency", "must be greater than 0"));
    }
    if config.probe.timeout_ms == 0 {
        errors.push(ValidationError::new("probe.timeout_ms", "must be greater than 0"));
    }
    if config.recorder.owner_id.is_nil() {
        errors.push(ValidationError::new("recorder.owner_id", "must be set to a non-nil UUID"));
    }
    if config.recorder.chunk_size == 0 {
        errors.push(ValidationError::new("recorder.chunk_size", "must be greater than 0"));
    }
    if config.recorder.flush_interval_ms == 0 {
        errors.push(ValidationError::new("recorder.flush_interval_ms", "must be greater than 0"));
    }
    if config.channels.capacity == 0 {
        errors.push(ValidationError::new("channels.capacity", "must be greater than 0"));
    }
    if config.store.path.trim().is_empty() {
        errors.push(ValidationError::new("store.path", "must not be empty"));
    }
    if config.observability.stats_interval_secs == 0 {
        errors.push(ValidationError::new("observability.stats_interval_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }
    if config.export.path.is_some() && config.export.days == 0 {
        errors.push(ValidationError::new("export.days", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, target) in config.targets.iter().enumerate() {
        if target.address.trim().is_empty() {
            errors.push(ValidationError::new(format!("targets[{i}].address"), "must not be empty"));
        }
        if !seen.insert(target.id) {
            errors.push(ValidationError::new(
                format!("targets[{i}].id"),
                format!("duplicate target {}", target.id),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
