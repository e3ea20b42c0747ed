//! Target, identity and outcome types.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length in bytes of a target identity.
pub const TARGET_ID_LEN: usize = 32;

/// Fixed-length binary identity of a remote peer.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetId([u8; TARGET_ID_LEN]);

impl TargetId {
    pub const fn from_bytes(bytes: [u8; TARGET_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TARGET_ID_LEN] {
        &self.0
    }
}

/// Errors produced when parsing a hex-encoded target identity.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseTargetIdError {
    #[error("invalid hex in target id: {0}")]
    Hex(String),

    #[error("target id must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

impl FromStr for TargetId {
    type Err = ParseTargetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.trim()).map_err(|e| ParseTargetIdError::Hex(e.to_string()))?;
        let bytes: [u8; TARGET_ID_LEN] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ParseTargetIdError::Length {
                expected: TARGET_ID_LEN,
                actual: raw.len(),
            })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<String> for TargetId {
    type Error = ParseTargetIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TargetId> for String {
    fn from(id: TargetId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for TargetId {
    // Short form keeps log lines readable.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TargetId({}..)", &hex::encode(&self.0[..6]))
    }
}

/// Identity of the vantage point that owns a history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a target is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Never selected for probing.
    Off,
    /// Connection establishment only.
    Dial,
    /// Connection establishment followed by a liveness round-trip.
    #[default]
    Ping,
}

impl ProbeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeMode::Off => "off",
            ProbeMode::Dial => "dial",
            ProbeMode::Ping => "ping",
        }
    }
}

/// A remote peer being probed for reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub id: TargetId,
    pub address: String,
    pub mode: ProbeMode,
    /// When the target was last claimed for probing (`None` = never).
    pub last_claimed_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u32>,
    /// Result of the most recent recorded probe.
    pub last_probe_ok: Option<bool>,
}

impl Target {
    pub fn new(id: TargetId, address: impl Into<String>, mode: ProbeMode) -> Self {
        Self {
            id,
            address: address.into(),
            mode,
            last_claimed_at: None,
            last_success_at: None,
            last_latency_ms: None,
            last_probe_ok: None,
        }
    }
}

/// Classification of a failed probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorClass {
    /// Timeouts, resets, refusals, handshake noise.
    TransientNetwork,
    /// The peer answered but not as the expected target or protocol.
    ProtocolMismatch,
    /// The target itself is unusable (bad address, probing disabled).
    Fatal,
    /// Did not match any known signature; surfaced for investigation.
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::TransientNetwork => "transient-network",
            ErrorClass::ProtocolMismatch => "protocol-mismatch",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a probe failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeFailure {
    pub class: ErrorClass,
    pub message: String,
}

/// The result of one probe attempt, before encoding into history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub target_id: TargetId,
    pub captured_at: DateTime<Utc>,
    /// Elapsed milliseconds. Only meaningful when the probe succeeded.
    pub latency_ms: u32,
    pub failure: Option<ProbeFailure>,
}

impl ProbeOutcome {
    pub fn success(target_id: TargetId, captured_at: DateTime<Utc>, latency_ms: u32) -> Self {
        Self {
            target_id,
            captured_at,
            latency_ms,
            failure: None,
        }
    }

    pub fn failed(
        target_id: TargetId,
        captured_at: DateTime<Utc>,
        latency_ms: u32,
        class: ErrorClass,
        message: impl Into<String>,
    ) -> Self {
        Self {
            target_id,
            captured_at,
            latency_ms,
            failure: Some(ProbeFailure {
                class,
                message: message.into(),
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn error_class(&self) -> Option<ErrorClass> {
        self.failure.as_ref().map(|f| f.class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_hex_roundtrip() {
        let id = TargetId::from_bytes([0xab; TARGET_ID_LEN]);
        let text = id.to_string();
        assert_eq!(text.len(), 64);
        assert_eq!(text.parse::<TargetId>().unwrap(), id);
    }

    #[test]
    fn target_id_rejects_wrong_length() {
        let err = "abcd".parse::<TargetId>().unwrap_err();
        assert_eq!(
            err,
            ParseTargetIdError::Length {
                expected: 32,
                actual: 2
            }
        );
        assert!(matches!("zz".parse::<TargetId>(), Err(ParseTargetIdError::Hex(_))));
    }

    #[test]
    fn probe_mode_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            mode: ProbeMode,
        }
        let w: Wrapper = toml::from_str("mode = \"dial\"").unwrap();
        assert_eq!(w.mode, ProbeMode::Dial);
    }

    #[test]
    fn outcome_classification_accessors() {
        let id = TargetId::from_bytes([1; TARGET_ID_LEN]);
        let now = Utc::now();
        assert!(ProbeOutcome::success(id, now, 10).is_success());

        let failed = ProbeOutcome::failed(id, now, 0, ErrorClass::TransientNetwork, "timeout");
        assert!(!failed.is_success());
        assert_eq!(failed.error_class(), Some(ErrorClass::TransientNetwork));
        assert_eq!(ErrorClass::ProtocolMismatch.to_string(), "protocol-mismatch");
    }
}
