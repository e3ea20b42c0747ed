//! Probe failure classification.
//!
//! # Design Decisions
//! - Classification is a closed set of well-known signatures
//! - Anything unrecognised is `Unknown`: still an outcome, never a crash

use std::fmt;
use std::io::ErrorKind;
use std::time::Duration;

use thiserror::Error;

use crate::probe::dialer::DialError;
use crate::target::ErrorClass;

/// Which part of a probe was running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbePhase {
    Dial,
    Ping,
}

impl fmt::Display for ProbePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbePhase::Dial => f.write_str("dial"),
            ProbePhase::Ping => f.write_str("ping"),
        }
    }
}

/// Why a single probe failed. Always converted into an outcome.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("dial failed: {0}")]
    Dial(#[source] DialError),

    #[error("ping failed: {0}")]
    Ping(#[source] DialError),

    #[error("{phase} deadline exceeded after {}ms", .after.as_millis())]
    DeadlineExceeded { phase: ProbePhase, after: Duration },

    #[error("probing disabled for target")]
    Disabled,
}

const MISMATCH_SIGNATURES: &[&str] = &[
    "identity mismatch",
    "peer id mismatch",
    "unexpected peer",
    "protocol error",
    "unsupported protocol",
    "wrong version",
];

const TRANSIENT_SIGNATURES: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "broken pipe",
    "timed out",
    "timeout",
    "deadline exceeded",
    "no route to host",
    "network is unreachable",
    "host is unreachable",
    "unexpected eof",
    "early eof",
    "tls handshake",
    "handshake failed",
    "failed to lookup address",
    "temporary failure in name resolution",
];

/// Classify a probe failure.
pub fn classify(err: &ProbeError) -> ErrorClass {
    match err {
        ProbeError::DeadlineExceeded { .. } => ErrorClass::TransientNetwork,
        ProbeError::Disabled => ErrorClass::Fatal,
        ProbeError::Dial(e) | ProbeError::Ping(e) => classify_dial(e),
    }
}

fn classify_dial(err: &DialError) -> ErrorClass {
    match err {
        DialError::IdentityMismatch { .. } | DialError::Protocol(_) => ErrorClass::ProtocolMismatch,
        DialError::InvalidAddress(_) => ErrorClass::Fatal,
        DialError::Io(io) => match io.kind() {
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof => ErrorClass::TransientNetwork,
            _ => match_signature(&io.to_string()),
        },
        DialError::Other(message) => match_signature(message),
    }
}

/// Match a free-form error message against the known signatures.
pub fn match_signature(message: &str) -> ErrorClass {
    let lower = message.to_ascii_lowercase();
    if MISMATCH_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        ErrorClass::ProtocolMismatch
    } else if TRANSIENT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        ErrorClass::TransientNetwork
    } else {
        ErrorClass::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetId;
    use std::io;

    #[test]
    fn io_kinds_are_transient() {
        for kind in [ErrorKind::ConnectionRefused, ErrorKind::ConnectionReset, ErrorKind::TimedOut] {
            let err = ProbeError::Dial(DialError::Io(io::Error::from(kind)));
            assert_eq!(classify(&err), ErrorClass::TransientNetwork, "{kind:?}");
        }
    }

    #[test]
    fn deadline_is_transient() {
        let err = ProbeError::DeadlineExceeded {
            phase: ProbePhase::Dial,
            after: Duration::from_secs(5),
        };
        assert_eq!(classify(&err), ErrorClass::TransientNetwork);
        assert_eq!(err.to_string(), "dial deadline exceeded after 5000ms");
    }

    #[test]
    fn identity_mismatch_is_protocol_mismatch() {
        let err = ProbeError::Dial(DialError::IdentityMismatch {
            expected: TargetId::from_bytes([1; 32]),
            actual: "beef".into(),
        });
        assert_eq!(classify(&err), ErrorClass::ProtocolMismatch);
    }

    #[test]
    fn signatures_in_free_text() {
        assert_eq!(match_signature("remote: TLS handshake eof"), ErrorClass::TransientNetwork);
        assert_eq!(match_signature("Peer ID mismatch for dialed node"), ErrorClass::ProtocolMismatch);
        assert_eq!(match_signature("the flux capacitor melted"), ErrorClass::Unknown);
    }

    #[test]
    fn unknown_io_falls_back_to_message() {
        let err = ProbeError::Ping(DialError::Io(io::Error::new(ErrorKind::Other, "weird kernel state")));
        assert_eq!(classify(&err), ErrorClass::Unknown);

        let err = ProbeError::Ping(DialError::Io(io::Error::new(ErrorKind::Other, "no route to host")));
        assert_eq!(classify(&err), ErrorClass::TransientNetwork);
    }

    #[test]
    fn disabled_and_bad_address_are_fatal() {
        assert_eq!(classify(&ProbeError::Disabled), ErrorClass::Fatal);
        let err = ProbeError::Dial(DialError::InvalidAddress("nope".into()));
        assert_eq!(classify(&err), ErrorClass::Fatal);
    }
}
