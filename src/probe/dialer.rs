//! Dial/ping collaborator contract.
//!
//! The pool depends only on these traits; handshake details belong to the
//! implementation (see `tcp.rs`, or a scripted dialer in tests).

use async_trait::async_trait;
use thiserror::Error;

use crate::target::TargetId;

/// Errors surfaced by a dialer or an open connection.
#[derive(Debug, Error)]
pub enum DialError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The peer authenticated as someone other than the expected target.
    #[error("identity mismatch: expected {expected}, peer presented {actual}")]
    IdentityMismatch { expected: TargetId, actual: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Anything else; classified by message signature.
    #[error("{0}")]
    Other(String),
}

/// An open connection to a target.
#[async_trait]
pub trait Connection: Send {
    /// One liveness round-trip.
    async fn ping(&mut self) -> Result<(), DialError>;

    /// Release the connection.
    async fn close(&mut self) -> Result<(), DialError>;
}

/// Opens connections to targets, authenticating their identity where the
/// transport supports it.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, address: &str, identity: &TargetId) -> Result<Box<dyn Connection>, DialError>;
}
