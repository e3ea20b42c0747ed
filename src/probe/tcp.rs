//! Plain TCP dial/ping collaborator.
//!
//! # Wire behaviour
//! ```text
//! dial:  connect → (verify_identity) read 32-byte identity greeting
//! ping:  write 8-byte random nonce → read 8 bytes → must match
//! close: shutdown write half
//! ```
//!
//! No deadlines are applied here; the pool bounds every phase.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::probe::dialer::{Connection, DialError, Dialer};
use crate::target::types::TARGET_ID_LEN;
use crate::target::TargetId;

/// Length of a ping nonce.
pub const NONCE_LEN: usize = 8;

/// Dials targets over TCP.
#[derive(Debug, Clone)]
pub struct TcpDialer {
    verify_identity: bool,
}

impl TcpDialer {
    pub fn new(verify_identity: bool) -> Self {
        Self { verify_identity }
    }
}

async fn resolve(address: &str) -> Result<SocketAddr, DialError> {
    let mut addrs = tokio::net::lookup_host(address).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::InvalidInput {
            DialError::InvalidAddress(format!("{address}: {e}"))
        } else {
            DialError::Io(e)
        }
    })?;
    addrs
        .next()
        .ok_or_else(|| DialError::InvalidAddress(format!("{address}: no addresses resolved")))
}

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, address: &str, identity: &TargetId) -> Result<Box<dyn Connection>, DialError> {
        let addr = resolve(address).await?;
        let mut stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        if self.verify_identity {
            let mut greeting = [0u8; TARGET_ID_LEN];
            stream.read_exact(&mut greeting).await?;
            if &greeting != identity.as_bytes() {
                return Err(DialError::IdentityMismatch {
                    expected: *identity,
                    actual: hex::encode(greeting),
                });
            }
        }

        tracing::trace!(addr = %addr, "TCP connection established");
        Ok(Box::new(TcpConnection { stream }))
    }
}

struct TcpConnection {
    stream: TcpStream,
}

#[async_trait]
impl Connection for TcpConnection {
    async fn ping(&mut self) -> Result<(), DialError> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        self.stream.write_all(&nonce).await?;

        let mut echo = [0u8; NONCE_LEN];
        self.stream.read_exact(&mut echo).await?;
        if echo != nonce {
            return Err(DialError::Protocol("ping echo does not match nonce".into()));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DialError> {
        self.stream.shutdown().await?;
        Ok(())
    }
}
