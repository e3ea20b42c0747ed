//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use peer_prober::config::ProberConfig;
use peer_prober::probe::{Connection, DialError, Dialer};
use peer_prober::target::{OwnerId, ProbeMode, Target, TargetId};

pub const OWNER: OwnerId = OwnerId(Uuid::from_u128(0x5eed));

pub fn target_id(n: u8) -> TargetId {
    TargetId::from_bytes([n; 32])
}

pub fn target(n: u8, address: impl Into<String>, mode: ProbeMode) -> Target {
    Target::new(target_id(n), address, mode)
}

/// Small, fast configuration for pipeline tests.
pub fn test_config() -> ProberConfig {
    let mut config = ProberConfig::default();
    config.loader.batch_size = 4;
    config.loader.idle_backoff_ms = 20;
    config.probe.concurrency = 2;
    config.probe.timeout_ms = 1_000;
    config.recorder.owner_id = OWNER;
    config.recorder.chunk_size = 2;
    config.recorder.flush_interval_ms = 20;
    config.channels.capacity = 2;
    config.observability.stats_interval_secs = 3600;
    config
}

/// Start a peer that greets with `identity` (when given) and echoes every
/// byte it receives after `reply_delay`.
pub async fn start_echo_peer(identity: Option<TargetId>, reply_delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Some(id) = identity {
                    if socket.write_all(id.as_bytes()).await.is_err() {
                        return;
                    }
                }
                let mut buf = [0u8; 64];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            tokio::time::sleep(reply_delay).await;
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Start a peer that accepts connections and never writes anything.
pub async fn start_silent_peer() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    addr
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

/// Per-address behaviour of [`ScriptedDialer`].
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub dial_delay: Duration,
    pub ping_delay: Duration,
    pub dial_error: Option<String>,
}

/// Dialer that follows a script instead of touching the network.
#[derive(Default)]
pub struct ScriptedDialer {
    scripts: HashMap<String, Script>,
    fallback: Script,
    dials: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedDialer {
    pub fn new(fallback: Script) -> Self {
        Self {
            fallback,
            ..Self::default()
        }
    }

    pub fn with(mut self, address: &str, script: Script) -> Self {
        self.scripts.insert(address.to_string(), script);
        self
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct ScriptedConnection {
    ping_delay: Duration,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    async fn ping(&mut self) -> Result<(), DialError> {
        tokio::time::sleep(self.ping_delay).await;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), DialError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, address: &str, _identity: &TargetId) -> Result<Box<dyn Connection>, DialError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let script = self.scripts.get(address).unwrap_or(&self.fallback);
        tokio::time::sleep(script.dial_delay).await;
        if let Some(message) = &script.dial_error {
            return Err(DialError::Other(message.clone()));
        }
        Ok(Box::new(ScriptedConnection {
            ping_delay: script.ping_delay,
            closes: self.closes.clone(),
        }))
    }
}

/// Poll `check` until it holds, failing the test after `limit`.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(limit, async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {limit:?}");
}
