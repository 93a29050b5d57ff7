//! Ferry integration test harness.
//!
//! Every test runs a real `TransferListener` on a loopback port chosen by
//! the OS and talks to it over TCP or TLS. No external setup is needed:
//!
//!   cargo test --test integration
//!
//! Each test owns its server and stops it before returning.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use ferry_core::{chunk_hash, Chunk, RunningHash};
use ferry_transfer::transport::Acceptor;
use ferry_transfer::{DurableSink, TransferListener, TransferRegistry};

mod failures;
mod transfers;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const FILE1: &[u8] = b"hello peer, it is nice to meet you!!";
pub const FILE2: &[u8] = b"second set of data should be kept separate!";

/// A running receiver on 127.0.0.1.
pub struct Server {
    pub addr: SocketAddr,
    pub registry: Arc<TransferRegistry>,
    shutdown: broadcast::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

impl Server {
    pub async fn start(acceptor: Acceptor, sink: Arc<dyn DurableSink>) -> Result<Self> {
        Self::start_on("127.0.0.1:0", acceptor, sink).await
    }

    pub async fn start_on(addr: &str, acceptor: Acceptor, sink: Arc<dyn DurableSink>) -> Result<Self> {
        let registry = Arc::new(TransferRegistry::new("itest", sink));
        let (shutdown, _) = broadcast::channel(1);
        let listener = TransferListener::bind(addr, acceptor, registry.clone(), shutdown.subscribe())
            .await
            .context("failed to bind test listener")?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(listener.run());
        Ok(Self { addr, registry, shutdown, task })
    }

    /// Wait until at least `n` transfers have completed.
    pub async fn wait_for_completed(&self, n: u64) -> Result<()> {
        let mut rx = self.registry.subscribe();
        let waited = tokio::time::timeout(Duration::from_secs(10), async {
            while *rx.borrow_and_update() < n {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
        if waited.is_err() {
            bail!("timed out waiting for {n} completed transfers, have {}", self.registry.completed());
        }
        Ok(())
    }

    pub async fn stop(self) -> Result<()> {
        let _ = self.shutdown.send(());
        self.task.await.context("listener task panicked")?.context("listener failed")?;
        Ok(())
    }
}

/// Throwaway certificate and key for `localhost`, written as PEM files.
pub struct TlsMaterial {
    _dir: tempfile::TempDir,
    pub cert: PathBuf,
    pub key: PathBuf,
}

pub fn tls_material() -> Result<TlsMaterial> {
    let dir = tempfile::tempdir()?;
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let cert = dir.path().join("cert.pem");
    let key = dir.path().join("key.pem");
    std::fs::write(&cert, certified.cert.pem())?;
    std::fs::write(&key, certified.key_pair.serialize_pem())?;
    Ok(TlsMaterial { _dir: dir, cert, key })
}

/// Chunks exactly as an honest sender produces them, for tests that need
/// to tamper with the stream by hand.
pub fn honest_chunks(name: &str, data: &[u8], size: usize) -> Vec<Chunk> {
    let mut hasher = RunningHash::new();
    let pieces: Vec<&[u8]> = if data.is_empty() { vec![&[]] } else { data.chunks(size).collect() };
    let count = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, piece)| {
            hasher.absorb(piece);
            Chunk {
                filepath: name.to_string(),
                chunk_number: i as u64,
                size_in_bytes: piece.len() as u64,
                payload: Bytes::copy_from_slice(piece),
                chunk_checksum: chunk_hash(piece),
                cumulative_checksum: hasher.digest(),
                is_last_chunk: i + 1 == count,
                is_broadcast_set: false,
                send_time_nanos: 0,
                transfer_start_time_nanos: 0,
            }
        })
        .collect()
}
