//! TCP accept loop feeding the transfer registry.
//!
//! One accepted connection is one transfer stream. Each connection gets its
//! own task: channel setup (TLS handshake if configured), then the registry
//! services the stream to completion. Connections never wait on each other.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::registry::TransferRegistry;
use crate::transport::Acceptor;

pub struct TransferListener {
    listener: TcpListener,
    acceptor: Acceptor,
    registry: Arc<TransferRegistry>,
    shutdown: broadcast::Receiver<()>,
}

impl TransferListener {
    pub async fn bind(
        addr: &str,
        acceptor: Acceptor,
        registry: Arc<TransferRegistry>,
        shutdown: broadcast::Receiver<()>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, acceptor, registry, shutdown })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(mut self) -> io::Result<()> {
        let local = self.listener.local_addr()?;
        tracing::info!(
            my_id = self.registry.my_id(),
            addr = %local,
            mode = ?self.acceptor.mode(),
            "transfer listener starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("transfer listener shutting down");
                    return Ok(());
                }

                result = self.listener.accept() => {
                    let (tcp, peer) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    if let Err(e) = tcp.set_nodelay(true) {
                        tracing::debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                    }

                    let acceptor = self.acceptor.clone();
                    let registry = Arc::clone(&self.registry);
                    tokio::spawn(async move {
                        match acceptor.accept(tcp).await {
                            Ok(stream) => {
                                tracing::debug!(%peer, "transfer stream opened");
                                registry.serve(stream).await;
                            }
                            Err(e) => tracing::warn!(%peer, error = %e, "channel setup failed"),
                        }
                    });
                }
            }
        }
    }
}
