//! In-process transfer streams over tokio channels.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use ferry_core::{Acknowledgment, Chunk};

use crate::registry::TransferRegistry;
use crate::stream::{InboundStream, OpenStream, OutboundStream, StreamError};

enum Frame {
    Chunk(Chunk),
    End,
}

pub struct MemoryOutbound {
    frames: mpsc::Sender<Frame>,
    ack: Option<oneshot::Receiver<Acknowledgment>>,
}

pub struct MemoryInbound {
    frames: mpsc::Receiver<Frame>,
    ack: Option<oneshot::Sender<Acknowledgment>>,
    input_done: bool,
}

/// A connected stream pair. `capacity` bounds chunks in flight.
pub fn pair(capacity: usize) -> (MemoryOutbound, MemoryInbound) {
    let (frame_tx, frame_rx) = mpsc::channel(capacity.max(1));
    let (ack_tx, ack_rx) = oneshot::channel();
    (
        MemoryOutbound { frames: frame_tx, ack: Some(ack_rx) },
        MemoryInbound { frames: frame_rx, ack: Some(ack_tx), input_done: false },
    )
}

impl OutboundStream for MemoryOutbound {
    async fn send_chunk(&mut self, chunk: &Chunk) -> Result<(), StreamError> {
        self.frames
            .send(Frame::Chunk(chunk.clone()))
            .await
            .map_err(|_| StreamError::Closed)
    }

    async fn close_and_recv(&mut self) -> Result<Acknowledgment, StreamError> {
        // Fails only when the receiver is gone; its ack may still be waiting.
        let _ = self.frames.send(Frame::End).await;
        let ack = self
            .ack
            .take()
            .ok_or_else(|| StreamError::Protocol("acknowledgment already received".into()))?;
        ack.await.map_err(|_| StreamError::Closed)
    }
}

impl InboundStream for MemoryInbound {
    async fn recv_chunk(&mut self) -> Result<Option<Chunk>, StreamError> {
        if self.input_done {
            return Ok(None);
        }
        match self.frames.recv().await {
            Some(Frame::Chunk(chunk)) => Ok(Some(chunk)),
            Some(Frame::End) | None => {
                self.input_done = true;
                Ok(None)
            }
        }
    }

    async fn send_and_close(&mut self, ack: &Acknowledgment) -> Result<(), StreamError> {
        let tx = self
            .ack
            .take()
            .ok_or_else(|| StreamError::Protocol("acknowledgment already sent".into()))?;
        self.frames.close();
        self.input_done = true;
        tx.send(ack.clone()).map_err(|_| StreamError::Closed)
    }
}

/// Opens in-process streams straight into a registry, one spawned
/// receiver task per stream.
#[derive(Clone)]
pub struct MemoryTransport {
    registry: Arc<TransferRegistry>,
    capacity: usize,
}

impl MemoryTransport {
    pub fn new(registry: Arc<TransferRegistry>) -> Self {
        Self { registry, capacity: 16 }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }
}

impl OpenStream for MemoryTransport {
    type Stream = MemoryOutbound;

    async fn open_stream(&self) -> Result<MemoryOutbound, StreamError> {
        let (outbound, inbound) = pair(self.capacity);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            registry.serve(inbound).await;
        });
        Ok(outbound)
    }
}
