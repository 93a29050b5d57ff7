//! Byte-stream transports for transfer streams.
//!
//! - [`FramedStream`]: length-prefixed frames over any async byte stream
//!   (TCP, TLS). One connection carries one transfer.
//! - [`secure`]: builds those connections per security mode.
//! - [`memory`]: an in-process stream pair, no sockets.

pub mod memory;
pub mod secure;

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufStream};

use ferry_core::wire::{self, FrameKind, FRAME_PREFIX_LEN};
use ferry_core::{Acknowledgment, Chunk};

use crate::stream::{InboundStream, OutboundStream, StreamError};

pub use memory::{MemoryInbound, MemoryOutbound, MemoryTransport};
pub use secure::{Acceptor, ChannelError, Connector};

/// Any byte stream a transfer can run over.
pub trait AsyncIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncIo for T {}

/// Type-erased connection, so plaintext and TLS share one stream type.
pub type BoxedIo = Box<dyn AsyncIo>;

/// How long a receiver keeps reading after answering early, so the sender
/// gets to read the acknowledgment instead of a connection reset.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Frames over a byte stream. Serves as either end of a transfer.
pub struct FramedStream<T> {
    io: BufStream<T>,
    input_done: bool,
}

impl<T: AsyncIo> FramedStream<T> {
    pub fn new(io: T) -> Self {
        Self { io: BufStream::new(io), input_done: false }
    }

    /// Read one frame. `Ok(None)` on a clean end of stream between frames.
    async fn read_frame(&mut self) -> Result<Option<(FrameKind, Bytes)>, StreamError> {
        let mut prefix = [0u8; FRAME_PREFIX_LEN];
        let n = self.io.read(&mut prefix[..1]).await.map_err(StreamError::from_io)?;
        if n == 0 {
            return Ok(None);
        }
        self.io.read_exact(&mut prefix[1..]).await.map_err(StreamError::from_io)?;
        let (kind, len) = wire::parse_frame_prefix(&prefix)?;

        let mut body = BytesMut::zeroed(len);
        self.io.read_exact(&mut body).await.map_err(StreamError::from_io)?;
        Ok(Some((kind, body.freeze())))
    }

    async fn write_frame(&mut self, kind: FrameKind, body: &[u8]) -> Result<(), StreamError> {
        let prefix = wire::frame_prefix(kind, body.len())?;
        self.io.write_all(&prefix).await.map_err(StreamError::from_io)?;
        self.io.write_all(body).await.map_err(StreamError::from_io)?;
        Ok(())
    }

    /// Push buffered frames onto the wire.
    pub async fn flush(&mut self) -> Result<(), StreamError> {
        self.io.flush().await.map_err(StreamError::from_io)
    }

    /// Discard whatever the sender still has in flight.
    async fn drain(&mut self) {
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            let mut frames = 0u64;
            while let Ok(Some((kind, _))) = self.read_frame().await {
                frames += 1;
                if kind != FrameKind::Chunk {
                    break;
                }
            }
            frames
        })
        .await;
        match drained {
            Ok(frames) => tracing::trace!(frames, "drained unread frames"),
            Err(_) => tracing::debug!("gave up draining sender after timeout"),
        }
        self.input_done = true;
    }
}

impl<T: AsyncIo> OutboundStream for FramedStream<T> {
    async fn send_chunk(&mut self, chunk: &Chunk) -> Result<(), StreamError> {
        let body = chunk.encode()?;
        self.write_frame(FrameKind::Chunk, &body).await
    }

    async fn close_and_recv(&mut self) -> Result<Acknowledgment, StreamError> {
        // The receiver may already have answered and hung up; the ack can
        // still be sitting in our read buffer.
        let end = match self.write_frame(FrameKind::End, &[]).await {
            Ok(()) => self.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = end {
            tracing::trace!(error = %e, "failed to signal end of input");
        }

        match self.read_frame().await? {
            Some((FrameKind::Ack, body)) => Ok(Acknowledgment::decode(&body)?),
            Some((kind, _)) => Err(StreamError::Protocol(format!(
                "expected acknowledgment, got {kind:?} frame"
            ))),
            None => Err(StreamError::Closed),
        }
    }
}

impl<T: AsyncIo> InboundStream for FramedStream<T> {
    async fn recv_chunk(&mut self) -> Result<Option<Chunk>, StreamError> {
        if self.input_done {
            return Ok(None);
        }
        match self.read_frame().await? {
            Some((FrameKind::Chunk, body)) => Ok(Some(Chunk::decode(body)?)),
            Some((FrameKind::End, _)) | None => {
                self.input_done = true;
                Ok(None)
            }
            Some((FrameKind::Ack, _)) => {
                Err(StreamError::Protocol("acknowledgment sent by the sending side".into()))
            }
        }
    }

    async fn send_and_close(&mut self, ack: &Acknowledgment) -> Result<(), StreamError> {
        let body = ack.encode()?;
        self.write_frame(FrameKind::Ack, &body).await?;
        self.flush().await?;
        self.io.shutdown().await.map_err(StreamError::from_io)?;
        if !self.input_done {
            self.drain().await;
        }
        Ok(())
    }
}
