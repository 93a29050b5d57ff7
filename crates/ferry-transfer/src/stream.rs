//! Transfer stream contract.
//!
//! One stream carries one transfer. The sender side pushes chunks and then
//! half-closes to collect the single acknowledgment; the receiver side
//! pulls chunks until end of input and answers exactly once. Concrete
//! streams live in [`crate::transport`]: framed byte streams over TCP/TLS
//! and an in-process channel pair for tests.

use std::future::Future;

use ferry_core::wire::WireError;
use ferry_core::{Acknowledgment, Chunk};

use crate::transport::ChannelError;

/// Sender's half of a transfer stream.
pub trait OutboundStream: Send {
    /// Push one chunk. `StreamError::Closed` means the receiver has
    /// stopped reading.
    fn send_chunk(&mut self, chunk: &Chunk) -> impl Future<Output = Result<(), StreamError>> + Send;

    /// Signal end of input and wait for the receiver's verdict.
    fn close_and_recv(&mut self) -> impl Future<Output = Result<Acknowledgment, StreamError>> + Send;
}

/// Receiver's half of a transfer stream.
pub trait InboundStream: Send {
    /// Next chunk, or `Ok(None)` once the sender has finished writing.
    fn recv_chunk(&mut self) -> impl Future<Output = Result<Option<Chunk>, StreamError>> + Send;

    /// Deliver the acknowledgment and terminate the stream.
    fn send_and_close(
        &mut self,
        ack: &Acknowledgment,
    ) -> impl Future<Output = Result<(), StreamError>> + Send;
}

/// Opens a fresh outbound stream per transfer.
pub trait OpenStream: Send + Sync {
    type Stream: OutboundStream;

    fn open_stream(&self) -> impl Future<Output = Result<Self::Stream, StreamError>> + Send;
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("stream closed by peer")]
    Closed,
    #[error("stream I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Wire(#[from] WireError),
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl StreamError {
    /// Fold the I/O errors that mean "the other end went away" into `Closed`.
    pub(crate) fn from_io(err: std::io::Error) -> Self {
        use std::io::ErrorKind::*;
        match err.kind() {
            UnexpectedEof | BrokenPipe | ConnectionReset | ConnectionAborted | NotConnected => {
                Self::Closed
            }
            _ => Self::Io(err),
        }
    }
}
