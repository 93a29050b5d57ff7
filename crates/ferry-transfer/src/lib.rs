//! ferry-transfer: chunked, verified transfers over one stream each.
//!
//! - [`sender`]: cuts a payload into chunks and checks the acknowledgment.
//! - [`receiver`]: verifies chunks in order and answers once.
//! - [`registry`]: services inbound streams and counts completions.
//! - [`sink`]: where verified bytes are kept.
//! - [`transport`]: framed TCP/TLS streams and in-process pairs.
//! - [`listener`]: accepts connections and hands them to the registry.

pub mod listener;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod sink;
pub mod stream;
pub mod transport;

pub use listener::TransferListener;
pub use receiver::{ReceiveError, TransferSession, VerifyError};
pub use registry::TransferRegistry;
pub use sender::{chunk_count, sequential_payload, FileSender, TransferError, TransferReport};
pub use sink::{DurableSink, SinkError, SinkHandle};
pub use stream::{InboundStream, OpenStream, OutboundStream, StreamError};
