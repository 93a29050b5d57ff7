//! Sender: splits a payload into chunks, stamps each with its own hash
//! and the running hash, and checks the receiver's verdict.
//!
//! One `FileSender` sends transfers one after another; each transfer gets
//! a fresh stream, a fresh running hash and chunk numbers from zero.

use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;

use ferry_core::wire::{unix_nanos, MAX_CHUNK_SIZE};
use ferry_core::{chunk_hash, Chunk, RunningHash};

use crate::stream::{OpenStream, OutboundStream, StreamError};

/// Number of chunks a payload of `len` bytes is cut into. An empty payload
/// still travels as one empty last chunk.
pub fn chunk_count(len: usize, max_chunk_size: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(max_chunk_size)
    }
}

/// A deterministic benchmark payload of `n` bytes: each little-endian
/// 8-byte word holds its own byte offset. `None` unless `n` is a
/// multiple of 8.
pub fn sequential_payload(n: usize) -> Option<Vec<u8>> {
    if n % 8 != 0 {
        return None;
    }
    let mut data = Vec::with_capacity(n);
    for offset in (0..n as u64).step_by(8) {
        data.extend_from_slice(&offset.to_le_bytes());
    }
    Some(data)
}

/// What a successful transfer looked like from the sending side.
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    pub name: String,
    pub bytes: u64,
    pub chunks: u64,
    /// Hex of the whole-payload hash both sides agreed on.
    pub checksum: String,
    pub is_broadcast_set: bool,
    #[serde(rename = "elapsed_secs", serialize_with = "as_secs")]
    pub elapsed: Duration,
}

impl TransferReport {
    pub fn megabytes_per_sec(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / (1024.0 * 1024.0) / secs
    }
}

fn as_secs<S: serde::Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(elapsed.as_secs_f64())
}

pub struct FileSender<O> {
    opener: O,
    my_id: String,
    hasher: RunningHash,
    next_chunk: u64,
}

impl<O: OpenStream> FileSender<O> {
    pub fn new(my_id: impl Into<String>, opener: O) -> Self {
        Self { opener, my_id: my_id.into(), hasher: RunningHash::new(), next_chunk: 0 }
    }

    pub fn opener(&self) -> &O {
        &self.opener
    }

    /// Send `payload` as the transfer named `name`, in chunks of at most
    /// `max_chunk_size` bytes, and wait for the acknowledgment.
    pub async fn send_file(
        &mut self,
        name: &str,
        payload: &[u8],
        max_chunk_size: usize,
        is_broadcast_set: bool,
    ) -> Result<TransferReport, TransferError> {
        if max_chunk_size == 0 || max_chunk_size > MAX_CHUNK_SIZE {
            return Err(TransferError::InvalidChunkSize(max_chunk_size));
        }

        self.hasher.reset();
        self.next_chunk = 0;
        let started = Instant::now();
        let transfer_start_time_nanos = unix_nanos();

        let transport = |source| TransferError::Transport { name: name.to_string(), source };
        let mut stream = self.opener.open_stream().await.map_err(transport)?;

        let num_chunks = chunk_count(payload.len(), max_chunk_size);
        tracing::debug!(my_id = %self.my_id, name, bytes = payload.len(), num_chunks, "sending");

        for i in 0..num_chunks {
            let start = i * max_chunk_size;
            let end = payload.len().min(start + max_chunk_size);
            let piece = &payload[start..end];

            self.hasher.absorb(piece);
            let chunk = Chunk {
                filepath: name.to_string(),
                chunk_number: self.next_chunk,
                size_in_bytes: piece.len() as u64,
                payload: Bytes::copy_from_slice(piece),
                chunk_checksum: chunk_hash(piece),
                cumulative_checksum: self.hasher.digest(),
                is_last_chunk: i + 1 == num_chunks,
                is_broadcast_set,
                send_time_nanos: unix_nanos(),
                transfer_start_time_nanos,
            };
            self.next_chunk += 1;

            match stream.send_chunk(&chunk).await {
                Ok(()) => {}
                // The receiver may hang up as soon as it has the last chunk.
                Err(StreamError::Closed) if chunk.is_last_chunk => {
                    tracing::trace!(name, "stream closed after the last chunk");
                }
                Err(StreamError::Closed) => {
                    let remote = match stream.close_and_recv().await {
                        Ok(ack) if !ack.is_success() => Some(ack.error_message),
                        _ => None,
                    };
                    return Err(TransferError::PrematureClose {
                        name: name.to_string(),
                        chunk_number: chunk.chunk_number,
                        num_chunks: num_chunks as u64,
                        remote,
                    });
                }
                Err(e) => return Err(transport(e)),
            }
        }

        let ack = stream.close_and_recv().await.map_err(transport)?;
        let local = self.hasher.digest();
        let matches = ack.whole_file_checksum == local;
        tracing::info!(
            my_id = %self.my_id,
            name,
            remote_checksum = %hex::encode(ack.whole_file_checksum),
            matches,
            sent = payload.len(),
            received = ack.size_in_bytes,
            "acknowledgment received"
        );

        if !ack.is_success() {
            return Err(TransferError::Rejected { name: name.to_string(), message: ack.error_message });
        }
        if ack.size_in_bytes != payload.len() as u64 {
            return Err(TransferError::SizeMismatch {
                name: name.to_string(),
                sent: payload.len() as u64,
                acknowledged: ack.size_in_bytes,
            });
        }
        if !matches {
            return Err(TransferError::ChecksumMismatch {
                name: name.to_string(),
                local: hex::encode(local),
                remote: hex::encode(ack.whole_file_checksum),
            });
        }

        Ok(TransferReport {
            name: name.to_string(),
            bytes: payload.len() as u64,
            chunks: num_chunks as u64,
            checksum: hex::encode(local),
            is_broadcast_set,
            elapsed: started.elapsed(),
        })
    }
}

fn remote_suffix(remote: &Option<String>) -> String {
    match remote {
        Some(message) => format!("; receiver said: {message}"),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("max chunk size {0} must be between 1 and {}", MAX_CHUNK_SIZE)]
    InvalidChunkSize(usize),
    #[error("'{name}': {source}")]
    Transport {
        name: String,
        #[source]
        source: StreamError,
    },
    #[error(
        "'{name}': stream closed before the last chunk, at chunk {chunk_number} of {num_chunks}{}",
        remote_suffix(.remote)
    )]
    PrematureClose { name: String, chunk_number: u64, num_chunks: u64, remote: Option<String> },
    #[error("'{name}': receiver rejected transfer: {message}")]
    Rejected { name: String, message: String },
    #[error("'{name}': sent {sent} bytes but receiver acknowledged {acknowledged}")]
    SizeMismatch { name: String, sent: u64, acknowledged: u64 },
    #[error("'{name}': whole-payload checksum mismatch, local {local} vs remote {remote}")]
    ChecksumMismatch { name: String, local: String, remote: String },
}
