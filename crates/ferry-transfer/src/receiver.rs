//! Receiver: verifies one transfer and answers with one acknowledgment.
//!
//! Per chunk, in order: declared size, chunk checksum, running checksum,
//! transfer identity. The first failure ends the transfer. Whatever the
//! outcome, the sender gets exactly one acknowledgment carrying the bytes
//! verified so far and the running hash, and the sink handle is closed.

use ferry_core::wire::unix_nanos;
use ferry_core::{chunk_hash, Acknowledgment, Chunk, Digest, RunningHash};

use crate::sink::{DurableSink, SinkError, SinkHandle};
use crate::stream::{InboundStream, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingFirstChunk,
    Receiving,
    Closed(Outcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Verification state for one inbound transfer.
#[derive(Debug)]
pub struct TransferSession {
    state: SessionState,
    identity: Option<String>,
    hasher: RunningHash,
    bytes_seen: u64,
    chunks_seen: u64,
}

impl Default for TransferSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::AwaitingFirstChunk,
            identity: None,
            hasher: RunningHash::new(),
            bytes_seen: 0,
            chunks_seen: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The first non-empty name seen on the stream; empty before that.
    pub fn identity(&self) -> &str {
        self.identity.as_deref().unwrap_or("")
    }

    /// Payload bytes that passed every check.
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn chunks_seen(&self) -> u64 {
        self.chunks_seen
    }

    pub fn digest(&self) -> Digest {
        self.hasher.digest()
    }

    /// Verify `chunk` and fold it into the session. Returns whether it was
    /// the last chunk. Any error closes the session as failed.
    pub fn accept(&mut self, chunk: &Chunk) -> Result<bool, VerifyError> {
        match self.state {
            SessionState::Closed(_) => {
                self.state = SessionState::Closed(Outcome::Failure);
                return Err(VerifyError::TrailingChunk {
                    chunk_number: chunk.chunk_number,
                    identity: self.identity().to_string(),
                });
            }
            SessionState::AwaitingFirstChunk => self.state = SessionState::Receiving,
            SessionState::Receiving => {}
        }
        if self.identity.is_none() && !chunk.filepath.is_empty() {
            self.identity = Some(chunk.filepath.clone());
        }

        if let Err(e) = self.verify(chunk) {
            self.state = SessionState::Closed(Outcome::Failure);
            return Err(e);
        }

        self.bytes_seen += chunk.payload.len() as u64;
        self.chunks_seen += 1;
        if chunk.is_last_chunk {
            self.state = SessionState::Closed(Outcome::Success);
        }
        Ok(chunk.is_last_chunk)
    }

    fn verify(&mut self, chunk: &Chunk) -> Result<(), VerifyError> {
        let actual = chunk.payload.len() as u64;
        if chunk.size_in_bytes != actual {
            return Err(VerifyError::SizeMismatch {
                chunk_number: chunk.chunk_number,
                declared: chunk.size_in_bytes,
                actual,
            });
        }

        if chunk_hash(&chunk.payload) != chunk.chunk_checksum {
            return Err(VerifyError::ChunkChecksum { chunk_number: chunk.chunk_number });
        }

        self.hasher.absorb(&chunk.payload);
        let observed = self.hasher.digest();
        if observed != chunk.cumulative_checksum {
            return Err(VerifyError::CumulativeChecksum {
                chunk_number: chunk.chunk_number,
                identity: chunk.filepath.clone(),
                observed: hex::encode(observed),
                expected: hex::encode(chunk.cumulative_checksum),
            });
        }

        if let Some(identity) = self.identity.as_deref().filter(|id| *id != chunk.filepath) {
            return Err(VerifyError::IdentityChanged {
                expected: identity.to_string(),
                found: chunk.filepath.clone(),
            });
        }
        Ok(())
    }

    /// Input ended. Fails unless the last chunk was already accepted.
    pub fn finish(&mut self) -> Result<(), VerifyError> {
        if self.state == SessionState::Closed(Outcome::Success) {
            return Ok(());
        }
        self.state = SessionState::Closed(Outcome::Failure);
        Err(VerifyError::Incomplete {
            identity: self.identity().to_string(),
            chunks: self.chunks_seen,
            bytes: self.bytes_seen,
        })
    }

    /// The acknowledgment for the session as it stands.
    pub fn acknowledgment(&self, error_message: String) -> Acknowledgment {
        Acknowledgment {
            filepath: self.identity().to_string(),
            size_in_bytes: self.bytes_seen,
            receive_time_nanos: unix_nanos(),
            whole_file_checksum: self.hasher.digest(),
            error_message,
        }
    }
}

/// Service one inbound stream to completion.
///
/// Always attempts to send exactly one acknowledgment, and returns it. A
/// transfer counts as successful only if every chunk verified, the last
/// chunk arrived, and the sink committed.
pub async fn receive<S: InboundStream>(stream: &mut S, sink: &dyn DurableSink, my_id: &str) -> Acknowledgment {
    let mut session = TransferSession::new();
    let mut handle: Option<Box<dyn SinkHandle>> = None;

    let mut result = run(stream, &mut session, sink, &mut handle).await;

    if let Some(handle) = handle.take() {
        let committed = result.is_ok();
        if let Err(e) = handle.close(committed) {
            tracing::warn!(my_id, name = session.identity(), error = %e, "failed to close sink");
            if committed {
                result = Err(ReceiveError::Sink(e));
            }
        }
    }

    let error_message = match &result {
        Ok(()) => String::new(),
        Err(e) => e.to_string(),
    };
    let ack = session.acknowledgment(error_message);

    match &result {
        Ok(()) => tracing::info!(
            my_id,
            name = %ack.filepath,
            chunks = session.chunks_seen(),
            bytes = ack.size_in_bytes,
            checksum = %hex::encode(ack.whole_file_checksum),
            "transfer received"
        ),
        Err(e) => tracing::warn!(
            my_id,
            name = %ack.filepath,
            chunks = session.chunks_seen(),
            bytes = ack.size_in_bytes,
            checksum = %hex::encode(ack.whole_file_checksum),
            error = %e,
            "transfer failed"
        ),
    }

    if let Err(e) = stream.send_and_close(&ack).await {
        tracing::warn!(my_id, name = %ack.filepath, error = %e, "failed to send acknowledgment");
    }
    ack
}

async fn run<S: InboundStream>(
    stream: &mut S,
    session: &mut TransferSession,
    sink: &dyn DurableSink,
    handle: &mut Option<Box<dyn SinkHandle>>,
) -> Result<(), ReceiveError> {
    loop {
        let Some(chunk) = stream.recv_chunk().await? else {
            session.finish()?;
            return Ok(());
        };

        if session.state() == SessionState::AwaitingFirstChunk && !chunk.filepath.is_empty() {
            *handle = Some(sink.open(&chunk.filepath)?);
        }

        let last = session.accept(&chunk)?;
        if let Some(handle) = handle.as_mut() {
            handle.write(&chunk.payload)?;
        }
        tracing::trace!(
            name = %chunk.filepath,
            chunk = chunk.chunk_number,
            bytes = chunk.payload.len(),
            last,
            "chunk verified"
        );

        if last {
            return check_end_of_input(stream, session).await;
        }
    }
}

/// After the last chunk the sender may only close its side.
async fn check_end_of_input<S: InboundStream>(
    stream: &mut S,
    session: &mut TransferSession,
) -> Result<(), ReceiveError> {
    match stream.recv_chunk().await {
        Ok(None) => Ok(()),
        Ok(Some(extra)) => {
            session.accept(&extra)?;
            Ok(())
        }
        // Everything was verified; the ack will tell whether the sender
        // is still there to read it.
        Err(e) => {
            tracing::debug!(error = %e, "stream failed after the last chunk");
            Ok(())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("chunk {chunk_number} declares {declared} bytes but carries {actual}")]
    SizeMismatch { chunk_number: u64, declared: u64, actual: u64 },
    #[error("chunk {chunk_number} bad payload, checksum mismatch")]
    ChunkChecksum { chunk_number: u64 },
    #[error(
        "cumulative checksums failed at chunk {chunk_number} of '{identity}'. \
         Observed: '{observed}', expected: '{expected}'"
    )]
    CumulativeChecksum { chunk_number: u64, identity: String, observed: String, expected: String },
    #[error("confusing two different transfers on one stream: '{expected}' vs '{found}'")]
    IdentityChanged { expected: String, found: String },
    #[error("chunk {chunk_number} of '{identity}' arrived after the last chunk")]
    TrailingChunk { chunk_number: u64, identity: String },
    #[error("incomplete transfer '{identity}': input ended after {chunks} chunks ({bytes} bytes) without a last chunk")]
    Incomplete { identity: String, chunks: u64, bytes: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiveError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("transport: {0}")]
    Stream(#[from] StreamError),
    #[error("storage: {0}")]
    Sink(#[from] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{DiscardSink, MemorySink};
    use crate::transport::memory::{pair, MemoryOutbound};
    use crate::stream::OutboundStream;
    use bytes::Bytes;

    /// Chunks exactly as an honest sender would produce them.
    fn honest_chunks(name: &str, data: &[u8], size: usize) -> Vec<Chunk> {
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

    async fn feed(chunks: Vec<Chunk>, sink: &dyn DurableSink) -> Acknowledgment {
        let (mut out, mut inbound) = pair(chunks.len() + 1);
        let writer = tokio::spawn(async move {
            for chunk in &chunks {
                if out.send_chunk(chunk).await.is_err() {
                    break;
                }
            }
            let _ = out.close_and_recv().await;
        });
        let ack = receive(&mut inbound, sink, "test").await;
        writer.await.unwrap();
        ack
    }

    /// Leaves the stream open after the chunks so the test controls when
    /// input ends.
    async fn send_all(out: &mut MemoryOutbound, chunks: &[Chunk]) {
        for chunk in chunks {
            out.send_chunk(chunk).await.unwrap();
        }
    }

    const TEXT: &[u8] = b"hello peer, it is nice to meet you!!";

    #[tokio::test]
    async fn honest_transfer_is_acknowledged_and_stored() {
        let sink = MemorySink::new();
        let ack = feed(honest_chunks("file1", TEXT, 3), &sink).await;

        assert!(ack.is_success(), "{}", ack.error_message);
        assert_eq!(ack.filepath, "file1");
        assert_eq!(ack.size_in_bytes, TEXT.len() as u64);
        assert_eq!(ack.whole_file_checksum, chunk_hash(TEXT));
        assert_eq!(sink.get("file1").unwrap(), Bytes::from_static(TEXT));
    }

    #[tokio::test]
    async fn empty_transfer_is_one_empty_last_chunk() {
        let sink = MemorySink::new();
        let chunks = honest_chunks("empty", b"", 8);
        assert_eq!(chunks.len(), 1);

        let ack = feed(chunks, &sink).await;
        assert!(ack.is_success());
        assert_eq!(ack.size_in_bytes, 0);
        assert_eq!(ack.whole_file_checksum, chunk_hash(b""));
        assert_eq!(sink.get("empty").unwrap().len(), 0);
    }

    #[tokio::test]
    async fn corrupted_payload_fails_its_chunk_checksum() {
        let sink = MemorySink::new();
        let mut chunks = honest_chunks("file1", TEXT, 3);
        let mut bad = chunks[4].payload.to_vec();
        bad[0] ^= 0xff;
        chunks[4].payload = Bytes::from(bad);

        let ack = feed(chunks, &sink).await;
        assert_eq!(ack.error_message, "chunk 4 bad payload, checksum mismatch");
        assert_eq!(ack.size_in_bytes, 12);
        assert_eq!(ack.whole_file_checksum, chunk_hash(&TEXT[..12]));
        assert!(sink.get("file1").is_none());
    }

    #[tokio::test]
    async fn declared_size_is_checked_first() {
        let mut chunks = honest_chunks("file1", TEXT, 3);
        chunks[0].size_in_bytes = 4;
        chunks[0].chunk_checksum = [0; 32];

        let ack = feed(chunks, &DiscardSink).await;
        assert_eq!(ack.error_message, "chunk 0 declares 4 bytes but carries 3");
        assert_eq!(ack.size_in_bytes, 0);
    }

    #[tokio::test]
    async fn reordered_chunks_fail_the_running_checksum() {
        let mut chunks = honest_chunks("file1", TEXT, 3);
        chunks.swap(1, 2);

        let ack = feed(chunks, &DiscardSink).await;
        assert!(
            ack.error_message.starts_with("cumulative checksums failed at chunk 2 of 'file1'"),
            "{}",
            ack.error_message
        );
        assert_eq!(ack.size_in_bytes, 3);
    }

    #[tokio::test]
    async fn lost_chunk_fails_the_running_checksum() {
        let mut chunks = honest_chunks("file1", TEXT, 3);
        chunks.remove(5);

        let ack = feed(chunks, &DiscardSink).await;
        assert!(ack.error_message.contains("cumulative checksums failed at chunk 6"));
        assert_eq!(ack.size_in_bytes, 15);
    }

    #[tokio::test]
    async fn identity_change_mid_stream_is_rejected() {
        let mut chunks = honest_chunks("file1", TEXT, 3);
        // A chunk that is otherwise perfect but names another transfer.
        chunks[2].filepath = "file2".into();

        let ack = feed(chunks, &DiscardSink).await;
        assert_eq!(
            ack.error_message,
            "confusing two different transfers on one stream: 'file1' vs 'file2'"
        );
        assert_eq!(ack.size_in_bytes, 6);
    }

    #[tokio::test]
    async fn input_ending_before_last_chunk_is_incomplete() {
        let sink = MemorySink::new();
        let mut chunks = honest_chunks("file1", TEXT, 3);
        chunks.truncate(3);

        let ack = feed(chunks, &sink).await;
        assert!(ack.error_message.starts_with("incomplete transfer 'file1'"), "{}", ack.error_message);
        assert_eq!(ack.size_in_bytes, 9);
        assert!(sink.get("file1").is_none());
    }

    #[tokio::test]
    async fn stream_with_no_chunks_is_incomplete() {
        let ack = feed(Vec::new(), &DiscardSink).await;
        assert!(!ack.is_success());
        assert_eq!(ack.filepath, "");
        assert_eq!(ack.size_in_bytes, 0);
    }

    #[tokio::test]
    async fn chunk_after_last_fails_the_transfer() {
        let sink = MemorySink::new();
        let mut chunks = honest_chunks("file1", b"abcdef", 3);
        let mut extra = chunks[1].clone();
        extra.chunk_number = 2;
        chunks.push(extra);

        let ack = feed(chunks, &sink).await;
        assert_eq!(ack.error_message, "chunk 2 of 'file1' arrived after the last chunk");
        assert_eq!(ack.size_in_bytes, 6);
        assert!(sink.get("file1").is_none());
    }

    #[tokio::test]
    async fn unnamed_transfer_verifies_without_touching_the_sink() {
        let sink = MemorySink::new();
        let ack = feed(honest_chunks("", b"anonymous bytes", 4), &sink).await;
        assert!(ack.is_success());
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn unnamed_first_chunk_takes_the_next_name() {
        let sink = MemorySink::new();
        let mut chunks = honest_chunks("b", b"abcdef", 3);
        chunks[0].filepath.clear();

        let ack = feed(chunks, &sink).await;
        assert!(ack.is_success(), "{}", ack.error_message);
        assert_eq!(ack.filepath, "b");
        assert_eq!(ack.size_in_bytes, 6);
        // Storage is only opened for a named first chunk.
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn name_dropped_mid_stream_is_confusion() {
        let mut chunks = honest_chunks("a", b"abcdef", 3);
        chunks[1].filepath.clear();

        let ack = feed(chunks, &DiscardSink).await;
        assert_eq!(ack.error_message, "confusing two different transfers on one stream: 'a' vs ''");
        assert_eq!(ack.size_in_bytes, 3);
    }

    #[tokio::test]
    async fn ack_waits_for_sender_half_close() {
        let (mut out, mut inbound) = pair(8);
        let chunks = honest_chunks("file1", b"abcdef", 3);
        send_all(&mut out, &chunks).await;

        let receiver = tokio::spawn(async move { receive(&mut inbound, &DiscardSink, "test").await });
        tokio::task::yield_now().await;
        assert!(!receiver.is_finished());

        let ack = out.close_and_recv().await.unwrap();
        assert!(ack.is_success());
        assert_eq!(receiver.await.unwrap(), ack);
    }

    #[test]
    fn session_walks_its_states() {
        let chunks = honest_chunks("s", b"abcd", 2);
        let mut session = TransferSession::new();
        assert_eq!(session.state(), SessionState::AwaitingFirstChunk);

        assert!(!session.accept(&chunks[0]).unwrap());
        assert_eq!(session.state(), SessionState::Receiving);
        assert_eq!(session.identity(), "s");

        assert!(session.accept(&chunks[1]).unwrap());
        assert_eq!(session.state(), SessionState::Closed(Outcome::Success));
        assert!(session.finish().is_ok());

        assert!(matches!(session.accept(&chunks[1]), Err(VerifyError::TrailingChunk { .. })));
        assert_eq!(session.state(), SessionState::Closed(Outcome::Failure));
    }
}
