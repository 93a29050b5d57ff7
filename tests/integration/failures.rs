use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use ferry_core::{Acknowledgment, Chunk};
use ferry_transfer::sink::MemorySink;
use ferry_transfer::transport::{Acceptor, Connector, FramedStream};
use ferry_transfer::{DurableSink, FileSender, OutboundStream, SinkError, SinkHandle, TransferRegistry};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Tampered streams and broken senders
// ══════════════════════════════════════════════════════════════════════════════

/// Push hand-made chunks over a real connection and return the ack.
async fn push_raw(addr: &str, chunks: &[Chunk]) -> Acknowledgment {
    let mut stream = Connector::plaintext(addr).connect().await.unwrap();
    for chunk in chunks {
        // The receiver may already have hung up on a bad chunk.
        if stream.send_chunk(chunk).await.is_err() {
            break;
        }
    }
    stream.close_and_recv().await.unwrap()
}

#[tokio::test]
async fn test_corrupted_chunk_is_rejected_and_not_stored() {
    let sink = Arc::new(MemorySink::new());
    let server = Server::start(Acceptor::plaintext(), sink.clone()).await.unwrap();

    let mut chunks = honest_chunks("file1", FILE1, 3);
    let mut bad = chunks[1].payload.to_vec();
    bad[2] = b'!';
    chunks[1].payload = Bytes::from(bad);

    let ack = push_raw(&server.addr.to_string(), &chunks).await;
    assert_eq!(ack.error_message, "chunk 1 bad payload, checksum mismatch");
    assert_eq!(ack.size_in_bytes, 3);
    assert!(sink.get("file1").is_none());
    assert_eq!(server.registry.completed(), 0);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_reordered_chunks_fail_cumulative_check() {
    let server = Server::start(Acceptor::plaintext(), Arc::new(MemorySink::new())).await.unwrap();

    let mut chunks = honest_chunks("file2", FILE2, 3);
    chunks.swap(3, 4);

    let ack = push_raw(&server.addr.to_string(), &chunks).await;
    assert!(
        ack.error_message.starts_with("cumulative checksums failed at chunk 4 of 'file2'"),
        "{}",
        ack.error_message
    );
    assert_eq!(ack.size_in_bytes, 9);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_chunk_after_last_is_rejected() {
    let sink = Arc::new(MemorySink::new());
    let server = Server::start(Acceptor::plaintext(), sink.clone()).await.unwrap();

    let mut chunks = honest_chunks("file1", FILE1, 12);
    let mut extra = chunks[2].clone();
    extra.chunk_number = 3;
    chunks.push(extra);

    let ack = push_raw(&server.addr.to_string(), &chunks).await;
    assert_eq!(ack.error_message, "chunk 3 of 'file1' arrived after the last chunk");
    assert!(sink.get("file1").is_none());
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_malformed_frame_gets_an_error_ack() {
    let server = Server::start(Acceptor::plaintext(), Arc::new(MemorySink::new())).await.unwrap();

    let mut tcp = TcpStream::connect(server.addr).await.unwrap();
    tcp.write_all(&[0x42, 0, 0, 0, 0]).await.unwrap();
    let mut stream = FramedStream::new(tcp);
    let ack = stream.close_and_recv().await.unwrap();

    assert!(ack.error_message.contains("unknown frame kind"), "{}", ack.error_message);
    assert_eq!(server.registry.completed(), 0);
    server.stop().await.unwrap();
}

/// Memory sink that also records how each handle was closed.
#[derive(Default)]
struct RecordingSink {
    inner: MemorySink,
    closes: Arc<Mutex<Vec<(String, bool)>>>,
}

struct RecordingHandle {
    identity: String,
    inner: Box<dyn SinkHandle>,
    closes: Arc<Mutex<Vec<(String, bool)>>>,
}

impl RecordingSink {
    fn closes(&self) -> Vec<(String, bool)> {
        self.closes.lock().unwrap().clone()
    }
}

impl DurableSink for RecordingSink {
    fn open(&self, identity: &str) -> Result<Box<dyn SinkHandle>, SinkError> {
        Ok(Box::new(RecordingHandle {
            identity: identity.to_string(),
            inner: self.inner.open(identity)?,
            closes: Arc::clone(&self.closes),
        }))
    }
}

impl SinkHandle for RecordingHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.inner.write(data)
    }

    fn close(self: Box<Self>, committed: bool) -> Result<(), SinkError> {
        let this = *self;
        this.closes.lock().unwrap().push((this.identity, committed));
        this.inner.close(committed)
    }
}

#[tokio::test]
async fn test_sender_vanishing_mid_transfer_does_not_count() {
    let sink = Arc::new(RecordingSink::default());
    let registry = Arc::new(TransferRegistry::new("itest", sink.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let served = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            registry.serve(FramedStream::new(tcp)).await
        })
    };

    {
        let chunks = honest_chunks("abandoned", FILE1, 3);
        let mut stream = Connector::plaintext(addr.as_str()).connect().await.unwrap();
        for chunk in &chunks[..4] {
            stream.send_chunk(chunk).await.unwrap();
        }
        stream.flush().await.unwrap();
        // dropped without END
    }

    let ack = served.await.unwrap();
    assert_eq!(
        ack.error_message,
        "incomplete transfer 'abandoned': input ended after 4 chunks (12 bytes) without a last chunk"
    );
    assert_eq!(ack.size_in_bytes, 12);
    assert_eq!(registry.completed(), 0);
    assert_eq!(sink.closes(), vec![("abandoned".to_string(), false)]);
    assert!(sink.inner.get("abandoned").is_none());
}

#[tokio::test]
async fn test_no_server_is_a_transport_error() {
    // Bind then drop to get a port nobody listens on.
    let port = {
        let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap().port()
    };
    let mut sender = FileSender::new("tx", Connector::plaintext(format!("127.0.0.1:{port}")));
    let err = sender.send_file("file1", FILE1, 3, false).await.unwrap_err();
    assert!(matches!(err, ferry_transfer::TransferError::Transport { .. }), "{err}");
}
