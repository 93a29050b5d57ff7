use std::sync::Arc;

use ferry_core::chunk_hash;
use ferry_core::config::{FerryConfig, SecurityMode};
use ferry_transfer::sink::{FileSink, MemorySink, SqliteSink};
use ferry_transfer::transport::{Acceptor, Connector};
use ferry_transfer::{sequential_payload, FileSender, StreamError, TransferError};

use crate::*;

// ══════════════════════════════════════════════════════════════════════════════
//  Successful transfers
// ══════════════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_demo_files_concurrently_over_tcp() {
    let sink = Arc::new(MemorySink::new());
    let server = Server::start(Acceptor::plaintext(), sink.clone()).await.unwrap();
    let addr = server.addr.to_string();

    let mut tx1 = FileSender::new("tx1", Connector::plaintext(addr.clone()));
    let mut tx2 = FileSender::new("tx2", Connector::plaintext(addr));
    let (r1, r2) = tokio::join!(
        tx1.send_file("file1", FILE1, 3, false),
        tx2.send_file("file2", FILE2, 3, false),
    );

    let r1 = r1.unwrap();
    let r2 = r2.unwrap();
    assert_eq!(r1.chunks, 12);
    assert_eq!(r2.chunks, 15);
    assert_eq!(r1.checksum, hex::encode(chunk_hash(FILE1)));

    server.wait_for_completed(2).await.unwrap();
    assert_eq!(sink.get("file1").unwrap(), FILE1);
    assert_eq!(sink.get("file2").unwrap(), FILE2);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_tls_transfer_lands_in_file_sink() {
    let tls = tls_material().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(FileSink::new(dir.path().join("received")).unwrap());
    let server = Server::start(Acceptor::tls(&tls.cert, &tls.key).unwrap(), sink.clone()).await.unwrap();

    let connector = Connector::tls(server.addr.to_string(), &tls.cert, "localhost").unwrap();
    let mut sender = FileSender::new("tx", connector);
    sender.send_file("notes/today.txt", FILE1, 5, false).await.unwrap();
    server.wait_for_completed(1).await.unwrap();

    let stored: Vec<_> = std::fs::read_dir(sink.root())
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].file_name().unwrap().to_str().unwrap().starts_with("notes_today.txt__"));
    assert_eq!(std::fs::read(&stored[0]).unwrap(), FILE1);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_tls_rejects_wrong_server_name() {
    let tls = tls_material().unwrap();
    let server =
        Server::start(Acceptor::tls(&tls.cert, &tls.key).unwrap(), Arc::new(MemorySink::new())).await.unwrap();

    let connector = Connector::tls(server.addr.to_string(), &tls.cert, "not-localhost").unwrap();
    let mut sender = FileSender::new("tx", connector);
    let err = sender.send_file("file1", FILE1, 3, false).await.unwrap_err();
    assert!(
        matches!(err, TransferError::Transport { source: StreamError::Channel(_), .. }),
        "{err}"
    );
    assert_eq!(server.registry.completed(), 0);
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_large_payload_over_tls_into_sqlite() {
    let tls = tls_material().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let sink = Arc::new(SqliteSink::open(&dir.path().join("ferry.db")).unwrap());
    let server = Server::start(Acceptor::tls(&tls.cert, &tls.key).unwrap(), sink.clone()).await.unwrap();

    let payload = sequential_payload(8 << 20).unwrap();
    let connector = Connector::tls(server.addr.to_string(), &tls.cert, "localhost").unwrap();
    let mut sender = FileSender::new("tx", connector);
    let report = sender.send_file("sequential-8MB", &payload, 1 << 20, false).await.unwrap();

    assert_eq!(report.chunks, 8);
    assert_eq!(report.bytes, 8 << 20);
    server.wait_for_completed(1).await.unwrap();
    assert_eq!(sink.read("sequential-8MB").unwrap().unwrap(), payload);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_empty_file_over_tcp() {
    let sink = Arc::new(MemorySink::new());
    let server = Server::start(Acceptor::plaintext(), sink.clone()).await.unwrap();

    let mut sender = FileSender::new("tx", Connector::plaintext(server.addr.to_string()));
    let report = sender.send_file("empty", b"", 1024, false).await.unwrap();
    assert_eq!(report.chunks, 1);
    assert_eq!(report.bytes, 0);

    server.wait_for_completed(1).await.unwrap();
    assert!(sink.get("empty").unwrap().is_empty());
    server.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_concurrent_senders() {
    let sink = Arc::new(MemorySink::new());
    let server = Server::start(Acceptor::plaintext(), sink.clone()).await.unwrap();

    let mut tasks = Vec::new();
    for n in 0..16u8 {
        let addr = server.addr.to_string();
        tasks.push(tokio::spawn(async move {
            let payload = vec![n; 10_000 + n as usize * 37];
            let mut sender = FileSender::new(format!("tx{n}"), Connector::plaintext(addr));
            let result = sender.send_file(&format!("f{n}"), &payload, 1000, n % 2 == 0).await;
            result.map(|_| payload)
        }));
    }

    let mut payloads = Vec::new();
    for task in tasks {
        payloads.push(task.await.unwrap().unwrap());
    }
    server.wait_for_completed(16).await.unwrap();
    for (n, payload) in payloads.iter().enumerate() {
        assert_eq!(sink.get(&format!("f{n}")).unwrap(), payload.as_slice());
    }
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_sequential_transfers_on_one_sender_are_counted() {
    let server = Server::start(Acceptor::plaintext(), Arc::new(MemorySink::new())).await.unwrap();
    let mut completed = server.registry.subscribe();

    let mut sender = FileSender::new("tx", Connector::plaintext(server.addr.to_string()));
    for (name, data) in [("file1", FILE1), ("file2", FILE2)] {
        sender.send_file(name, data, 3, false).await.unwrap();
    }

    server.wait_for_completed(2).await.unwrap();
    assert_eq!(*completed.borrow_and_update(), 2);
    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_tunnel_mode_serves_on_loopback_internal_port() {
    let mut config = FerryConfig::default();
    config.security.mode = SecurityMode::Tunnel;
    config.server.internal_port = 0;

    let sink = Arc::new(MemorySink::new());
    let acceptor = Acceptor::from_config(&config).unwrap();
    let server = Server::start_on(&config.listen_addr(), acceptor, sink.clone()).await.unwrap();
    assert!(server.addr.ip().is_loopback());

    // The SSH forward would sit between these two; dial its local end.
    config.client.tunnel_port = server.addr.port();
    let mut sender = FileSender::new("tx", Connector::from_config(&config).unwrap());
    sender.send_file("tunneled", FILE2, 7, false).await.unwrap();

    server.wait_for_completed(1).await.unwrap();
    assert_eq!(sink.get("tunneled").unwrap(), FILE2);
    server.stop().await.unwrap();
}
