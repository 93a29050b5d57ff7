//! Durable sinks: where verified payload bytes go.
//!
//! The receiver opens one handle per transfer on its first named chunk,
//! writes each payload after it passes verification, and closes the handle
//! exactly once on every exit path: committed on success, discarded on
//! failure. A sink never sees bytes that failed a checksum.

mod file;
mod sqlite;

use std::path::PathBuf;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;

use ferry_core::config::{SinkKind, StorageConfig};

pub use file::FileSink;
pub use sqlite::SqliteSink;

pub trait DurableSink: Send + Sync {
    /// Begin storing the transfer named `identity`.
    fn open(&self, identity: &str) -> Result<Box<dyn SinkHandle>, SinkError>;
}

pub trait SinkHandle: Send {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError>;

    /// Finish the transfer. `committed = false` throws away what was written.
    fn close(self: Box<Self>, committed: bool) -> Result<(), SinkError>;
}

/// Build the sink named by the storage config.
pub fn from_config(config: &StorageConfig) -> Result<Arc<dyn DurableSink>, SinkError> {
    let sink: Arc<dyn DurableSink> = match config.sink {
        SinkKind::Discard => Arc::new(DiscardSink),
        SinkKind::Memory => Arc::new(MemorySink::new()),
        SinkKind::File => Arc::new(FileSink::new(&config.path)?),
        SinkKind::Sqlite => Arc::new(SqliteSink::open(&config.path)?),
    };
    Ok(sink)
}

// ── Discard ───────────────────────────────────────────────────────────────────

/// Verifies nothing further and keeps nothing.
pub struct DiscardSink;

struct DiscardHandle;

impl DurableSink for DiscardSink {
    fn open(&self, _identity: &str) -> Result<Box<dyn SinkHandle>, SinkError> {
        Ok(Box::new(DiscardHandle))
    }
}

impl SinkHandle for DiscardHandle {
    fn write(&mut self, _data: &[u8]) -> Result<(), SinkError> {
        Ok(())
    }

    fn close(self: Box<Self>, _committed: bool) -> Result<(), SinkError> {
        Ok(())
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Keeps committed transfers in memory, keyed by identity. A later
/// transfer with the same identity replaces the earlier one.
#[derive(Clone, Default)]
pub struct MemorySink {
    files: Arc<DashMap<String, Bytes>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, identity: &str) -> Option<Bytes> {
        self.files.get(identity).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

struct MemoryHandle {
    identity: String,
    buf: BytesMut,
    files: Arc<DashMap<String, Bytes>>,
}

impl DurableSink for MemorySink {
    fn open(&self, identity: &str) -> Result<Box<dyn SinkHandle>, SinkError> {
        Ok(Box::new(MemoryHandle {
            identity: identity.to_string(),
            buf: BytesMut::new(),
            files: Arc::clone(&self.files),
        }))
    }
}

impl SinkHandle for MemoryHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        self.buf.extend_from_slice(data);
        Ok(())
    }

    fn close(self: Box<Self>, committed: bool) -> Result<(), SinkError> {
        if committed {
            let MemoryHandle { identity, buf, files } = *self;
            files.insert(identity, buf.freeze());
        }
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("{action} {path}: {source}")]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("database: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("sink lock poisoned")]
    Poisoned,
}

impl SinkError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { action, path, source }
    }
}
