//! SQLite sink. One row per transfer, one row per verified chunk payload.
//!
//! A transfer is `receiving` while chunks arrive and becomes `complete` on
//! commit. Aborted transfers are deleted along with their chunks.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};

use ferry_core::wire::unix_nanos;

use super::{DurableSink, SinkError, SinkHandle};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    name          TEXT    NOT NULL,
    started_nanos INTEGER NOT NULL,
    status        TEXT    NOT NULL,
    size_bytes    INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS chunks (
    transfer_id INTEGER NOT NULL,
    seq         INTEGER NOT NULL,
    data        BLOB    NOT NULL,
    PRIMARY KEY (transfer_id, seq)
);
";

#[derive(Clone)]
pub struct SqliteSink {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSink {
    pub fn open(path: &Path) -> Result<Self, SinkError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(SinkError::io("create", parent))?;
            }
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, SinkError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Arc::new(Mutex::new(conn)) })
    }

    /// Payload of the most recent complete transfer named `identity`.
    pub fn read(&self, identity: &str) -> Result<Option<Vec<u8>>, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM transfers WHERE name = ?1 AND status = 'complete'
                 ORDER BY id DESC LIMIT 1",
                params![identity],
                |row| row.get(0),
            )
            .optional()?;
        let Some(id) = id else {
            return Ok(None);
        };

        let mut stmt = conn.prepare("SELECT data FROM chunks WHERE transfer_id = ?1 ORDER BY seq")?;
        let mut data = Vec::new();
        for part in stmt.query_map(params![id], |row| row.get::<_, Vec<u8>>(0))? {
            data.extend_from_slice(&part?);
        }
        Ok(Some(data))
    }

    /// Number of transfers with the given status.
    pub fn count(&self, status: &str) -> Result<u64, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        let n: i64 =
            conn.query_row("SELECT COUNT(*) FROM transfers WHERE status = ?1", params![status], |row| {
                row.get(0)
            })?;
        Ok(n as u64)
    }
}

impl DurableSink for SqliteSink {
    fn open(&self, identity: &str) -> Result<Box<dyn SinkHandle>, SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        conn.execute(
            "INSERT INTO transfers (name, started_nanos, status) VALUES (?1, ?2, 'receiving')",
            params![identity, unix_nanos() as i64],
        )?;
        let id = conn.last_insert_rowid();
        Ok(Box::new(SqliteHandle { conn: Arc::clone(&self.conn), id, seq: 0, bytes: 0 }))
    }
}

struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
    id: i64,
    seq: i64,
    bytes: u64,
}

impl SinkHandle for SqliteHandle {
    fn write(&mut self, data: &[u8]) -> Result<(), SinkError> {
        let conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        conn.execute(
            "INSERT INTO chunks (transfer_id, seq, data) VALUES (?1, ?2, ?3)",
            params![self.id, self.seq, data],
        )?;
        self.seq += 1;
        self.bytes += data.len() as u64;
        Ok(())
    }

    fn close(self: Box<Self>, committed: bool) -> Result<(), SinkError> {
        let mut conn = self.conn.lock().map_err(|_| SinkError::Poisoned)?;
        if committed {
            conn.execute(
                "UPDATE transfers SET status = 'complete', size_bytes = ?2 WHERE id = ?1",
                params![self.id, self.bytes as i64],
            )?;
        } else {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM chunks WHERE transfer_id = ?1", params![self.id])?;
            tx.execute("DELETE FROM transfers WHERE id = ?1", params![self.id])?;
            tx.commit()?;
        }
        Ok(())
    }
}
