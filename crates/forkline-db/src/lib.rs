pub mod migrations;
pub mod models;
pub mod queries;

use anyhow::Result;
use forkline_core::{ChangeSet, Store, Watermarks};
use forkline_types::models::{
    Branch, BranchId, EditHistory, Message, MessageId, Session, SessionId, UserId,
};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

const READER_POOL_SIZE: usize = 4;

/// SQLite-backed [`Store`]: one writer connection plus a small pool of
/// read-only connections, all in WAL mode.
pub struct SqliteStore {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    reader_idx: AtomicUsize,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let writer = Connection::open(path)?;

        // WAL mode for concurrent reads
        writer.pragma_update(None, "journal_mode", "WAL")?;
        writer.pragma_update(None, "foreign_keys", "ON")?;

        migrations::run(&writer)?;

        let mut readers = Vec::with_capacity(READER_POOL_SIZE);
        for _ in 0..READER_POOL_SIZE {
            let conn = Connection::open_with_flags(
                path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            readers.push(Mutex::new(conn));
        }

        info!(
            "Database opened at {} (1 writer + {} readers)",
            path.display(),
            READER_POOL_SIZE
        );
        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            reader_idx: AtomicUsize::new(0),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let idx = self.reader_idx.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[idx]
            .lock()
            .map_err(|e| anyhow::anyhow!("Reader lock poisoned: {}", e))?;
        f(&conn)
    }

    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self
            .writer
            .lock()
            .map_err(|e| anyhow::anyhow!("Writer lock poisoned: {}", e))?;
        f(&conn)
    }
}

impl Store for SqliteStore {
    fn watermarks(&self) -> Result<Watermarks> {
        self.with_conn(queries::watermarks)
    }

    fn load_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.with_conn(|conn| queries::session_by_id(conn, id))
    }

    fn list_sessions(&self, user_id: UserId, limit: u32) -> Result<Vec<Session>> {
        self.with_conn(|conn| queries::sessions_for_user(conn, user_id, limit))
    }

    fn load_messages(&self, session_id: SessionId) -> Result<Vec<Message>> {
        self.with_conn(|conn| queries::messages_for_session(conn, session_id))
    }

    fn load_branches(&self, session_id: SessionId) -> Result<Vec<Branch>> {
        self.with_conn(|conn| queries::branches_for_session(conn, session_id))
    }

    fn load_edits(&self, session_id: SessionId) -> Result<Vec<EditHistory>> {
        self.with_conn(|conn| queries::edits_for_session(conn, session_id))
    }

    fn session_of_message(&self, message_id: MessageId) -> Result<Option<SessionId>> {
        self.with_conn(|conn| queries::session_of_message(conn, message_id))
    }

    fn session_of_branch(&self, branch_id: BranchId) -> Result<Option<SessionId>> {
        self.with_conn(|conn| queries::session_of_branch(conn, branch_id))
    }

    fn commit(&self, changes: &ChangeSet) -> Result<()> {
        self.with_conn_mut(|conn| queries::apply(conn, changes))
    }
}
