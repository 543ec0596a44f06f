//! Key-value storage for encoded draft documents.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::PersistenceError;

/// Opaque get/set of encoded documents by key.
pub trait DocumentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, document: &str) -> Result<(), PersistenceError>;
}

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: Mutex<HashMap<String, String>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let guard = self.docs.lock().map_err(|_| PersistenceError::Poisoned)?;
        Ok(guard.get(key).cloned())
    }

    fn set(&self, key: &str, document: &str) -> Result<(), PersistenceError> {
        let mut guard = self.docs.lock().map_err(|_| PersistenceError::Poisoned)?;
        guard.insert(key.to_string(), document.to_string());
        Ok(())
    }
}

/// SQLite-backed store: a single `drafts(key, document, updated_at)` table.
pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS drafts (
                key        TEXT PRIMARY KEY,
                document   TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(SqliteDocumentStore { conn: Mutex::new(conn) })
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        let doc = conn
            .query_row("SELECT document FROM drafts WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(doc)
    }

    fn set(&self, key: &str, document: &str) -> Result<(), PersistenceError> {
        let conn = self.conn.lock().map_err(|_| PersistenceError::Poisoned)?;
        conn.execute(
            "INSERT INTO drafts (key, document, updated_at) VALUES (?1, ?2, strftime('%s','now'))
             ON CONFLICT(key) DO UPDATE SET document = excluded.document, updated_at = excluded.updated_at",
            params![key, document],
        )?;
        Ok(())
    }
}

impl std::fmt::Debug for SqliteDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDocumentStore").finish_non_exhaustive()
    }
}
