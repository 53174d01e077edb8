// Durable key-value storage for the session
// SQLite (WAL) on disk, HashMap in tests

use crate::error::{LedgerError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// String-keyed storage that outlives a single run of the app.
pub trait KvBackend: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove every key in `keys` as one unit: a concurrent reader sees either
    /// all of them or none of them.
    fn remove_all(&self, keys: &[&str]) -> Result<()>;
}

// ============================================================================
// SQLITE BACKEND
// ============================================================================

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open (or create) the session database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        setup_database(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.conn.lock().map_err(|_| LedgerError::Poisoned)?;
        f(&mut conn)
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // WAL survives a crash mid-write; in-memory databases just ignore it
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv (
            key TEXT PRIMARY KEY NOT NULL,
            value TEXT NOT NULL,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    Ok(())
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, CURRENT_TIMESTAMP)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP",
                params![key, value],
            )?;
            Ok(())
        })
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for key in keys {
                tx.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            }
            tx.commit()?;
            Ok(())
        })
    }
}

// ============================================================================
// MEMORY BACKEND
// ============================================================================

/// Non-durable backend for tests and throwaway sessions.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_all(&self, keys: &[&str]) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| LedgerError::Poisoned)?;
        for key in keys {
            entries.remove(*key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_set_get_overwrite() {
        let db = SqliteBackend::open_in_memory().unwrap();

        assert_eq!(db.get("ledger_token").unwrap(), None);

        db.set("ledger_token", "abc").unwrap();
        assert_eq!(db.get("ledger_token").unwrap(), Some("abc".to_string()));

        db.set("ledger_token", "def").unwrap();
        assert_eq!(db.get("ledger_token").unwrap(), Some("def".to_string()));
    }

    #[test]
    fn test_sqlite_remove_all_leaves_other_keys() {
        let db = SqliteBackend::open_in_memory().unwrap();
        db.set("a", "1").unwrap();
        db.set("b", "2").unwrap();
        db.set("other", "3").unwrap();

        db.remove_all(&["a", "b", "missing"]).unwrap();

        assert_eq!(db.get("a").unwrap(), None);
        assert_eq!(db.get("b").unwrap(), None);
        assert_eq!(db.get("other").unwrap(), Some("3".to_string()));
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.db");

        {
            let db = SqliteBackend::open(&path).unwrap();
            db.set("ledger_role", "parent").unwrap();
        }

        let db = SqliteBackend::open(&path).unwrap();
        assert_eq!(db.get("ledger_role").unwrap(), Some("parent".to_string()));
    }

    #[test]
    fn test_memory_backend() {
        let mem = MemoryBackend::new();
        assert!(mem.is_empty());

        mem.set("x", "1").unwrap();
        mem.set("y", "2").unwrap();
        assert_eq!(mem.len(), 2);

        mem.remove_all(&["x", "y"]).unwrap();
        assert!(mem.is_empty());
        assert_eq!(mem.get("x").unwrap(), None);
    }
}
