//! SQLite-backed key-value storage behind an r2d2 pool.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OptionalExtension, params};

use crate::errors::Result;
use crate::kv::KvBackend;

/// Pooled SQLite KV backend.
pub struct SqliteBackend {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteBackend {
    /// Open (or create) a database file and run migrations.
    pub fn open(path: &std::path::Path) -> Result<Self> {
        let manager = SqliteConnectionManager::file(path);
        Self::from_manager(manager)
    }

    /// In-memory database, useful for tests. Pool size 1 so every handle
    /// sees the same memory database.
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder().max_size(1).build(manager)?;
        {
            let conn = pool.get()?;
            run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }

    fn from_manager(manager: SqliteConnectionManager) -> Result<Self> {
        let pool = Pool::builder().build(manager)?;
        {
            let conn = pool.get()?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
            run_migrations(&conn)?;
        }
        Ok(Self { pool })
    }
}

/// Create the `kv_records` table if needed.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_records (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.pool.get()?;
        let value: Option<String> = conn
            .query_row("SELECT value FROM kv_records WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let now = chrono::Utc::now().to_rfc3339();
        let _ = conn.execute(
            "INSERT INTO kv_records (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let conn = self.pool.get()?;
        let _ = conn.execute("DELETE FROM kv_records WHERE key = ?1", params![key])?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_round_trip() {
        let kv = SqliteBackend::in_memory().unwrap();
        kv.put("k", "v").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("v"));
        kv.delete("k").unwrap();
        assert_eq!(kv.get("k").unwrap(), None);
    }

    #[test]
    fn upsert_replaces_value() {
        let kv = SqliteBackend::in_memory().unwrap();
        kv.put("k", "1").unwrap();
        kv.put("k", "2").unwrap();
        assert_eq!(kv.get("k").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn file_backed_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        {
            let kv = SqliteBackend::open(&path).unwrap();
            kv.put("sticky", "yes").unwrap();
        }
        let kv = SqliteBackend::open(&path).unwrap();
        assert_eq!(kv.get("sticky").unwrap().as_deref(), Some("yes"));
    }

    #[test]
    fn delete_missing_is_ok() {
        let kv = SqliteBackend::in_memory().unwrap();
        kv.delete("ghost").unwrap();
    }
}
