//! SQLite storage backend
//!
//! Every entity kind shares one `entities` table keyed by `(kind, id)`, with
//! the entity serialized as JSON. Staged changes from a session are applied
//! inside a single transaction.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, Result};

use super::{Change, Store};

/// SQLite implementation of [`Store`]
///
/// Uses `Mutex` to ensure thread-safety for the SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a database file
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    Error::with_source(format!("cannot create {}", parent.display()), e)
                })?;
            }
        }

        let conn = Connection::open(path)?;

        // WAL mode for concurrent readers alongside the single writer
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;

        tracing::info!(path = %path.display(), "SQLite store initialized");
        Ok(store)
    }

    /// Create in-memory store (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.create_schema()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::other("SQLite connection mutex poisoned"))
    }

    fn create_schema(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            r#"
                CREATE TABLE IF NOT EXISTS entities (
                    kind TEXT NOT NULL,
                    id TEXT NOT NULL,
                    body TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (kind, id)
                );

                CREATE INDEX IF NOT EXISTS idx_entities_kind
                    ON entities(kind);
                "#,
        )?;

        Ok(())
    }

    /// Number of rows of a given kind
    pub fn count(&self, kind: &str) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            params![kind],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl Store for SqliteStore {
    fn get(&self, kind: &str, id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let body = conn
            .query_row(
                "SELECT body FROM entities WHERE kind = ?1 AND id = ?2",
                params![kind, id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(body)
    }

    fn list(&self, kind: &str) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, body FROM entities WHERE kind = ?1 ORDER BY id")?;
        let rows = stmt
            .query_map(params![kind], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    fn apply(&self, changes: &[Change]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();

        for change in changes {
            match change {
                Change::Put { kind, id, body } => {
                    tx.execute(
                        r#"
                            INSERT INTO entities (kind, id, body, updated_at)
                            VALUES (?1, ?2, ?3, ?4)
                            ON CONFLICT(kind, id) DO UPDATE SET
                                body = excluded.body,
                                updated_at = excluded.updated_at
                            "#,
                        params![kind, id, body, now],
                    )?;
                }
                Change::Delete { kind, id } => {
                    tx.execute(
                        "DELETE FROM entities WHERE kind = ?1 AND id = ?2",
                        params![kind, id],
                    )?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(kind: &'static str, id: &str, body: &str) -> Change {
        Change::Put {
            kind,
            id: id.to_string(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_file_backed_store_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("punchup.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.apply(&[put("venue", "1", r#"{"a":1}"#)]).unwrap();
        }

        let reopened = SqliteStore::new(&path).unwrap();
        assert_eq!(
            reopened.get("venue", "1").unwrap(),
            Some(r#"{"a":1}"#.to_string())
        );
    }

    #[test]
    fn test_apply_upserts_and_deletes() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .apply(&[put("act", "1", "one"), put("act", "2", "two")])
            .unwrap();
        store
            .apply(&[
                put("act", "1", "uno"),
                Change::Delete {
                    kind: "act",
                    id: "2".to_string(),
                },
            ])
            .unwrap();

        assert_eq!(store.list("act").unwrap(), vec![("1".to_string(), "uno".to_string())]);
        assert_eq!(store.count("act").unwrap(), 1);
    }

    #[test]
    fn test_kinds_are_isolated() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .apply(&[put("act", "1", "act"), put("venue", "1", "venue")])
            .unwrap();

        assert_eq!(store.get("act", "1").unwrap(), Some("act".to_string()));
        assert_eq!(store.get("venue", "1").unwrap(), Some("venue".to_string()));
        assert!(store.get("event", "1").unwrap().is_none());
    }
}
