use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use tether_core::error::{Result, TetherError};
use tether_core::traits::KeyValueStore;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS kv (
         key TEXT PRIMARY KEY,
         value TEXT NOT NULL,
         updated_at TEXT NOT NULL
     );";

/// Durable key-value store backed by SQLite.
///
/// Several processes may open the same file; WAL mode lets their readers and
/// the single writer proceed concurrently.
pub struct SqliteKvStore {
    conn: Mutex<Connection>,
}

impl SqliteKvStore {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                TetherError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite key-value store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn db_err(e: rusqlite::Error) -> TetherError {
    TetherError::Database(e.to_string())
}

fn parse_value(key: &str, raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw)
        .map_err(|e| TetherError::Store(format!("Corrupt value for '{}': {}", key, e)))
}

impl KeyValueStore for SqliteKvStore {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<serde_json::Value>>> {
        Box::pin(async move {
            let raw: Option<String> = {
                let conn = self.conn.lock().map_err(|e| TetherError::Database(e.to_string()))?;
                let raw = conn
                    .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                        row.get(0)
                    })
                    .optional()
                    .map_err(db_err)?;
                raw
            };

            raw.map(|raw| parse_value(key, &raw)).transpose()
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: serde_json::Value) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let raw = serde_json::to_string(&value)?;
            let conn = self.conn.lock().map_err(|e| TetherError::Database(e.to_string()))?;
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, raw, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let conn = self.conn.lock().map_err(|e| TetherError::Database(e.to_string()))?;
            let deleted = conn
                .execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(db_err)?;
            Ok(deleted > 0)
        })
    }

    fn scan_prefix<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, Result<BTreeMap<String, serde_json::Value>>> {
        Box::pin(async move {
            let rows: Vec<(String, String)> = {
                let conn = self.conn.lock().map_err(|e| TetherError::Database(e.to_string()))?;
                // substr comparison avoids LIKE wildcard escaping
                let mut stmt = conn
                    .prepare(
                        "SELECT key, value FROM kv
                         WHERE substr(key, 1, length(?1)) = ?1
                         ORDER BY key ASC",
                    )
                    .map_err(db_err)?;
                let mapped = stmt
                    .query_map(params![prefix], |row| Ok((row.get(0)?, row.get(1)?)))
                    .map_err(db_err)?;

                let mut rows = Vec::new();
                for row in mapped {
                    rows.push(row.map_err(db_err)?);
                }
                rows
            };

            let mut out = BTreeMap::new();
            for (key, raw) in rows {
                let value = parse_value(&key, &raw)?;
                out.insert(key, value);
            }
            Ok(out)
        })
    }
}
