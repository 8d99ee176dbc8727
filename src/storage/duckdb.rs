use super::traits::{KeyValueStore, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use duckdb::Connection;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Table holding per-file push state, keyed by source id.
pub const PUSH_STATE_TABLE: &str = "push_state";
/// Table holding per-stream state, keyed by stream key.
pub const STREAM_STATE_TABLE: &str = "stream_state";

/// Check if a process with the given PID is still running
fn is_process_running(pid: u32) -> bool {
    #[cfg(unix)]
    {
        use std::process::Command;
        Command::new("ps")
            .arg("-p")
            .arg(pid.to_string())
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        true
    }
}

/// Extract PID from DuckDB lock error message, e.g. "... (PID 12345) ..."
fn extract_pid_from_lock_error(error_msg: &str) -> Option<u32> {
    let start = error_msg.find("(PID ")? + 5;
    let end = error_msg[start..].find(')')?;
    error_msg[start..start + end].parse().ok()
}

fn remove_lock_files(db_path: &Path) -> std::io::Result<()> {
    for suffix in ["wal", "lock"] {
        let path = PathBuf::from(format!("{}.{}", db_path.display(), suffix));
        if path.exists() {
            std::fs::remove_file(&path)?;
            tracing::info!(path = %path.display(), "Removed stale {} file", suffix);
        }
    }
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StorageError> {
    conn.lock()
        .map_err(|_| StorageError::Database("connection mutex poisoned".to_string()))
}

fn join_error(e: tokio::task::JoinError) -> StorageError {
    StorageError::Database(format!("Task join error: {}", e))
}

/// A state database file. Tables opened from it share one connection.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
}

impl DuckDbStore {
    /// Open (or create) the state database at `path`.
    ///
    /// If another process left a lock behind and is no longer running, the
    /// stale lock files are removed and the open is retried once.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref();

        let e = match Connection::open(path) {
            Ok(conn) => return Ok(Self::from_connection(conn)),
            Err(e) => e,
        };

        let error_msg = e.to_string();
        if error_msg.contains("Could not set lock") {
            tracing::warn!("Database lock detected: {}", error_msg);

            if let Some(pid) = extract_pid_from_lock_error(&error_msg) {
                if !is_process_running(pid) {
                    tracing::warn!(pid, "Lock holder is not running, removing stale lock files");
                    if let Err(io_err) = remove_lock_files(path) {
                        tracing::error!("Failed to remove lock files: {}", io_err);
                        return Err(e.into());
                    }
                    let conn = Connection::open(path)?;
                    return Ok(Self::from_connection(conn));
                }
                tracing::error!(pid, "Process is still running, cannot acquire lock");
            }
        }

        Err(e.into())
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Open a key/value table, creating it if needed.
    pub async fn table(&self, name: &'static str) -> Result<DuckDbTable, StorageError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key VARCHAR PRIMARY KEY,
                        value VARCHAR NOT NULL,
                        updated_at TIMESTAMPTZ NOT NULL
                    )",
                    name
                ),
                [],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)??;

        Ok(DuckDbTable {
            conn: self.conn.clone(),
            name,
            closed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Handle to one key/value table of a [`DuckDbStore`].
#[derive(Clone)]
pub struct DuckDbTable {
    conn: Arc<Mutex<Connection>>,
    name: &'static str,
    closed: Arc<AtomicBool>,
}

impl DuckDbTable {
    pub fn name(&self) -> &str {
        self.name
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed(self.name.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for DuckDbTable {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        self.ensure_open()?;
        let conn = self.conn.clone();
        let sql = format!("SELECT value FROM {} WHERE key = ?", self.name);
        let key = key.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(duckdb::params![key])?;

            if let Some(row) = rows.next()? {
                let json: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&json)?))
            } else {
                Ok(None)
            }
        })
        .await
        .map_err(join_error)?
    }

    async fn save(&self, key: &str, value: Value) -> Result<(), StorageError> {
        self.ensure_open()?;
        let conn = self.conn.clone();
        let sql = format!(
            "INSERT OR REPLACE INTO {} (key, value, updated_at)
             VALUES (?, ?, to_timestamp(? / 1000000.0))",
            self.name
        );
        let key = key.to_string();
        let json = serde_json::to_string(&value)?;

        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute(
                &sql,
                duckdb::params![key, json, Utc::now().timestamp_micros()],
            )?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = lock(&conn)?;
            conn.execute_batch("CHECKPOINT")?;
            Ok::<(), StorageError>(())
        })
        .await
        .map_err(join_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_save_and_get() {
        let store = DuckDbStore::in_memory().unwrap();
        let table = store.table(PUSH_STATE_TABLE).await.unwrap();

        assert!(table.get("missing").await.unwrap().is_none());

        table.save("abc", json!({"start_position": 10})).await.unwrap();
        let value = table.get("abc").await.unwrap().unwrap();
        assert_eq!(value["start_position"], 10);
    }

    #[tokio::test]
    async fn test_save_replaces_existing_value() {
        let store = DuckDbStore::in_memory().unwrap();
        let table = store.table(PUSH_STATE_TABLE).await.unwrap();

        table.save("abc", json!({"n": 1})).await.unwrap();
        table.save("abc", json!({"n": 2})).await.unwrap();
        assert_eq!(table.get("abc").await.unwrap().unwrap()["n"], 2);
    }

    #[tokio::test]
    async fn test_tables_are_independent() {
        let store = DuckDbStore::in_memory().unwrap();
        let push = store.table(PUSH_STATE_TABLE).await.unwrap();
        let stream = store.table(STREAM_STATE_TABLE).await.unwrap();

        push.save("key", json!("push")).await.unwrap();
        assert!(stream.get("key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_table_rejects_calls() {
        let store = DuckDbStore::in_memory().unwrap();
        let table = store.table(STREAM_STATE_TABLE).await.unwrap();
        table.close().await.unwrap();
        assert!(matches!(table.get("x").await, Err(StorageError::Closed(_))));
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.duckdb");

        {
            let store = DuckDbStore::open(&path).unwrap();
            let table = store.table(STREAM_STATE_TABLE).await.unwrap();
            table
                .save("web", json!({"source_id": "f00", "initial_position": 42}))
                .await
                .unwrap();
            table.close().await.unwrap();
        }

        let store = DuckDbStore::open(&path).unwrap();
        let table = store.table(STREAM_STATE_TABLE).await.unwrap();
        let value = table.get("web").await.unwrap().unwrap();
        assert_eq!(value["initial_position"], 42);
    }

    #[test]
    fn test_extract_pid() {
        assert_eq!(
            extract_pid_from_lock_error("Could not set lock on file (PID 4242) held"),
            Some(4242)
        );
        assert_eq!(extract_pid_from_lock_error("no pid here"), None);
    }
}
