//! Graph/vector store access: SQLite connection wrapper, migrations, audit log.

use crate::error::{RagentError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::task;

pub mod audit;
pub mod migrate;

/// Store connection wrapper.
///
/// The agent core is read-only against this store; writes happen only in the
/// audit tables and through external ingestion/maintenance processes.
pub struct Store {
    path: std::path::PathBuf,
}

impl Store {
    /// Create a new store connection manager
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        Self {
            path: db_path.as_ref().to_path_buf(),
        }
    }

    /// Open a new connection with optimized pragmas
    pub fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(RagentError::Database)?;
        set_pragmas(&conn)?;
        Ok(conn)
    }

    /// Execute a closure with a store connection in a blocking task
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let path = self.path.clone();
        task::spawn_blocking(move || {
            let mut conn = Connection::open(&path).map_err(RagentError::Database)?;
            set_pragmas(&conn)?;
            f(&mut conn)
        })
        .await
        .map_err(|e| RagentError::Store(format!("blocking store task failed: {}", e)))?
    }
}

// WAL for concurrent read sessions, NORMAL sync for speed, foreign keys for
// integrity, memory temp store and a 64MB page cache for scan-heavy retrieval.
fn set_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL; \
         PRAGMA synchronous = NORMAL; \
         PRAGMA foreign_keys = ON; \
         PRAGMA temp_store = MEMORY; \
         PRAGMA cache_size = -65536; \
         PRAGMA mmap_size = 268435456;",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_store_connection() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = Store::new(&db_path);

        let result = store
            .with_connection(|conn| {
                conn.execute("CREATE TABLE test (id INTEGER PRIMARY KEY)", [])
                    .map_err(RagentError::Database)?;
                Ok(())
            })
            .await;

        assert!(result.is_ok());
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_pragmas_set() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let store = Store::new(&db_path);

        store
            .with_connection(|conn| {
                let journal_mode: String =
                    conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
                assert_eq!(journal_mode.to_uppercase(), "WAL");

                let foreign_keys: i32 =
                    conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
                assert_eq!(foreign_keys, 1);

                Ok::<(), RagentError>(())
            })
            .await
            .unwrap();
    }
}
