//! Database manager implementation
//!
//! Owns the SQLite connection pool and runs blocking database work on the
//! tokio blocking pool.

use crate::core::error::{OnyxError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::task;

const POOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Database manager with connection pool
#[derive(Clone)]
pub struct DatabaseManager {
    pool: Pool<SqliteConnectionManager>,
    db_path: PathBuf,
}

impl DatabaseManager {
    /// Open (or create) the database file and apply pending migrations
    pub fn new(db_path: &Path, pool_size: u32, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let connections = SqliteConnectionManager::file(db_path).with_init(move |conn| {
            conn.busy_timeout(busy_timeout)?;
            conn.execute_batch("PRAGMA journal_mode = WAL;")
        });
        Self::open(connections, pool_size, db_path.to_path_buf())
    }

    /// In-memory database for tests; a single connection keeps the schema alive
    pub fn new_in_memory() -> Result<Self> {
        Self::open(SqliteConnectionManager::memory(), 1, PathBuf::from(":memory:"))
    }

    fn open(connections: SqliteConnectionManager, pool_size: u32, db_path: PathBuf) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(POOL_TIMEOUT)
            .build(connections)
            .map_err(|e| OnyxError::DbError(format!("Failed to build connection pool: {}", e)))?;

        let db = Self { pool, db_path };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| OnyxError::DbError(format!("Failed to get connection: {}", e)))
    }

    /// Execute a database operation asynchronously
    ///
    /// The closure runs inside `spawn_blocking` so SQLite never stalls the
    /// async runtime.
    pub async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        task::spawn_blocking(move || {
            let conn = pool.get().map_err(|e| OnyxError::DbError(e.to_string()))?;
            f(&conn)
        })
        .await
        .map_err(|e| OnyxError::TaskError(format!("Database task panicked: {}", e)))?
    }

    /// Bring the schema up to the latest version
    pub fn migrate(&self) -> Result<()> {
        let mut conn = self.get_connection()?;
        crate::db::migrations::run_migrations(&mut conn)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn pool_size(&self) -> u32 {
        self.pool.max_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_db() -> (DatabaseManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("test.db");
        let manager = DatabaseManager::new(&db_path, 3, Duration::from_secs(5)).unwrap();
        (manager, temp_dir)
    }

    #[test]
    fn test_database_manager_creation() {
        let (manager, temp_dir) = create_test_db();
        assert_eq!(manager.pool_size(), 3);
        assert!(temp_dir.path().join("nested").join("test.db").exists());
    }

    #[tokio::test]
    async fn test_execute_sees_migrated_schema() {
        let (manager, _temp_dir) = create_test_db();

        let exists = manager
            .execute(|conn| crate::db::migrations::tables_exist(conn))
            .await
            .unwrap();
        assert!(exists);
    }

    #[tokio::test]
    async fn test_in_memory_shares_single_connection() {
        let manager = DatabaseManager::new_in_memory().unwrap();

        manager
            .execute(|conn| {
                conn.execute(
                    "INSERT INTO modules (module_id, name, file_path) VALUES ('a', 'A', 'a/a.php')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let count: i64 = manager
            .execute(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM modules", [], |row| row.get(0))?)
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
