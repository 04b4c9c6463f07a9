//! Database migrations
//!
//! Versioned schema changes tracked in `schema_migrations`. Each version is
//! applied inside its own transaction.

use crate::core::error::{OnyxError, Result};
use rusqlite::Connection;
use tracing::{info, warn};

/// Migration version tracking table
const MIGRATION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    applied_at DATETIME DEFAULT CURRENT_TIMESTAMP
)
"#;

/// Initial schema migration (version 1)
const MIGRATION_V1: &str = r#"
CREATE TABLE IF NOT EXISTS modules (
    module_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    version TEXT NOT NULL DEFAULT '1.0.0',
    author TEXT NOT NULL DEFAULT '',
    file_path TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'inactive' CHECK (status IN ('active', 'inactive')),
    config TEXT,
    last_executed TEXT,
    execution_count INTEGER NOT NULL DEFAULT 0,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_modules_status ON modules(status);
"#;

/// Audit log (version 2)
const MIGRATION_V2: &str = r#"
CREATE TABLE IF NOT EXISTS module_audit_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    level TEXT NOT NULL,
    summary TEXT NOT NULL,
    detail TEXT NOT NULL DEFAULT '',
    context TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_module_audit_log_created ON module_audit_log(created_at);
"#;

/// Run all pending migrations
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    conn.execute_batch(MIGRATION_TABLE)?;

    let current_version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    info!("Current database schema version: {}", current_version);

    if current_version < 1 {
        info!("Applying migration v1: Module records");
        apply_migration(conn, 1, MIGRATION_V1)?;
    }

    if current_version < 2 {
        info!("Applying migration v2: Module audit log");
        apply_migration(conn, 2, MIGRATION_V2)?;
    }

    Ok(())
}

/// Whether the module tables are present; used to detect a first-install race
pub fn tables_exist(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'modules'",
        [],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Apply a single migration
fn apply_migration(conn: &mut Connection, version: i64, sql: &str) -> Result<()> {
    let tx = conn.transaction()?;

    tx.execute_batch(sql).map_err(|e| {
        warn!("Migration v{} failed: {}", version, e);
        OnyxError::DatabaseError(e)
    })?;

    tx.execute("INSERT INTO schema_migrations (version) VALUES (?)", [version])?;
    tx.commit()?;

    info!("Migration v{} applied successfully", version);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert!(!tables_exist(&conn).unwrap());

        run_migrations(&mut conn).unwrap();
        run_migrations(&mut conn).unwrap();

        assert!(tables_exist(&conn).unwrap());
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, 2);
    }

    #[test]
    fn test_status_constraint() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_migrations(&mut conn).unwrap();

        let result = conn.execute(
            "INSERT INTO modules (module_id, name, file_path, status) VALUES ('a', 'A', 'a/a.php', 'enabled')",
            [],
        );
        assert!(result.is_err());
    }
}
