//! Repository pattern implementation for data access layer
//!
//! `ModuleStore` is the seam the module system talks to. `ModuleRepository`
//! is its SQLite implementation and `AuditLogRepository` persists audit
//! entries.

use crate::core::error::{OnyxError, Result};
use crate::db::manager::DatabaseManager;
use crate::db::migrations;
use crate::db::models::{AuditLogEntry, ModuleRecord, ModuleStatus, ModuleUpdate};
use async_trait::async_trait;
use rusqlite::types::{Type, Value};
use rusqlite::{OptionalExtension, Row};
use std::sync::Arc;

/// Persistent storage of module records
#[async_trait]
pub trait ModuleStore: Send + Sync {
    /// All records, optionally filtered by status, ordered by name
    async fn get_modules(&self, status: Option<ModuleStatus>) -> Result<Vec<ModuleRecord>>;

    async fn get_module(&self, module_id: &str) -> Result<Option<ModuleRecord>>;

    async fn insert_module(&self, record: &ModuleRecord) -> Result<()>;

    /// Apply a partial update; returns whether a row changed
    async fn update_module(&self, module_id: &str, update: ModuleUpdate) -> Result<bool>;

    /// Returns whether a row was removed
    async fn delete_module(&self, module_id: &str) -> Result<bool>;

    /// Whether the backing schema has been created
    async fn tables_exist(&self) -> Result<bool>;
}

const MODULE_COLUMNS: &str = "module_id, name, description, version, author, file_path, status, \
     config, last_executed, execution_count, created_at, updated_at";

fn map_module_row(row: &Row<'_>) -> rusqlite::Result<ModuleRecord> {
    let status: String = row.get(6)?;
    let status = status.parse::<ModuleStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, Type::Text, e.into())
    })?;

    let config: Option<String> = row.get(7)?;
    let config = match config {
        Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e))
        })?),
        None => None,
    };

    Ok(ModuleRecord {
        module_id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        version: row.get(3)?,
        author: row.get(4)?,
        file_path: row.get(5)?,
        status,
        config,
        last_executed: row.get(8)?,
        execution_count: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

fn config_to_text(config: &Option<serde_json::Value>) -> Result<Option<String>> {
    config
        .as_ref()
        .map(|value| {
            serde_json::to_string(value).map_err(|e| OnyxError::SerializationError(e.to_string()))
        })
        .transpose()
}

/// SQLite-backed module store
pub struct ModuleRepository {
    db: Arc<DatabaseManager>,
}

impl ModuleRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ModuleStore for ModuleRepository {
    async fn get_modules(&self, status: Option<ModuleStatus>) -> Result<Vec<ModuleRecord>> {
        self.db
            .execute(move |conn| {
                let records = match status {
                    Some(status) => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {} FROM modules WHERE status = ? ORDER BY name",
                            MODULE_COLUMNS
                        ))?;
                        let rows = stmt.query_map([status.as_str()], map_module_row)?;
                        rows.collect::<std::result::Result<Vec<_>, _>>()?
                    }
                    None => {
                        let mut stmt = conn.prepare(&format!(
                            "SELECT {} FROM modules ORDER BY name",
                            MODULE_COLUMNS
                        ))?;
                        let rows = stmt.query_map([], map_module_row)?;
                        rows.collect::<std::result::Result<Vec<_>, _>>()?
                    }
                };
                Ok(records)
            })
            .await
    }

    async fn get_module(&self, module_id: &str) -> Result<Option<ModuleRecord>> {
        let module_id = module_id.to_string();
        self.db
            .execute(move |conn| {
                conn.query_row(
                    &format!("SELECT {} FROM modules WHERE module_id = ?", MODULE_COLUMNS),
                    [&module_id],
                    map_module_row,
                )
                .optional()
                .map_err(OnyxError::DatabaseError)
            })
            .await
    }

    async fn insert_module(&self, record: &ModuleRecord) -> Result<()> {
        let record = record.clone();
        let config = config_to_text(&record.config)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO modules (module_id, name, description, version, author, \
                     file_path, status, config, last_executed, execution_count) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    rusqlite::params![
                        &record.module_id,
                        &record.name,
                        &record.description,
                        &record.version,
                        &record.author,
                        &record.file_path,
                        record.status.as_str(),
                        &config,
                        &record.last_executed,
                        record.execution_count,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    async fn update_module(&self, module_id: &str, update: ModuleUpdate) -> Result<bool> {
        let mut assignments: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(status) = update.status {
            assignments.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(file_path) = update.file_path {
            assignments.push("file_path = ?");
            values.push(Value::Text(file_path));
        }
        if let Some(config) = update.config {
            assignments.push("config = ?");
            let text = serde_json::to_string(&config)
                .map_err(|e| OnyxError::SerializationError(e.to_string()))?;
            values.push(Value::Text(text));
        }
        if let Some(last_executed) = update.last_executed {
            assignments.push("last_executed = ?");
            values.push(Value::Text(last_executed));
        }
        if let Some(count) = update.execution_count {
            assignments.push("execution_count = ?");
            values.push(Value::Integer(count));
        }
        assignments.push("updated_at = CURRENT_TIMESTAMP");
        values.push(Value::Text(module_id.to_string()));

        let sql = format!(
            "UPDATE modules SET {} WHERE module_id = ?",
            assignments.join(", ")
        );

        self.db
            .execute(move |conn| {
                let changed = conn.execute(&sql, rusqlite::params_from_iter(values))?;
                Ok(changed > 0)
            })
            .await
    }

    async fn delete_module(&self, module_id: &str) -> Result<bool> {
        let module_id = module_id.to_string();
        self.db
            .execute(move |conn| {
                let removed = conn.execute("DELETE FROM modules WHERE module_id = ?", [&module_id])?;
                Ok(removed > 0)
            })
            .await
    }

    async fn tables_exist(&self) -> Result<bool> {
        self.db.execute(|conn| migrations::tables_exist(conn)).await
    }
}

/// Repository for persisted audit entries
#[derive(Clone)]
pub struct AuditLogRepository {
    db: Arc<DatabaseManager>,
}

impl AuditLogRepository {
    pub fn new(db: Arc<DatabaseManager>) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        level: &str,
        summary: &str,
        detail: &str,
        context: Option<serde_json::Value>,
    ) -> Result<i64> {
        let level = level.to_string();
        let summary = summary.to_string();
        let detail = detail.to_string();
        let context = config_to_text(&context)?;
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO module_audit_log (level, summary, detail, context) VALUES (?, ?, ?, ?)",
                    rusqlite::params![&level, &summary, &detail, &context],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
    }

    /// Most recent entries first
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let limit = limit as i64;
        self.db
            .execute(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, level, summary, detail, context, created_at \
                     FROM module_audit_log ORDER BY id DESC LIMIT ?",
                )?;
                let entries = stmt
                    .query_map([limit], |row| {
                        let context: Option<String> = row.get(4)?;
                        Ok(AuditLogEntry {
                            id: row.get(0)?,
                            level: row.get(1)?,
                            summary: row.get(2)?,
                            detail: row.get(3)?,
                            context: context.and_then(|text| serde_json::from_str(&text).ok()),
                            created_at: row.get(5)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> ModuleRepository {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        ModuleRepository::new(db)
    }

    #[tokio::test]
    async fn test_insert_and_get() {
        let repo = setup();
        let mut record = ModuleRecord::new_inactive("onyx-essentials", "Onyx Essentials", "onyx-essentials/main.php");
        record.config = Some(json!({"enabled": true}));
        repo.insert_module(&record).await.unwrap();

        let loaded = repo.get_module("onyx-essentials").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Onyx Essentials");
        assert_eq!(loaded.status, ModuleStatus::Inactive);
        assert_eq!(loaded.config, Some(json!({"enabled": true})));
        assert!(!loaded.created_at.is_empty());

        assert!(repo.get_module("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_insert_fails() {
        let repo = setup();
        let record = ModuleRecord::new_inactive("foo", "Foo", "foo/main.php");
        repo.insert_module(&record).await.unwrap();
        assert!(repo.insert_module(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_filter_by_status() {
        let repo = setup();
        repo.insert_module(&ModuleRecord::new_inactive("a", "A", "a/a.php")).await.unwrap();
        repo.insert_module(&ModuleRecord::new_inactive("b", "B", "b/b.php")).await.unwrap();
        repo.update_module("b", ModuleUpdate::status(ModuleStatus::Active)).await.unwrap();

        let active = repo.get_modules(Some(ModuleStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].module_id, "b");
        assert_eq!(repo.get_modules(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_partial_update() {
        let repo = setup();
        repo.insert_module(&ModuleRecord::new_inactive("a", "A", "a/a.php")).await.unwrap();

        let update = ModuleUpdate {
            file_path: Some("a/new.php".to_string()),
            execution_count: Some(3),
            ..Default::default()
        };
        assert!(repo.update_module("a", update).await.unwrap());

        let record = repo.get_module("a").await.unwrap().unwrap();
        assert_eq!(record.file_path, "a/new.php");
        assert_eq!(record.execution_count, 3);
        assert_eq!(record.status, ModuleStatus::Inactive);

        assert!(!repo
            .update_module("missing", ModuleUpdate::status(ModuleStatus::Active))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = setup();
        repo.insert_module(&ModuleRecord::new_inactive("a", "A", "a/a.php")).await.unwrap();
        assert!(repo.delete_module("a").await.unwrap());
        assert!(!repo.delete_module("a").await.unwrap());
        assert!(repo.tables_exist().await.unwrap());
    }

    #[tokio::test]
    async fn test_audit_log_recent_order() {
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let audit = AuditLogRepository::new(db);

        audit.insert("info", "Module installed", "foo", None).await.unwrap();
        audit
            .insert("error", "Syntax error", "bar", Some(json!({"module_id": "bar"})))
            .await
            .unwrap();

        let entries = audit.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].summary, "Syntax error");
        assert_eq!(entries[0].context, Some(json!({"module_id": "bar"})));
        assert_eq!(audit.recent(1).await.unwrap().len(), 1);
    }
}
