//! Database models
//!
//! Row types for the `modules` and `module_audit_log` tables.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted lifecycle state of a module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Active,
    Inactive,
}

impl ModuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleStatus::Active => "active",
            ModuleStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(ModuleStatus::Active),
            "inactive" => Ok(ModuleStatus::Inactive),
            other => Err(format!("unknown module status: {}", other)),
        }
    }
}

/// Module record in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub module_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    /// Main file, relative to the module root (`<dir>/<file>`)
    pub file_path: String,
    pub status: ModuleStatus,
    /// Module-owned settings; never inspected by the loader
    pub config: Option<serde_json::Value>,
    pub last_executed: Option<String>,
    pub execution_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ModuleRecord {
    /// A fresh, inactive record ready for insertion
    pub fn new_inactive(
        module_id: impl Into<String>,
        name: impl Into<String>,
        file_path: impl Into<String>,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            name: name.into(),
            description: String::new(),
            version: "1.0.0".to_string(),
            author: String::new(),
            file_path: file_path.into(),
            status: ModuleStatus::Inactive,
            config: None,
            last_executed: None,
            execution_count: 0,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ModuleStatus::Active
    }
}

/// Partial update of a module record; only `Some` fields are written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleUpdate {
    pub status: Option<ModuleStatus>,
    pub file_path: Option<String>,
    pub config: Option<serde_json::Value>,
    pub last_executed: Option<String>,
    pub execution_count: Option<i64>,
}

impl ModuleUpdate {
    pub fn status(status: ModuleStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn file_path(path: impl Into<String>) -> Self {
        Self {
            file_path: Some(path.into()),
            ..Default::default()
        }
    }

    pub fn config(config: serde_json::Value) -> Self {
        Self {
            config: Some(config),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Persisted audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub level: String,
    pub summary: String,
    pub detail: String,
    pub context: Option<serde_json::Value>,
    pub created_at: String,
}
