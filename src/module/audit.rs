//! Audit logging for module operations
//!
//! Every mutating operation and every load failure produces an audit
//! entry. `TracingAuditLogger` forwards entries to tracing;
//! `StoreAuditLogger` also persists them.

use crate::db::repository::AuditLogRepository;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info, warn};

/// Severity of an audit entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl AuditLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditLevel::Debug => "debug",
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
        }
    }
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait AuditLogger: Send + Sync {
    /// Record an entry; never fails the calling operation
    async fn log(
        &self,
        level: AuditLevel,
        summary: &str,
        detail: &str,
        context: Option<serde_json::Value>,
    );
}

fn emit(level: AuditLevel, summary: &str, detail: &str, context: &Option<serde_json::Value>) {
    let context = context
        .as_ref()
        .map(|c| c.to_string())
        .unwrap_or_default();
    match level {
        AuditLevel::Debug => debug!(target: "onyx::audit", context = %context, "{}: {}", summary, detail),
        AuditLevel::Info => info!(target: "onyx::audit", context = %context, "{}: {}", summary, detail),
        AuditLevel::Warning => warn!(target: "onyx::audit", context = %context, "{}: {}", summary, detail),
        AuditLevel::Error => error!(target: "onyx::audit", context = %context, "{}: {}", summary, detail),
    }
}

/// Audit logger backed only by tracing
#[derive(Debug, Default, Clone)]
pub struct TracingAuditLogger;

impl TracingAuditLogger {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AuditLogger for TracingAuditLogger {
    async fn log(
        &self,
        level: AuditLevel,
        summary: &str,
        detail: &str,
        context: Option<serde_json::Value>,
    ) {
        emit(level, summary, detail, &context);
    }
}

/// Audit logger that also writes to `module_audit_log`
pub struct StoreAuditLogger {
    repository: AuditLogRepository,
}

impl StoreAuditLogger {
    pub fn new(repository: AuditLogRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl AuditLogger for StoreAuditLogger {
    async fn log(
        &self,
        level: AuditLevel,
        summary: &str,
        detail: &str,
        context: Option<serde_json::Value>,
    ) {
        emit(level, summary, detail, &context);

        if let Err(e) = self
            .repository
            .insert(level.as_str(), summary, detail, context)
            .await
        {
            warn!("Failed to persist audit entry '{}': {}", summary, e);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Captures entries for assertions
    #[derive(Default)]
    pub struct RecordingAuditLogger {
        pub entries: Mutex<Vec<(AuditLevel, String, String)>>,
    }

    impl RecordingAuditLogger {
        pub fn has(&self, level: AuditLevel, summary: &str) -> bool {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .any(|(l, s, _)| *l == level && s == summary)
        }

        pub fn count(&self, level: AuditLevel) -> usize {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _, _)| *l == level)
                .count()
        }
    }

    #[async_trait]
    impl AuditLogger for RecordingAuditLogger {
        async fn log(
            &self,
            level: AuditLevel,
            summary: &str,
            detail: &str,
            _context: Option<serde_json::Value>,
        ) {
            self.entries
                .lock()
                .unwrap()
                .push((level, summary.to_string(), detail.to_string()));
        }
    }
}
