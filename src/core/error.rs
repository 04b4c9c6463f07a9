//! Error type system for Onyx Command
//!
//! This module provides the error taxonomy shared by the installer,
//! the lifecycle manager and the directory scanner:
//! - One variant per failure the caller can act on
//! - Stable snake_case codes for structured results
//! - A serializable response shape with trace IDs

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Findings of a conflict check run against a candidate module file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConflictReport {
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

impl fmt::Display for ConflictReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.errors.join("; "))
    }
}

/// Main error type for the module system
#[derive(Debug, thiserror::Error)]
pub enum OnyxError {
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module already exists: {0}")]
    ModuleExists(String),

    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("No valid module file found: {0}")]
    NoMainFile(String),

    #[error("Module conflicts detected: {0}")]
    ConflictsDetected(ConflictReport),

    #[error("Syntax errors detected in module: {0}")]
    SyntaxError(String),

    #[error("Failed to register module in database: {0}")]
    DbError(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Module file not found for uninstall: {0}")]
    ModuleFileNotFound(String),

    #[error("Failed to activate module: {0}")]
    ActivationFailed(String),

    #[error("Failed to deactivate module: {0}")]
    DeactivationFailed(String),

    #[error("Module uninstall failed: {0}")]
    UninstallFailed(String),

    #[error("Module include failed: {0}")]
    IncludeFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Task error: {0}")]
    TaskError(String),
}

impl OnyxError {
    /// Stable error code reported to callers
    pub fn error_code(&self) -> &'static str {
        match self {
            OnyxError::PermissionDenied(_) => "permission_denied",
            OnyxError::ModuleNotFound(_) => "module_not_found",
            OnyxError::ModuleExists(_) => "module_exists",
            OnyxError::InvalidModule(_) => "invalid_module",
            OnyxError::NoMainFile(_) => "no_main_file",
            OnyxError::ConflictsDetected(_) => "conflicts_detected",
            OnyxError::SyntaxError(_) => "syntax_error",
            OnyxError::DbError(_) => "db_error",
            OnyxError::UploadFailed(_) => "upload_failed",
            OnyxError::ModuleFileNotFound(_) => "module_file_not_found",
            OnyxError::ActivationFailed(_) => "activation_failed",
            OnyxError::DeactivationFailed(_) => "deactivation_failed",
            OnyxError::UninstallFailed(_) => "uninstall_failed",
            OnyxError::IncludeFailed(_) => "module_include_failed",
            OnyxError::ConfigError(_) => "config_error",
            OnyxError::DatabaseError(_) => "db_error",
            OnyxError::IoError(_) => "io_error",
            OnyxError::ArchiveError(_) => "archive_error",
            OnyxError::SerializationError(_) => "serialization_error",
            OnyxError::TaskError(_) => "task_error",
        }
    }

    /// Extra structured data worth surfacing next to the message
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            OnyxError::ConflictsDetected(report) => serde_json::to_value(report).ok(),
            _ => None,
        }
    }
}

/// Structured error result handed back to callers of mutating operations
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code from the taxonomy
    pub error: String,
    /// Human-readable error message
    pub message: String,
    /// Optional additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    /// Unique trace ID for this error
    pub trace_id: String,
}

impl ErrorResponse {
    /// Create a new error response with a generated trace ID
    pub fn new(error: String, message: String) -> Self {
        Self {
            error,
            message,
            details: None,
            trace_id: Uuid::new_v4().to_string(),
        }
    }

    /// Create an error response from an OnyxError, carrying its details
    pub fn from_error(error: &OnyxError) -> Self {
        let mut response = Self::new(error.error_code().to_string(), error.to_string());
        response.details = error.details();
        response
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}{} (trace_id: {})",
            self.error,
            self.message,
            self.details.as_ref().map_or("", |_| " with details"),
            self.trace_id
        )
    }
}

/// Result type alias for operations that can fail with OnyxError
pub type Result<T> = std::result::Result<T, OnyxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(OnyxError::PermissionDenied("x".into()).error_code(), "permission_denied");
        assert_eq!(OnyxError::ModuleNotFound("x".into()).error_code(), "module_not_found");
        assert_eq!(OnyxError::NoMainFile("x".into()).error_code(), "no_main_file");
        assert_eq!(
            OnyxError::ConflictsDetected(ConflictReport::default()).error_code(),
            "conflicts_detected"
        );
        assert_eq!(
            OnyxError::DatabaseError(rusqlite::Error::InvalidQuery).error_code(),
            "db_error"
        );
    }

    #[test]
    fn test_error_response_carries_conflicts() {
        let report = ConflictReport {
            errors: vec!["duplicate entry point".into()],
            warnings: vec!["uses eval".into()],
        };
        let response = ErrorResponse::from_error(&OnyxError::ConflictsDetected(report));

        assert_eq!(response.error, "conflicts_detected");
        assert!(response.message.contains("duplicate entry point"));
        let details = response.details.unwrap();
        assert_eq!(details["warnings"][0], "uses eval");
        assert!(!response.trace_id.is_empty());
    }

    #[test]
    fn test_error_response_without_details() {
        let response = ErrorResponse::from_error(&OnyxError::ModuleExists("foo".into()));
        assert_eq!(response.error, "module_exists");
        assert!(response.details.is_none());
        assert!(response.to_string().starts_with("[module_exists]"));
    }
}
