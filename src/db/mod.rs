//! Database module
//!
//! This module provides database management functionality including:
//! - Connection pool management
//! - The module record store and audit log repository
//! - Versioned migrations

pub mod manager;
pub mod migrations;
pub mod models;
pub mod repository;

pub use manager::DatabaseManager;
pub use models::{AuditLogEntry, ModuleRecord, ModuleStatus, ModuleUpdate};
pub use repository::{AuditLogRepository, ModuleRepository, ModuleStore};
