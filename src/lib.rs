//! Onyx Command module registry
//!
//! This library provides the module loader and registry: record storage,
//! installation, lifecycle management and isolated loading of modules.

pub mod core;
pub mod db;
pub mod module;

// Re-export commonly used types
pub use crate::core::{Config, OnyxError};
pub use db::DatabaseManager;
pub use module::{ModuleCatalog, ModuleLoader, ModuleManager};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
