//! Module type definitions
//!
//! This module defines the interface compiled-in module implementations
//! provide, and the context they are handed during init and uninstall.

use crate::core::error::Result;
use std::path::PathBuf;
use std::sync::Arc;

/// Unique identifier for a module (a dash-delimited slug)
pub type ModuleId = String;

/// Base trait every module implementation type provides
///
/// One instance exists per module per process. The loader constructs it
/// through the catalog factory and calls `init` exactly once.
pub trait Module: Send + Sync {
    /// Bring the module up
    ///
    /// Returning an error (or panicking) demotes the module to inactive.
    fn init(&self, context: &ModuleContext) -> Result<()>;

    /// Whether `uninstall` does anything
    fn has_uninstall(&self) -> bool {
        false
    }

    /// Remove persistent state before the module is deleted
    fn uninstall(&self, _context: &ModuleContext) -> Result<()> {
        Ok(())
    }
}

/// Builds the singleton instance for a module type
pub type ModuleFactory = Arc<dyn Fn() -> Arc<dyn Module> + Send + Sync>;

/// Free-standing function registered in the catalog (procedural uninstall hooks)
pub type ModuleHook = Arc<dyn Fn(&ModuleContext) -> Result<()> + Send + Sync>;

/// Context passed to module entry points
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub module_id: ModuleId,
    /// Module-owned settings as stored in its record
    pub config: Option<serde_json::Value>,
    /// Directory holding the module's files
    pub module_dir: PathBuf,
}

impl ModuleContext {
    pub fn new(module_id: impl Into<ModuleId>, module_dir: PathBuf) -> Self {
        Self {
            module_id: module_id.into(),
            config: None,
            module_dir,
        }
    }

    pub fn with_config(mut self, config: Option<serde_json::Value>) -> Self {
        self.config = config;
        self
    }
}
