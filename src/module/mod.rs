//! Module system
//!
//! Installs, registers, loads and tears down Onyx Command modules:
//! - Compiled-in catalog of module types and hook functions
//! - Manifest parsing and entry point resolution
//! - Isolated loading with per-module demotion on failure
//! - Install from source files or zip archives with conflict scanning
//! - Activation, configuration and deletion with archiving

pub mod archive;
pub mod audit;
pub mod builtin;
pub mod catalog;
pub mod includer;
pub mod installer;
pub mod lifecycle;
pub mod loader;
pub mod manager;
pub mod manifest;
pub mod resolver;
pub mod scanner;
pub mod security;
pub mod syntax;
pub mod types;

pub use archive::{ModuleArchiver, ZipArchiver};
pub use audit::{AuditLevel, AuditLogger, StoreAuditLogger, TracingAuditLogger};
pub use builtin::builtin_catalog;
pub use catalog::ModuleCatalog;
pub use includer::{ManifestIncluder, ModuleIncluder};
pub use installer::{InstallOutcome, ModuleInstaller};
pub use lifecycle::LifecycleManager;
pub use loader::{ExecuteOutcome, LoadOutcome, LoadPass, LoadReport, ModuleLoader};
pub use manager::ModuleManager;
pub use manifest::ModuleHeaders;
pub use resolver::ClassResolver;
pub use scanner::{DirectoryScanner, ScanSummary};
pub use security::{Authorizer, RoleAuthorizer, SecurityScanner, UploadedFile};
pub use syntax::{CommandSyntaxValidator, SyntaxCheck, SyntaxValidator};
pub use types::{Module, ModuleContext, ModuleFactory, ModuleHook, ModuleId};
