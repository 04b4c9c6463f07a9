//! Module system assembly
//!
//! Wires the registry services together from configuration so the binary
//! and embedding hosts share one set of collaborators.

use super::archive::{ModuleArchiver, ZipArchiver};
use super::audit::{AuditLogger, StoreAuditLogger, TracingAuditLogger};
use super::catalog::ModuleCatalog;
use super::includer::ManifestIncluder;
use super::installer::ModuleInstaller;
use super::lifecycle::LifecycleManager;
use super::loader::ModuleLoader;
use super::resolver::ClassResolver;
use super::scanner::DirectoryScanner;
use super::security::{Authorizer, PatternSecurityScanner, RoleAuthorizer};
use super::syntax::{CommandSyntaxValidator, SyntaxValidator};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::db::manager::DatabaseManager;
use crate::db::repository::{AuditLogRepository, ModuleRepository, ModuleStore};
use std::fs;
use std::sync::Arc;
use tracing::info;

pub struct ModuleManager {
    pub store: Arc<dyn ModuleStore>,
    pub audit_log: AuditLogRepository,
    pub loader: Arc<ModuleLoader>,
    pub installer: ModuleInstaller,
    pub lifecycle: LifecycleManager,
    pub scanner: DirectoryScanner,
}

impl ModuleManager {
    pub fn new(config: &Config, db: Arc<DatabaseManager>, catalog: ModuleCatalog) -> Result<Self> {
        let modules = &config.modules;
        fs::create_dir_all(&modules.module_dir)?;
        fs::create_dir_all(&modules.temp_dir)?;

        let store: Arc<dyn ModuleStore> = Arc::new(ModuleRepository::new(db.clone()));
        let audit_log = AuditLogRepository::new(db);
        let audit: Arc<dyn AuditLogger> = if config.logging.persist_audit {
            Arc::new(StoreAuditLogger::new(audit_log.clone()))
        } else {
            Arc::new(TracingAuditLogger::new())
        };
        let authorizer: Arc<dyn Authorizer> =
            Arc::new(RoleAuthorizer::from_config(&config.security));
        let syntax: Arc<dyn SyntaxValidator> =
            Arc::new(CommandSyntaxValidator::new(&modules.lint_command));
        let archiver: Option<Arc<dyn ModuleArchiver>> = if modules.archive_on_delete {
            Some(Arc::new(ZipArchiver::new(modules.archive_dir.clone())))
        } else {
            None
        };

        info!(
            types = catalog.len(),
            module_dir = ?modules.module_dir,
            "Module catalog ready"
        );

        let loader = Arc::new(ModuleLoader::new(
            store.clone(),
            ClassResolver::new(Arc::new(catalog)),
            syntax.clone(),
            Arc::new(ManifestIncluder::new()),
            audit.clone(),
            authorizer.clone(),
            modules.module_dir.clone(),
        ));

        let installer = ModuleInstaller::new(
            store.clone(),
            authorizer.clone(),
            Arc::new(PatternSecurityScanner::new(
                modules.module_dir.clone(),
                modules.source_extension.clone(),
                config.security.allowed_extensions.clone(),
                config.security.max_upload_size,
            )),
            syntax,
            audit.clone(),
            modules.module_dir.clone(),
            modules.temp_dir.clone(),
            modules.source_extension.clone(),
        );

        let lifecycle = LifecycleManager::new(
            store.clone(),
            loader.clone(),
            authorizer.clone(),
            audit.clone(),
            archiver,
        );

        let scanner = DirectoryScanner::new(
            store.clone(),
            authorizer,
            audit,
            modules.module_dir.clone(),
            modules.source_extension.clone(),
        );

        Ok(Self {
            store,
            audit_log,
            loader,
            installer,
            lifecycle,
            scanner,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::ModuleStatus;
    use crate::module::builtin::builtin_catalog;
    use crate::module::loader::testing::write_module;
    use crate::module::loader::{LoadOutcome, LoadPass};
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::defaults().unwrap();
        config.modules.module_dir = dir.path().join("modules");
        config.modules.temp_dir = dir.path().join("modules").join(".tmp");
        config.modules.archive_dir = dir.path().join("archive");
        config.modules.lint_command = Vec::new();
        config
    }

    #[tokio::test]
    async fn test_scan_activate_load_delete() {
        let dir = TempDir::new().unwrap();
        let config = config(&dir);
        let db = Arc::new(DatabaseManager::new_in_memory().unwrap());
        let manager = ModuleManager::new(&config, db, builtin_catalog()).unwrap();
        assert!(config.modules.temp_dir.is_dir());

        write_module(&config.modules.module_dir, "onyx-essentials", "onyx-essentials.php", "");
        let summary = manager.scanner.scan_and_register().await.unwrap();
        assert_eq!(summary.registered_count, 1);

        manager.lifecycle.activate("onyx-essentials").await.unwrap();
        let report = match manager.loader.load_active_modules().await {
            LoadPass::Completed(report) => report,
            other => panic!("unexpected pass result: {:?}", other),
        };
        assert_eq!(
            report.outcome_of("onyx-essentials"),
            Some(&LoadOutcome::Initialized {
                type_name: "OC_Onyx_Essentials".to_string()
            })
        );
        let record = manager.store.get_module("onyx-essentials").await.unwrap().unwrap();
        assert_eq!(record.status, ModuleStatus::Active);
        assert!(config.modules.module_dir.join("onyx-essentials").join("state").is_dir());

        manager.lifecycle.delete("onyx-essentials").await.unwrap();
        assert!(manager.store.get_module("onyx-essentials").await.unwrap().is_none());
        assert_eq!(std::fs::read_dir(&config.modules.archive_dir).unwrap().count(), 1);

        let entries = manager.audit_log.recent(20).await.unwrap();
        assert!(entries.iter().any(|e| e.summary == "Module deleted"));
        assert!(entries.iter().any(|e| e.summary == "Syntax check unavailable"));
    }
}
