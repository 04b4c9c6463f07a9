//! Module lifecycle management
//!
//! Activation, deactivation, configuration and deletion of installed
//! modules. Status changes only take effect at the next load pass; nothing
//! here loads or unloads module code, except the uninstall hook that
//! deletion runs.

use super::archive::ModuleArchiver;
use super::audit::{AuditLevel, AuditLogger};
use super::loader::ModuleLoader;
use super::security::{sanitize_config, Authorizer};
use crate::core::error::{OnyxError, Result};
use crate::db::models::{ModuleRecord, ModuleStatus, ModuleUpdate};
use crate::db::repository::ModuleStore;
use serde_json::{json, Value};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::info;

pub struct LifecycleManager {
    store: Arc<dyn ModuleStore>,
    loader: Arc<ModuleLoader>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditLogger>,
    archiver: Option<Arc<dyn ModuleArchiver>>,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn ModuleStore>,
        loader: Arc<ModuleLoader>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditLogger>,
        archiver: Option<Arc<dyn ModuleArchiver>>,
    ) -> Self {
        Self {
            store,
            loader,
            authorizer,
            audit,
            archiver,
        }
    }

    async fn require_module(&self, module_id: &str) -> Result<ModuleRecord> {
        self.store
            .get_module(module_id)
            .await?
            .ok_or_else(|| OnyxError::ModuleNotFound(module_id.to_string()))
    }

    /// `<module_root>/<id>` when the id names a direct child of the root
    fn owned_dir(&self, module_id: &str) -> Option<PathBuf> {
        let mut components = Path::new(module_id).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => Some(self.loader.module_root().join(name)),
            _ => None,
        }
    }

    /// Mark a module active; its code loads on the next load pass
    pub async fn activate(&self, module_id: &str) -> Result<()> {
        self.authorizer.require("activate modules")?;
        let record = self.require_module(module_id).await?;

        let updated = self
            .store
            .update_module(module_id, ModuleUpdate::status(ModuleStatus::Active))
            .await
            .map_err(|e| OnyxError::ActivationFailed(e.to_string()))?;
        if !updated {
            return Err(OnyxError::ActivationFailed(module_id.to_string()));
        }

        self.audit
            .log(
                AuditLevel::Info,
                "Module activated",
                &record.name,
                Some(json!({ "module_id": module_id })),
            )
            .await;
        info!(module_id = %module_id, "Module activated");
        Ok(())
    }

    pub async fn deactivate(&self, module_id: &str) -> Result<()> {
        self.authorizer.require("deactivate modules")?;

        let updated = self
            .store
            .update_module(module_id, ModuleUpdate::status(ModuleStatus::Inactive))
            .await
            .map_err(|e| OnyxError::DeactivationFailed(e.to_string()))?;
        if !updated {
            return Err(OnyxError::DeactivationFailed(module_id.to_string()));
        }

        self.audit
            .log(
                AuditLevel::Info,
                "Module deactivated",
                module_id,
                Some(json!({ "module_id": module_id })),
            )
            .await;
        info!(module_id = %module_id, "Module deactivated");
        Ok(())
    }

    /// Store sanitized module settings; returns what was stored
    pub async fn update_config(&self, module_id: &str, config: Value) -> Result<Value> {
        self.authorizer.require("configure modules")?;
        let sanitized = sanitize_config(config)?;
        self.require_module(module_id).await?;

        self.store
            .update_module(module_id, ModuleUpdate::config(sanitized.clone()))
            .await?;

        self.audit
            .log(
                AuditLevel::Info,
                "Module configuration updated",
                module_id,
                Some(json!({ "module_id": module_id })),
            )
            .await;
        Ok(sanitized)
    }

    /// Remove a module: uninstall hook, archive, files, record
    ///
    /// Hook and archive failures are audited as warnings and never block the
    /// removal.
    pub async fn delete(&self, module_id: &str) -> Result<()> {
        self.authorizer.require("delete modules")?;
        let record = self.require_module(module_id).await?;
        let module_dir = self.owned_dir(module_id);

        if let Err(e) = self.loader.run_uninstall(&record).await {
            self.audit
                .log(
                    AuditLevel::Warning,
                    "Module uninstall failed",
                    &e.to_string(),
                    Some(json!({ "module_id": module_id, "error": e.error_code() })),
                )
                .await;
        }

        if module_dir.is_none() {
            self.audit
                .log(
                    AuditLevel::Warning,
                    "Module directory outside module root",
                    module_id,
                    Some(json!({ "module_id": module_id })),
                )
                .await;
        }

        if let (Some(archiver), Some(dir)) = (&self.archiver, &module_dir) {
            let archiver = archiver.clone();
            let archived_record = record.clone();
            let dir = dir.clone();
            let result = task::spawn_blocking(move || archiver.archive(&archived_record, &dir))
                .await
                .map_err(|e| OnyxError::TaskError(e.to_string()))
                .and_then(|r| r);

            if let Err(e) = result {
                self.audit
                    .log(
                        AuditLevel::Warning,
                        "Module archive failed",
                        &e.to_string(),
                        Some(json!({ "module_id": module_id })),
                    )
                    .await;
            }
        }

        if let Some(dir) = module_dir.filter(|dir| dir.exists()) {
            fs::remove_dir_all(&dir)?;
        }

        self.store.delete_module(module_id).await?;

        self.audit
            .log(
                AuditLevel::Info,
                "Module deleted",
                &record.name,
                Some(json!({ "module_id": module_id })),
            )
            .await;
        info!(module_id = %module_id, "Module deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::archive::ZipArchiver;
    use crate::module::catalog::ModuleCatalog;
    use crate::module::loader::testing::*;
    use crate::module::loader::LoadPass;
    use std::sync::atomic::Ordering;

    fn lifecycle(h: &Harness, authorizer: Arc<dyn Authorizer>, archive: bool) -> LifecycleManager {
        let archiver: Option<Arc<dyn ModuleArchiver>> = if archive {
            Some(Arc::new(ZipArchiver::new(h.dir.path().join("archive"))))
        } else {
            None
        };
        LifecycleManager::new(
            h.store.clone(),
            h.loader.clone(),
            authorizer,
            h.audit.clone(),
            archiver,
        )
    }

    async fn install_inactive(h: &Harness, module_id: &str) {
        let path = write_module(&h.root(), module_id, "main.php", "");
        h.store
            .insert_module(&ModuleRecord::new_inactive(module_id, module_id, path))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_activate_does_not_load_code() {
        let counters = Counters::default();
        let mut catalog = ModuleCatalog::new();
        let c = counters.clone();
        catalog.register_type("Lazy_Module", move || c.probe(false, false, false));
        let h = harness(catalog, Arc::new(AllowAll));
        install_inactive(&h, "lazy-module").await;
        let manager = lifecycle(&h, Arc::new(AllowAll), false);

        manager.activate("lazy-module").await.unwrap();
        assert_eq!(h.status("lazy-module").await, ModuleStatus::Active);
        assert_eq!(counters.inits.load(Ordering::SeqCst), 0);
        assert!(!h.loader.is_loaded("lazy-module").await);
        assert!(h.audit.has(AuditLevel::Info, "Module activated"));

        assert!(matches!(h.loader.load_active_modules().await, LoadPass::Completed(_)));
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_activate_missing_module() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        let manager = lifecycle(&h, Arc::new(AllowAll), false);
        let err = manager.activate("nope").await.unwrap_err();
        assert_eq!(err.error_code(), "module_not_found");
    }

    #[tokio::test]
    async fn test_deactivate() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        h.add_active("tool", "tool/main.php").await;
        let manager = lifecycle(&h, Arc::new(AllowAll), false);

        manager.deactivate("tool").await.unwrap();
        assert_eq!(h.status("tool").await, ModuleStatus::Inactive);

        let err = manager.deactivate("nope").await.unwrap_err();
        assert_eq!(err.error_code(), "deactivation_failed");
    }

    #[tokio::test]
    async fn test_operations_require_authorization() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        install_inactive(&h, "tool").await;
        let manager = lifecycle(&h, Arc::new(DenyAll), false);

        for err in [
            manager.activate("tool").await.unwrap_err(),
            manager.deactivate("tool").await.unwrap_err(),
            manager.update_config("tool", json!({})).await.unwrap_err(),
            manager.delete("tool").await.unwrap_err(),
        ] {
            assert_eq!(err.error_code(), "permission_denied");
        }
        assert_eq!(h.status("tool").await, ModuleStatus::Inactive);
    }

    #[tokio::test]
    async fn test_update_config_sanitizes() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        install_inactive(&h, "tool").await;
        let manager = lifecycle(&h, Arc::new(AllowAll), false);

        let stored = manager
            .update_config("tool", json!({"label": " Hi ", "no spaces": 1}))
            .await
            .unwrap();
        assert_eq!(stored, json!({"label": "Hi"}));

        let record = h.store.get_module("tool").await.unwrap().unwrap();
        assert_eq!(record.config, Some(json!({"label": "Hi"})));

        let err = manager.update_config("tool", json!("text")).await.unwrap_err();
        assert_eq!(err.error_code(), "invalid_module");
        let err = manager.update_config("nope", json!({})).await.unwrap_err();
        assert_eq!(err.error_code(), "module_not_found");
    }

    #[tokio::test]
    async fn test_delete_proceeds_when_uninstall_fails() {
        let counters = Counters::default();
        let mut catalog = ModuleCatalog::new();
        let c = counters.clone();
        catalog.register_type("Fragile_Module", move || c.probe(false, false, true));
        let h = harness(catalog, Arc::new(AllowAll));
        install_inactive(&h, "fragile-module").await;
        let manager = lifecycle(&h, Arc::new(AllowAll), true);

        manager.delete("fragile-module").await.unwrap();

        assert_eq!(counters.uninstalls.load(Ordering::SeqCst), 1);
        assert!(!h.root().join("fragile-module").exists());
        assert!(h.store.get_module("fragile-module").await.unwrap().is_none());
        assert!(h.audit.has(AuditLevel::Warning, "Module uninstall failed"));
        assert!(h.audit.has(AuditLevel::Info, "Module deleted"));

        let archived: Vec<_> = fs::read_dir(h.dir.path().join("archive")).unwrap().collect();
        assert_eq!(archived.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_never_leaves_module_root() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        fs::write(h.dir.path().join("keep.txt"), "outside").unwrap();
        for id in ["..", "../sibling"] {
            h.store
                .insert_module(&ModuleRecord::new_inactive(id, "Escape", "escape/main.php"))
                .await
                .unwrap();
        }
        fs::create_dir_all(h.dir.path().join("sibling")).unwrap();
        let manager = lifecycle(&h, Arc::new(AllowAll), true);

        manager.delete("..").await.unwrap();
        manager.delete("../sibling").await.unwrap();

        assert!(h.dir.path().join("keep.txt").is_file());
        assert!(h.dir.path().join("sibling").is_dir());
        assert!(h.root().is_dir());
        assert!(!h.dir.path().join("archive").exists());
        assert!(h.store.get_module("..").await.unwrap().is_none());
        assert_eq!(h.audit.count(AuditLevel::Warning), 4);
    }

    #[tokio::test]
    async fn test_delete_with_missing_files() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        h.store
            .insert_module(&ModuleRecord::new_inactive("ghost", "Ghost", "ghost/main.php"))
            .await
            .unwrap();
        let manager = lifecycle(&h, Arc::new(AllowAll), false);

        manager.delete("ghost").await.unwrap();
        assert!(h.store.get_module("ghost").await.unwrap().is_none());
        assert_eq!(h.audit.count(AuditLevel::Warning), 1);

        let err = manager.delete("ghost").await.unwrap_err();
        assert_eq!(err.error_code(), "module_not_found");
    }
}
