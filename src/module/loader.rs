//! Module loader
//!
//! Brings every active module up once per process. Each module is handled
//! in isolation: a missing file, a syntax error, a failed include or a
//! failing init demotes that module to inactive and the pass moves on.
//!
//! The loader also owns the process registry of included modules and their
//! singleton instances, which the uninstall runner reuses.

use super::audit::{AuditLevel, AuditLogger};
use super::includer::{self, ModuleIncluder};
use super::manifest::ModuleHeaders;
use super::resolver::ClassResolver;
use super::security::Authorizer;
use super::syntax::{self, SyntaxCheck, SyntaxValidator};
use super::types::{Module, ModuleContext, ModuleId};
use crate::core::error::{OnyxError, Result};
use crate::db::models::{ModuleRecord, ModuleStatus, ModuleUpdate};
use crate::db::repository::ModuleStore;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task;
use tracing::{debug, error, info, warn};

/// What happened to one module during a load
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum LoadOutcome {
    Initialized { type_name: String },
    /// Included, but no implementation type with an entry point was found
    Passive { reason: String },
    MissingFile { path: String },
    SyntaxError { output: String },
    IncludeFailed { error: String },
    InitFailed { error: String },
}

impl LoadOutcome {
    /// Whether this outcome set the module inactive
    pub fn is_demotion(&self) -> bool {
        matches!(
            self,
            LoadOutcome::MissingFile { .. }
                | LoadOutcome::SyntaxError { .. }
                | LoadOutcome::IncludeFailed { .. }
                | LoadOutcome::InitFailed { .. }
        )
    }

    /// Whether the module source made it into the process
    pub fn was_included(&self) -> bool {
        matches!(
            self,
            LoadOutcome::Initialized { .. } | LoadOutcome::Passive { .. } | LoadOutcome::InitFailed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleLoadResult {
    pub module_id: ModuleId,
    #[serde(flatten)]
    pub outcome: LoadOutcome,
}

/// Per-module results of a load pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub results: Vec<ModuleLoadResult>,
}

impl LoadReport {
    pub fn initialized(&self) -> Vec<&ModuleLoadResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, LoadOutcome::Initialized { .. }))
            .collect()
    }

    pub fn demoted(&self) -> Vec<&ModuleLoadResult> {
        self.results.iter().filter(|r| r.outcome.is_demotion()).collect()
    }

    pub fn passive(&self) -> Vec<&ModuleLoadResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, LoadOutcome::Passive { .. }))
            .collect()
    }

    pub fn outcome_of(&self, module_id: &str) -> Option<&LoadOutcome> {
        self.results
            .iter()
            .find(|r| r.module_id == module_id)
            .map(|r| &r.outcome)
    }
}

/// Result of `load_active_modules`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum LoadPass {
    /// A pass already started in this process
    AlreadyRan,
    /// The record store has no schema yet (first-install race)
    SchemaMissing,
    /// The active records could not be read
    Aborted { error: String },
    Completed(LoadReport),
}

/// Result of `execute_module`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecuteOutcome {
    AlreadyLoaded,
    /// Absent or inactive
    NotActive,
    Ran(LoadOutcome),
}

/// Process registry entry for an included module
#[derive(Clone)]
pub struct LoadedModule {
    pub module_id: ModuleId,
    pub entry_point: Option<String>,
    pub type_name: Option<String>,
    pub instance: Option<Arc<dyn Module>>,
}

pub struct ModuleLoader {
    store: Arc<dyn ModuleStore>,
    resolver: ClassResolver,
    syntax: Arc<dyn SyntaxValidator>,
    includer: Arc<dyn ModuleIncluder>,
    audit: Arc<dyn AuditLogger>,
    authorizer: Arc<dyn Authorizer>,
    module_root: PathBuf,
    loaded: RwLock<HashMap<ModuleId, LoadedModule>>,
    /// Serializes bring-up so no module is included twice
    bring_up_lock: Mutex<()>,
    pass_started: AtomicBool,
}

impl ModuleLoader {
    pub fn new(
        store: Arc<dyn ModuleStore>,
        resolver: ClassResolver,
        syntax: Arc<dyn SyntaxValidator>,
        includer: Arc<dyn ModuleIncluder>,
        audit: Arc<dyn AuditLogger>,
        authorizer: Arc<dyn Authorizer>,
        module_root: PathBuf,
    ) -> Self {
        Self {
            store,
            resolver,
            syntax,
            includer,
            audit,
            authorizer,
            module_root,
            loaded: RwLock::new(HashMap::new()),
            bring_up_lock: Mutex::new(()),
            pass_started: AtomicBool::new(false),
        }
    }

    pub fn module_root(&self) -> &Path {
        &self.module_root
    }

    /// Load every active module; runs at most once per process
    pub async fn load_active_modules(&self) -> LoadPass {
        if self.pass_started.swap(true, Ordering::SeqCst) {
            debug!("Module load pass already ran");
            return LoadPass::AlreadyRan;
        }

        match self.store.tables_exist().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Module tables don't exist yet, skipping load pass");
                return LoadPass::SchemaMissing;
            }
            Err(e) => {
                debug!("Could not check module tables, skipping load pass: {}", e);
                return LoadPass::SchemaMissing;
            }
        }

        let active = match self.store.get_modules(Some(ModuleStatus::Active)).await {
            Ok(active) => active,
            Err(e) => {
                error!("Module loading error: {}", e);
                return LoadPass::Aborted {
                    error: e.to_string(),
                };
            }
        };

        info!("Found {} active module(s) to load", active.len());

        let mut report = LoadReport::default();
        for record in active {
            let _guard = self.bring_up_lock.lock().await;
            if self.is_loaded(&record.module_id).await {
                debug!(module_id = %record.module_id, "Module already included, skipping");
                continue;
            }

            let outcome = self.bring_up(&record).await;
            report.results.push(ModuleLoadResult {
                module_id: record.module_id.clone(),
                outcome,
            });
        }

        info!(
            initialized = report.initialized().len(),
            passive = report.passive().len(),
            demoted = report.demoted().len(),
            "Module load pass finished"
        );

        LoadPass::Completed(report)
    }

    /// Re-trigger a single active module that is not yet included
    pub async fn execute_module(&self, module_id: &str) -> Result<ExecuteOutcome> {
        self.authorizer.require("execute modules")?;

        let _guard = self.bring_up_lock.lock().await;
        if self.is_loaded(module_id).await {
            return Ok(ExecuteOutcome::AlreadyLoaded);
        }

        let record = match self.store.get_module(module_id).await? {
            Some(record) if record.is_active() => record,
            _ => return Ok(ExecuteOutcome::NotActive),
        };

        let outcome = self.bring_up(&record).await;

        if outcome.was_included() {
            let update = ModuleUpdate {
                last_executed: Some(Utc::now().to_rfc3339()),
                execution_count: Some(record.execution_count + 1),
                ..Default::default()
            };
            if let Err(e) = self.store.update_module(module_id, update).await {
                warn!(module_id = %module_id, "Failed to record execution: {}", e);
            }
        }

        Ok(ExecuteOutcome::Ran(outcome))
    }

    pub async fn get_active_modules(&self) -> Result<Vec<ModuleRecord>> {
        self.store.get_modules(Some(ModuleStatus::Active)).await
    }

    pub async fn is_loaded(&self, module_id: &str) -> bool {
        self.loaded.read().await.contains_key(module_id)
    }

    /// Ids of every module included in this process, sorted
    pub async fn loaded_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<ModuleId> = self.loaded.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn loaded_module(&self, module_id: &str) -> Option<LoadedModule> {
        self.loaded.read().await.get(module_id).cloned()
    }

    fn context_for(&self, record: &ModuleRecord) -> ModuleContext {
        let module_dir = Path::new(&record.file_path)
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .map(|parent| self.module_root.join(parent))
            .unwrap_or_else(|| self.module_root.clone());
        ModuleContext::new(record.module_id.clone(), module_dir).with_config(record.config.clone())
    }

    async fn demote(&self, module_id: &str, reason: &str) {
        match self
            .store
            .update_module(module_id, ModuleUpdate::status(ModuleStatus::Inactive))
            .await
        {
            Ok(_) => warn!(module_id = %module_id, "Module demoted to inactive: {}", reason),
            Err(e) => error!(module_id = %module_id, "Failed to demote module: {}", e),
        }
    }

    /// Steps a through e for one record; callers hold `bring_up_lock`
    async fn bring_up(&self, record: &ModuleRecord) -> LoadOutcome {
        let module_id = record.module_id.as_str();
        let path = self.module_root.join(&record.file_path);
        info!(module_id = %module_id, "Loading module from {}", path.display());

        if !path.is_file() {
            let shown = path.display().to_string();
            error!(module_id = %module_id, "Module file not found - {}", shown);
            self.demote(module_id, "file not found").await;
            self.audit
                .log(
                    AuditLevel::Error,
                    "Module file not found",
                    &shown,
                    Some(json!({ "module_id": module_id })),
                )
                .await;
            return LoadOutcome::MissingFile { path: shown };
        }

        match syntax::check_blocking(self.syntax.clone(), path.clone()).await {
            SyntaxCheck::Valid => {}
            SyntaxCheck::SyntaxError(output) => {
                error!(module_id = %module_id, "Module has syntax error: {}", output);
                self.demote(module_id, "syntax error").await;
                self.audit
                    .log(
                        AuditLevel::Error,
                        "Module syntax error",
                        &output,
                        Some(json!({ "module_id": module_id, "file": path.display().to_string() })),
                    )
                    .await;
                return LoadOutcome::SyntaxError { output };
            }
            SyntaxCheck::Unavailable(reason) => {
                self.audit
                    .log(
                        AuditLevel::Warning,
                        "Syntax check unavailable",
                        &reason,
                        Some(json!({ "module_id": module_id })),
                    )
                    .await;
            }
        }

        let headers = match includer::include_isolated(self.includer.clone(), record.clone(), path.clone()).await {
            Ok(headers) => headers,
            Err(e) => {
                let message = e.to_string();
                error!(module_id = %module_id, "Module loading failed - {}", message);
                self.demote(module_id, "include failed").await;
                self.audit
                    .log(
                        AuditLevel::Error,
                        "Module loading failed",
                        &message,
                        Some(json!({ "module_id": module_id })),
                    )
                    .await;
                return LoadOutcome::IncludeFailed { error: message };
            }
        };

        self.mark_included(record, &headers).await;
        debug!(module_id = %module_id, "Module file included successfully");

        self.initialize(record, &headers).await
    }

    async fn mark_included(&self, record: &ModuleRecord, headers: &ModuleHeaders) {
        self.loaded.write().await.insert(
            record.module_id.clone(),
            LoadedModule {
                module_id: record.module_id.clone(),
                entry_point: headers.entry_point.clone(),
                type_name: None,
                instance: None,
            },
        );
    }

    async fn initialize(&self, record: &ModuleRecord, headers: &ModuleHeaders) -> LoadOutcome {
        let module_id = record.module_id.as_str();

        let type_name = match self
            .resolver
            .resolve(module_id, headers.entry_point.as_deref())
        {
            Some(type_name) => type_name,
            None => {
                let tried = match headers.entry_point.as_deref() {
                    Some(declared) => declared.to_string(),
                    None => super::resolver::candidate_names(module_id).join(", "),
                };
                warn!(module_id = %module_id, "Could not find type for module. Tried: {}", tried);
                return LoadOutcome::Passive {
                    reason: format!("no implementation type found (tried {})", tried),
                };
            }
        };

        let factory = match self.resolver.catalog().factory(&type_name) {
            Some(factory) => factory,
            None => {
                warn!(module_id = %module_id, "Type {} has no entry point", type_name);
                self.set_type(module_id, &type_name, None).await;
                return LoadOutcome::Passive {
                    reason: format!("type {} has no entry point", type_name),
                };
            }
        };

        let context = self.context_for(record);
        let result = task::spawn_blocking(move || {
            includer::catch_panic(|| {
                let instance = factory();
                instance.init(&context).map(|_| instance)
            })
        })
        .await;

        let failure = match result {
            Ok(Ok(Ok(instance))) => {
                info!(module_id = %module_id, "Module initialized successfully ({})", type_name);
                self.set_type(module_id, &type_name, Some(instance)).await;
                return LoadOutcome::Initialized { type_name };
            }
            Ok(Ok(Err(e))) => e.to_string(),
            Ok(Err(caught)) => format!("panicked: {}", caught),
            Err(e) => format!("init task failed: {}", e),
        };

        error!(module_id = %module_id, "Module initialization failed - {}", failure);
        self.set_type(module_id, &type_name, None).await;
        self.demote(module_id, "initialization failed").await;
        self.audit
            .log(
                AuditLevel::Error,
                "Module initialization failed",
                &failure,
                Some(json!({ "module_id": module_id, "type": type_name })),
            )
            .await;
        LoadOutcome::InitFailed { error: failure }
    }

    async fn set_type(&self, module_id: &str, type_name: &str, instance: Option<Arc<dyn Module>>) {
        if let Some(entry) = self.loaded.write().await.get_mut(module_id) {
            entry.type_name = Some(type_name.to_string());
            entry.instance = instance;
        }
    }

    /// Run a module's uninstall hook ahead of deletion
    pub async fn run_uninstall(&self, record: &ModuleRecord) -> Result<()> {
        let module_id = record.module_id.as_str();
        let path = self.module_root.join(&record.file_path);

        if !path.is_file() {
            return Err(OnyxError::ModuleFileNotFound(path.display().to_string()));
        }

        let entry_point = {
            let _guard = self.bring_up_lock.lock().await;
            match self.loaded_module(module_id).await {
                Some(loaded) => loaded.entry_point,
                None => {
                    let headers =
                        includer::include_isolated(self.includer.clone(), record.clone(), path.clone())
                            .await?;
                    self.mark_included(record, &headers).await;
                    headers.entry_point
                }
            }
        };

        let context = self.context_for(record);

        let type_name = match self.resolver.resolve(module_id, entry_point.as_deref()) {
            Some(type_name) => type_name,
            None => {
                let function_name = format!("{}_uninstall", module_id.replace('-', "_"));
                let hook = match self.resolver.catalog().function(&function_name) {
                    Some(hook) => hook,
                    None => return Ok(()),
                };

                let result = task::spawn_blocking(move || {
                    includer::catch_panic(|| hook(&context))
                })
                .await;
                flatten_hook_result(result)?;

                self.audit
                    .log(
                        AuditLevel::Info,
                        "Module uninstall executed (function)",
                        &record.name,
                        Some(json!({ "module_id": module_id })),
                    )
                    .await;
                return Ok(());
            }
        };

        let existing = self
            .loaded_module(module_id)
            .await
            .and_then(|loaded| loaded.instance);
        let instance = match existing {
            Some(instance) => instance,
            None => match self.resolver.catalog().factory(&type_name) {
                Some(factory) => {
                    let built = task::spawn_blocking(move || {
                        includer::catch_panic(|| factory())
                    })
                    .await;
                    match built {
                        Ok(Ok(instance)) => instance,
                        Ok(Err(caught)) => {
                            return Err(OnyxError::UninstallFailed(format!("panicked: {}", caught)))
                        }
                        Err(e) => return Err(OnyxError::UninstallFailed(e.to_string())),
                    }
                }
                None => {
                    debug!(module_id = %module_id, "Type {} has no entry point, nothing to uninstall", type_name);
                    return Ok(());
                }
            },
        };

        if !instance.has_uninstall() {
            self.audit
                .log(
                    AuditLevel::Info,
                    "Module has no uninstall method",
                    &record.name,
                    Some(json!({ "module_id": module_id })),
                )
                .await;
            return Ok(());
        }

        let result = task::spawn_blocking(move || {
            includer::catch_panic(|| instance.uninstall(&context))
        })
        .await;
        flatten_hook_result(result)?;

        self.audit
            .log(
                AuditLevel::Info,
                "Module uninstall executed",
                &record.name,
                Some(json!({ "module_id": module_id })),
            )
            .await;
        Ok(())
    }
}

type HookJoin = std::result::Result<
    std::result::Result<Result<()>, includer::CaughtPanic>,
    task::JoinError,
>;

fn flatten_hook_result(result: HookJoin) -> Result<()> {
    match result {
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(e))) => Err(OnyxError::UninstallFailed(e.to_string())),
        Ok(Err(caught)) => Err(OnyxError::UninstallFailed(format!("panicked: {}", caught))),
        Err(e) => Err(OnyxError::UninstallFailed(e.to_string())),
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::module::catalog::ModuleCatalog;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    fn catalog_with(counters: &Counters) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        let c = counters.clone();
        catalog.register_type("Good_One", move || c.probe(false, false, false));
        let c = counters.clone();
        catalog.register_type("Good_Two", move || c.probe(false, false, false));
        let c = counters.clone();
        catalog.register_type("Throwing_Init", move || c.probe(true, false, false));
        let c = counters.clone();
        catalog.register_type("Panicking_Init", move || c.probe(false, true, false));
        catalog.register_passive_type("No_Entry");
        catalog
    }

    #[tokio::test]
    async fn test_isolation_of_failing_modules() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let root = h.root();

        let good_one = write_module(&root, "good-one", "main.php", "");
        let good_two = write_module(&root, "good-two", "main.php", "");
        let broken = write_module(&root, "broken-syntax", "main.php", "SYNTAX ERROR");
        let throwing = write_module(&root, "throwing-init", "main.php", "");
        let panicking = write_module(&root, "panicking-init", "main.php", "");

        h.add_active("good-one", &good_one).await;
        h.add_active("good-two", &good_two).await;
        h.add_active("broken-syntax", &broken).await;
        h.add_active("missing-file", "missing-file/main.php").await;
        h.add_active("throwing-init", &throwing).await;
        h.add_active("panicking-init", &panicking).await;

        let report = match h.loader.load_active_modules().await {
            LoadPass::Completed(report) => report,
            other => panic!("unexpected pass result: {:?}", other),
        };

        let mut initialized: Vec<&str> = report
            .initialized()
            .iter()
            .map(|r| r.module_id.as_str())
            .collect();
        initialized.sort();
        assert_eq!(initialized, vec!["good-one", "good-two"]);
        assert_eq!(report.demoted().len(), 4);

        assert_eq!(h.status("good-one").await, ModuleStatus::Active);
        assert_eq!(h.status("good-two").await, ModuleStatus::Active);
        for id in ["broken-syntax", "missing-file", "throwing-init", "panicking-init"] {
            assert_eq!(h.status(id).await, ModuleStatus::Inactive, "{} should be demoted", id);
        }

        assert!(matches!(report.outcome_of("missing-file"), Some(LoadOutcome::MissingFile { .. })));
        assert!(matches!(report.outcome_of("broken-syntax"), Some(LoadOutcome::SyntaxError { .. })));
        match report.outcome_of("panicking-init") {
            Some(LoadOutcome::InitFailed { error }) => {
                assert!(error.contains("init exploded"));
                assert!(error.contains(&format!("at {}:", file!())), "{}", error);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(h.audit.has(AuditLevel::Error, "Module syntax error"));
        assert!(h.audit.has(AuditLevel::Error, "Module initialization failed"));

        // included modules stay registered even when init failed
        assert!(h.loader.is_loaded("throwing-init").await);
        assert!(!h.loader.is_loaded("broken-syntax").await);
    }

    #[tokio::test]
    async fn test_load_pass_runs_once() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "good-one", "main.php", "");
        h.add_active("good-one", &path).await;

        assert!(matches!(h.loader.load_active_modules().await, LoadPass::Completed(_)));
        assert!(matches!(h.loader.load_active_modules().await, LoadPass::AlreadyRan));
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);

        let outcome = h.loader.execute_module("good-one").await.unwrap();
        assert_eq!(outcome, ExecuteOutcome::AlreadyLoaded);
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert_eq!(h.loader.loaded_modules().await, vec!["good-one".to_string()]);
    }

    #[tokio::test]
    async fn test_passive_modules_stay_active() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let unknown = write_module(&h.root(), "function-only", "main.php", "");
        let no_entry = write_module(&h.root(), "no-entry", "main.php", "");
        h.add_active("function-only", &unknown).await;
        h.add_active("no-entry", &no_entry).await;

        let report = match h.loader.load_active_modules().await {
            LoadPass::Completed(report) => report,
            other => panic!("unexpected pass result: {:?}", other),
        };

        assert_eq!(report.passive().len(), 2);
        assert!(report.demoted().is_empty());
        assert_eq!(h.status("function-only").await, ModuleStatus::Active);
        assert_eq!(h.status("no-entry").await, ModuleStatus::Active);
    }

    #[tokio::test]
    async fn test_entry_point_header_selects_type() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "renamed", "main.php", " * Entry Point: Good_Two");
        h.add_active("renamed", &path).await;

        let report = match h.loader.load_active_modules().await {
            LoadPass::Completed(report) => report,
            other => panic!("unexpected pass result: {:?}", other),
        };
        assert_eq!(
            report.outcome_of("renamed"),
            Some(&LoadOutcome::Initialized {
                type_name: "Good_Two".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_manifest_mismatch_is_include_failure() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "good-one", "main.php", "");
        h.add_active("impostor", &path).await;

        let report = match h.loader.load_active_modules().await {
            LoadPass::Completed(report) => report,
            other => panic!("unexpected pass result: {:?}", other),
        };
        assert!(matches!(report.outcome_of("impostor"), Some(LoadOutcome::IncludeFailed { .. })));
        assert_eq!(h.status("impostor").await, ModuleStatus::Inactive);
    }

    struct NoSchemaStore {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModuleStore for NoSchemaStore {
        async fn get_modules(&self, _status: Option<ModuleStatus>) -> Result<Vec<ModuleRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }
        async fn get_module(&self, _module_id: &str) -> Result<Option<ModuleRecord>> {
            Ok(None)
        }
        async fn insert_module(&self, _record: &ModuleRecord) -> Result<()> {
            Ok(())
        }
        async fn update_module(&self, _module_id: &str, _update: ModuleUpdate) -> Result<bool> {
            Ok(false)
        }
        async fn delete_module(&self, _module_id: &str) -> Result<bool> {
            Ok(false)
        }
        async fn tables_exist(&self) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_schema_missing_is_silent() {
        let store = Arc::new(NoSchemaStore {
            calls: AtomicUsize::new(0),
        });
        let loader = ModuleLoader::new(
            store.clone(),
            ClassResolver::new(Arc::new(ModuleCatalog::new())),
            Arc::new(MarkerSyntaxValidator),
            Arc::new(crate::module::includer::ManifestIncluder::new()),
            Arc::new(crate::module::audit::TracingAuditLogger::new()),
            Arc::new(AllowAll),
            PathBuf::from("/nonexistent"),
        );

        assert!(matches!(loader.load_active_modules().await, LoadPass::SchemaMissing));
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(loader.load_active_modules().await, LoadPass::AlreadyRan));
    }

    #[tokio::test]
    async fn test_execute_module_updates_bookkeeping() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "good-one", "main.php", "");
        h.add_active("good-one", &path).await;

        let outcome = h.loader.execute_module("good-one").await.unwrap();
        assert_eq!(
            outcome,
            ExecuteOutcome::Ran(LoadOutcome::Initialized {
                type_name: "Good_One".to_string()
            })
        );

        let record = h.store.get_module("good-one").await.unwrap().unwrap();
        assert_eq!(record.execution_count, 1);
        assert!(record.last_executed.is_some());

        assert_eq!(
            h.loader.execute_module("good-one").await.unwrap(),
            ExecuteOutcome::AlreadyLoaded
        );
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_execute_module_requires_active_and_authorization() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "good-one", "main.php", "");
        h.store
            .insert_module(&ModuleRecord::new_inactive("good-one", "Good", &path))
            .await
            .unwrap();

        assert_eq!(
            h.loader.execute_module("good-one").await.unwrap(),
            ExecuteOutcome::NotActive
        );
        assert_eq!(
            h.loader.execute_module("absent").await.unwrap(),
            ExecuteOutcome::NotActive
        );

        let denied = harness(ModuleCatalog::new(), Arc::new(DenyAll));
        let err = denied.loader.execute_module("good-one").await.unwrap_err();
        assert_eq!(err.error_code(), "permission_denied");
    }

    #[tokio::test]
    async fn test_run_uninstall_reuses_loaded_instance() {
        let counters = Counters::default();
        let h = harness(catalog_with(&counters), Arc::new(AllowAll));
        let path = write_module(&h.root(), "good-one", "main.php", "");
        h.add_active("good-one", &path).await;
        h.loader.load_active_modules().await;

        let record = h.store.get_module("good-one").await.unwrap().unwrap();
        h.loader.run_uninstall(&record).await.unwrap();

        assert_eq!(counters.uninstalls.load(Ordering::SeqCst), 1);
        assert_eq!(counters.inits.load(Ordering::SeqCst), 1);
        assert!(h.audit.has(AuditLevel::Info, "Module uninstall executed"));
    }

    #[tokio::test]
    async fn test_run_uninstall_function_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut catalog = ModuleCatalog::new();
        let c = calls.clone();
        catalog.register_function("legacy_tool_uninstall", move |_ctx| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let h = harness(catalog, Arc::new(AllowAll));
        let path = write_module(&h.root(), "legacy-tool", "main.php", "");
        let record = ModuleRecord::new_inactive("legacy-tool", "Legacy", path);

        h.loader.run_uninstall(&record).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(h.loader.is_loaded("legacy-tool").await);
    }

    #[tokio::test]
    async fn test_run_uninstall_missing_file() {
        let h = harness(ModuleCatalog::new(), Arc::new(AllowAll));
        let record = ModuleRecord::new_inactive("ghost", "Ghost", "ghost/main.php");
        let err = h.loader.run_uninstall(&record).await.unwrap_err();
        assert_eq!(err.error_code(), "module_file_not_found");
    }
}
