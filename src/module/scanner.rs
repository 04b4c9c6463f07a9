//! Directory scanner
//!
//! Reconciles the module root with the record store: modules found on disk
//! without a record are registered inactive, and records whose main file
//! moved get their path repaired. Status is never touched.

use super::audit::{AuditLevel, AuditLogger};
use super::manifest;
use super::security::Authorizer;
use crate::core::error::Result;
use crate::db::models::{ModuleRecord, ModuleUpdate};
use crate::db::repository::ModuleStore;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    pub registered_count: usize,
    pub updated_count: usize,
    pub message: String,
}

pub struct DirectoryScanner {
    store: Arc<dyn ModuleStore>,
    authorizer: Arc<dyn Authorizer>,
    audit: Arc<dyn AuditLogger>,
    module_root: PathBuf,
    source_extension: String,
}

impl DirectoryScanner {
    pub fn new(
        store: Arc<dyn ModuleStore>,
        authorizer: Arc<dyn Authorizer>,
        audit: Arc<dyn AuditLogger>,
        module_root: PathBuf,
        source_extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authorizer,
            audit,
            module_root,
            source_extension: source_extension.into(),
        }
    }

    fn module_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.module_root.is_dir() {
            return Ok(Vec::new());
        }

        let mut dirs = Vec::new();
        for entry in fs::read_dir(&self.module_root)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if name.starts_with("temp_") || name.starts_with('.') {
                continue;
            }
            dirs.push(path);
        }
        dirs.sort();
        Ok(dirs)
    }

    pub async fn scan_and_register(&self) -> Result<ScanSummary> {
        self.authorizer.require("scan modules")?;

        let mut existing: HashMap<String, ModuleRecord> = self
            .store
            .get_modules(None)
            .await?
            .into_iter()
            .map(|record| (record.module_id.clone(), record))
            .collect();

        let mut registered_count = 0;
        let mut updated_count = 0;

        for dir in self.module_dirs()? {
            let main_file = match manifest::find_main_file(&dir, &self.source_extension) {
                Ok(Some(main_file)) => main_file,
                Ok(None) => {
                    debug!("No module manifest in {}", dir.display());
                    continue;
                }
                Err(e) => {
                    warn!("Failed to scan {}: {}", dir.display(), e);
                    continue;
                }
            };

            let headers = match manifest::parse_module_file(&main_file) {
                Ok(headers) => headers,
                Err(e) => {
                    debug!("Skipping {}: {}", main_file.display(), e);
                    continue;
                }
            };

            let relative_path = match main_file.strip_prefix(&self.module_root) {
                Ok(relative) => manifest::slash_path(relative),
                Err(_) => {
                    warn!("Main file {} is outside the module root", main_file.display());
                    continue;
                }
            };

            match existing.get(&headers.module_id) {
                Some(record) if record.file_path != relative_path => {
                    self.store
                        .update_module(&headers.module_id, ModuleUpdate::file_path(relative_path.clone()))
                        .await?;
                    info!(
                        module_id = %headers.module_id,
                        "Repaired module path {} -> {}",
                        record.file_path,
                        relative_path
                    );
                    updated_count += 1;
                }
                Some(_) => {}
                None => {
                    let mut record =
                        ModuleRecord::new_inactive(&headers.module_id, &headers.name, relative_path);
                    record.description = headers.description.clone();
                    record.version = headers.version.clone();
                    record.author = headers.author.clone();

                    if let Err(e) = self.store.insert_module(&record).await {
                        warn!(module_id = %headers.module_id, "Failed to register module: {}", e);
                        continue;
                    }
                    info!(module_id = %headers.module_id, "Registered module found on disk");
                    existing.insert(record.module_id.clone(), record);
                    registered_count += 1;
                }
            }
        }

        let message = format!(
            "Scan complete. Registered {} new module(s), updated {} existing module(s).",
            registered_count, updated_count
        );
        self.audit
            .log(
                AuditLevel::Info,
                "Module scan completed",
                &message,
                Some(json!({ "registered": registered_count, "updated": updated_count })),
            )
            .await;

        Ok(ScanSummary {
            registered_count,
            updated_count,
            message,
        })
    }
}
