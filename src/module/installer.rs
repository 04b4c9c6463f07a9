//! Module installation
//!
//! Accepts either a single source file or a zip archive. Archives are
//! unpacked into a scratch directory that is removed on every exit path;
//! a single top-level directory inside the archive becomes the module
//! directory itself. Installed modules are always registered inactive.

use super::audit::{AuditLevel, AuditLogger};
use super::manifest::{self, ModuleHeaders};
use super::security::{sanitize_file_name, Authorizer, SecurityScanner, UploadedFile};
use super::syntax::{self, SyntaxCheck, SyntaxValidator};
use crate::core::error::{OnyxError, Result};
use crate::db::models::ModuleRecord;
use crate::db::repository::ModuleStore;
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Successful installation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallOutcome {
    pub module_id: String,
    pub message: String,
}

/// Removes the extraction directory when dropped
struct TempDirGuard {
    path: PathBuf,
}

impl TempDirGuard {
    fn create(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempDirGuard {
    fn drop(&mut self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_dir_all(&self.path) {
                warn!("Failed to remove temp directory {}: {}", self.path.display(), e);
            } else {
                debug!("Removed temp directory {}", self.path.display());
            }
        }
    }
}

pub struct ModuleInstaller {
    store: Arc<dyn ModuleStore>,
    authorizer: Arc<dyn Authorizer>,
    scanner: Arc<dyn SecurityScanner>,
    syntax: Arc<dyn SyntaxValidator>,
    audit: Arc<dyn AuditLogger>,
    module_root: PathBuf,
    temp_dir: PathBuf,
    source_extension: String,
}

impl ModuleInstaller {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn ModuleStore>,
        authorizer: Arc<dyn Authorizer>,
        scanner: Arc<dyn SecurityScanner>,
        syntax: Arc<dyn SyntaxValidator>,
        audit: Arc<dyn AuditLogger>,
        module_root: PathBuf,
        temp_dir: PathBuf,
        source_extension: impl Into<String>,
    ) -> Self {
        Self {
            store,
            authorizer,
            scanner,
            syntax,
            audit,
            module_root,
            temp_dir,
            source_extension: source_extension.into(),
        }
    }

    /// Install an uploaded module file or archive
    pub async fn install(&self, upload: &UploadedFile) -> Result<InstallOutcome> {
        self.authorizer.require("install modules")?;
        self.scanner.sanitize_upload(upload)?;

        info!("Installing module from: {}", upload.name);

        if upload.extension() == "zip" {
            self.install_from_archive(upload).await
        } else {
            self.install_from_file(upload).await
        }
    }

    async fn install_from_archive(&self, upload: &UploadedFile) -> Result<InstallOutcome> {
        let guard = TempDirGuard::create(
            self.temp_dir.join(format!("temp_{}", Uuid::new_v4().simple())),
        )?;

        let source = upload.tmp_path.clone();
        let target = guard.path().to_path_buf();
        task::spawn_blocking(move || extract_zip(&source, &target))
            .await
            .map_err(|e| OnyxError::TaskError(format!("Extraction task failed: {}", e)))??;

        let main_file = manifest::find_main_file(guard.path(), &self.source_extension)?
            .ok_or_else(|| {
                OnyxError::NoMainFile(
                    "Make sure your module has \"Module Name:\" and \"Module ID:\" headers".to_string(),
                )
            })?;
        debug!("Found main file: {}", main_file.display());

        let headers = manifest::parse_module_file(&main_file)?;
        self.check_conflicts(&main_file, &headers).await?;

        let module_dir = self.module_root.join(&headers.module_id);
        if module_dir.exists() || self.is_registered(&headers.module_id).await? {
            return Err(OnyxError::ModuleExists(headers.module_id));
        }

        let source_dir = single_root(guard.path())?.unwrap_or_else(|| guard.path().to_path_buf());
        let relative_main = main_file
            .strip_prefix(&source_dir)
            .map_err(|_| OnyxError::InvalidModule("Main file outside module directory".to_string()))?
            .to_path_buf();

        fs::create_dir_all(&self.module_root)?;
        move_path(&source_dir, &module_dir)?;

        let file_path = relative_path(&headers.module_id, &relative_main);
        self.register(&headers, file_path).await
    }

    async fn install_from_file(&self, upload: &UploadedFile) -> Result<InstallOutcome> {
        let warnings = self.scanner.scan_file_content(&upload.tmp_path);
        if !warnings.is_empty() {
            self.audit
                .log(
                    AuditLevel::Warning,
                    "Security warnings during upload",
                    &warnings.join(", "),
                    Some(json!({ "file": upload.name })),
                )
                .await;
        }

        let headers = manifest::parse_module_file(&upload.tmp_path)?;

        match syntax::check_blocking(self.syntax.clone(), upload.tmp_path.clone()).await {
            SyntaxCheck::SyntaxError(output) => return Err(OnyxError::SyntaxError(output)),
            SyntaxCheck::Unavailable(reason) => {
                warn!(module_id = %headers.module_id, "Syntax check unavailable: {}", reason);
            }
            SyntaxCheck::Valid => {}
        }

        self.check_conflicts(&upload.tmp_path, &headers).await?;

        let module_dir = self.module_root.join(&headers.module_id);
        let file_name = sanitize_file_name(&upload.name);
        if module_dir.join(&file_name).exists() || self.is_registered(&headers.module_id).await? {
            return Err(OnyxError::ModuleExists(headers.module_id));
        }
        fs::create_dir_all(&module_dir)?;

        move_path(&upload.tmp_path, &module_dir.join(&file_name)).map_err(|e| {
            OnyxError::UploadFailed(format!("Failed to move uploaded file: {}", e))
        })?;

        let file_path = format!("{}/{}", headers.module_id, file_name);
        self.register(&headers, file_path).await
    }

    async fn is_registered(&self, module_id: &str) -> Result<bool> {
        Ok(self.store.get_module(module_id).await?.is_some())
    }

    async fn check_conflicts(&self, file: &Path, headers: &ModuleHeaders) -> Result<()> {
        let report = self.scanner.check_conflicts(file, &headers.module_id)?;

        if report.has_errors() {
            return Err(OnyxError::ConflictsDetected(report));
        }
        if !report.warnings.is_empty() {
            self.audit
                .log(
                    AuditLevel::Warning,
                    "Module conflict warnings",
                    &report.warnings.join(", "),
                    Some(json!({ "module_id": headers.module_id })),
                )
                .await;
        }
        Ok(())
    }

    async fn register(&self, headers: &ModuleHeaders, file_path: String) -> Result<InstallOutcome> {
        let mut record = ModuleRecord::new_inactive(&headers.module_id, &headers.name, file_path);
        record.description = headers.description.clone();
        record.version = headers.version.clone();
        record.author = headers.author.clone();

        self.store
            .insert_module(&record)
            .await
            .map_err(|e| OnyxError::DbError(e.to_string()))?;

        self.audit
            .log(
                AuditLevel::Info,
                "Module installed",
                &headers.name,
                Some(json!({ "module_id": headers.module_id })),
            )
            .await;
        info!(module_id = %headers.module_id, "Module installed: {}", record.file_path);

        Ok(InstallOutcome {
            module_id: headers.module_id.clone(),
            message: "Module installed successfully.".to_string(),
        })
    }
}

/// `<module_id>/<path>` with forward slashes
fn relative_path(module_id: &str, relative_main: &Path) -> String {
    format!("{}/{}", module_id, manifest::slash_path(relative_main))
}

/// The only entry of `dir` when that entry is a directory
fn single_root(dir: &Path) -> Result<Option<PathBuf>> {
    let entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<std::io::Result<_>>()?;

    match entries.as_slice() {
        [only] if only.is_dir() => Ok(Some(only.clone())),
        _ => Ok(None),
    }
}

/// Extract a zip archive, refusing entries that escape `target`
fn extract_zip(source: &Path, target: &Path) -> Result<()> {
    let file = fs::File::open(source)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| OnyxError::ArchiveError(format!("Failed to open zip archive: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| OnyxError::ArchiveError(format!("Failed to read zip entry: {}", e)))?;

        let outpath = match entry.enclosed_name() {
            Some(path) => target.join(path),
            None => {
                return Err(OnyxError::ArchiveError(format!(
                    "Unsafe path in archive: {}",
                    entry.name()
                )))
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&outpath)?;
        } else {
            if let Some(parent) = outpath.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut outfile = fs::File::create(&outpath)?;
            std::io::copy(&mut entry, &mut outfile)?;
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode | 0o600))?;
            }
        }
    }

    Ok(())
}

/// Rename, falling back to copy and remove across filesystems
pub(crate) fn move_path(from: &Path, to: &Path) -> std::io::Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    if from.is_dir() {
        for entry in WalkDir::new(from) {
            let entry = entry.map_err(std::io::Error::from)?;
            let relative = entry
                .path()
                .strip_prefix(from)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
            let dest = to.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&dest)?;
            } else {
                fs::copy(entry.path(), &dest)?;
            }
        }
        fs::remove_dir_all(from)
    } else {
        fs::copy(from, to)?;
        fs::remove_file(from)
    }
}
