//! Security collaborators
//!
//! Authorization of mutating operations, upload sanitizing, content scanning
//! and the conflict check run before a module is installed.

use crate::core::config::SecurityConfig;
use crate::core::error::{ConflictReport, OnyxError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

lazy_static! {
    static ref CONFIG_KEY: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref CLASS_DECL: Regex =
        Regex::new(r"(?mi)^\s*(?:abstract\s+|final\s+)?class\s+([A-Za-z_][A-Za-z0-9_]*)").unwrap();
    static ref FUNCTION_DECL: Regex =
        Regex::new(r"(?mi)^\s*function\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(").unwrap();
    static ref SUSPICIOUS_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"(?i)\beval\s*\(").unwrap(), "uses eval()"),
        (Regex::new(r"(?i)\bbase64_decode\s*\(").unwrap(), "decodes base64 payloads"),
        (Regex::new(r"(?i)\b(?:shell_exec|passthru|proc_open|popen)\s*\(").unwrap(), "executes shell commands"),
        (Regex::new(r"(?i)\b(?:exec|system)\s*\(").unwrap(), "executes external programs"),
        (Regex::new(r"(?i)\bassert\s*\(\s*\$").unwrap(), "evaluates dynamic assertions"),
        (Regex::new(r"(?i)\$_(?:GET|POST|REQUEST)\s*\[[^\]]*\]\s*\(").unwrap(), "calls request input as a function"),
    ];
}

/// Decides whether the caller may perform mutating operations
pub trait Authorizer: Send + Sync {
    fn is_authorized(&self) -> bool;

    /// `PermissionDenied` unless authorized
    fn require(&self, action: &str) -> Result<()> {
        if self.is_authorized() {
            Ok(())
        } else {
            Err(OnyxError::PermissionDenied(format!(
                "Insufficient permissions to {}",
                action
            )))
        }
    }
}

/// Grants access when the caller's role is one of the privileged roles
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    role: String,
    privileged_roles: Vec<String>,
}

impl RoleAuthorizer {
    pub fn new(role: impl Into<String>, privileged_roles: Vec<String>) -> Self {
        Self {
            role: role.into(),
            privileged_roles,
        }
    }

    pub fn from_config(config: &SecurityConfig) -> Self {
        Self::new(config.caller_role.clone(), config.privileged_roles.clone())
    }
}

impl Authorizer for RoleAuthorizer {
    fn is_authorized(&self) -> bool {
        self.privileged_roles
            .iter()
            .any(|role| role.eq_ignore_ascii_case(&self.role))
    }
}

/// A file handed to the installer
#[derive(Debug, Clone)]
pub struct UploadedFile {
    /// Original client-side file name; decides archive vs single file
    pub name: String,
    /// Where the upload currently lives on disk
    pub tmp_path: PathBuf,
}

impl UploadedFile {
    pub fn new(name: impl Into<String>, tmp_path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            tmp_path: tmp_path.into(),
        }
    }

    /// Use a local file as its own upload
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(name, path)
    }

    /// Lower-cased extension of the original name
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default()
    }
}

pub trait SecurityScanner: Send + Sync {
    /// Reject uploads that must not reach the installer
    fn sanitize_upload(&self, upload: &UploadedFile) -> Result<()>;

    /// Warnings about risky constructs in a source file
    fn scan_file_content(&self, file: &Path) -> Vec<String>;

    /// Clashes between a candidate module and the installed ones
    fn check_conflicts(&self, file: &Path, module_id: &str) -> Result<ConflictReport>;
}

/// Regex-driven scanner over the module root
#[derive(Debug, Clone)]
pub struct PatternSecurityScanner {
    module_root: PathBuf,
    source_extension: String,
    allowed_extensions: Vec<String>,
    max_upload_size: u64,
}

impl PatternSecurityScanner {
    pub fn new(
        module_root: PathBuf,
        source_extension: impl Into<String>,
        allowed_extensions: Vec<String>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            module_root,
            source_extension: source_extension.into(),
            allowed_extensions,
            max_upload_size,
        }
    }

    /// Declared class and function names of every installed module except `skip`
    fn installed_declarations(&self, skip: &str) -> HashMap<String, (String, String)> {
        let mut declared = HashMap::new();
        if !self.module_root.is_dir() {
            return declared;
        }

        for entry in WalkDir::new(&self.module_root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let owner = match entry
                .path()
                .strip_prefix(&self.module_root)
                .ok()
                .and_then(|rel| rel.components().next())
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
            {
                Some(owner) => owner,
                None => continue,
            };
            if owner == skip || owner.starts_with("temp_") || owner.starts_with('.') {
                continue;
            }

            let is_source = entry
                .path()
                .extension()
                .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(&self.source_extension))
                .unwrap_or(false);
            if !is_source {
                continue;
            }

            if let Ok(bytes) = fs::read(entry.path()) {
                let content = String::from_utf8_lossy(&bytes);
                for (kind, name) in declarations(&content) {
                    declared
                        .entry(name.to_lowercase())
                        .or_insert_with(|| (kind.to_string(), owner.clone()));
                }
            }
        }

        declared
    }
}

fn declarations(content: &str) -> Vec<(&'static str, String)> {
    let classes = CLASS_DECL
        .captures_iter(content)
        .map(|caps| ("class", caps[1].to_string()));
    let functions = FUNCTION_DECL
        .captures_iter(content)
        .map(|caps| ("function", caps[1].to_string()));
    classes.chain(functions).collect()
}

impl SecurityScanner for PatternSecurityScanner {
    fn sanitize_upload(&self, upload: &UploadedFile) -> Result<()> {
        let metadata = fs::metadata(&upload.tmp_path).map_err(|e| {
            OnyxError::UploadFailed(format!("{}: {}", upload.tmp_path.display(), e))
        })?;

        if !metadata.is_file() {
            return Err(OnyxError::UploadFailed(format!(
                "{} is not a file",
                upload.tmp_path.display()
            )));
        }

        if metadata.len() > self.max_upload_size {
            return Err(OnyxError::UploadFailed(format!(
                "File exceeds the {} byte upload limit",
                self.max_upload_size
            )));
        }

        let extension = upload.extension();
        if !self
            .allowed_extensions
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(&extension))
        {
            return Err(OnyxError::UploadFailed(format!(
                "File type '{}' is not allowed",
                extension
            )));
        }

        Ok(())
    }

    fn scan_file_content(&self, file: &Path) -> Vec<String> {
        let content = match fs::read(file) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => return vec![format!("Could not read file for scanning: {}", e)],
        };

        SUSPICIOUS_PATTERNS
            .iter()
            .filter(|(pattern, _)| pattern.is_match(&content))
            .map(|(_, description)| format!("File {}", description))
            .collect()
    }

    fn check_conflicts(&self, file: &Path, module_id: &str) -> Result<ConflictReport> {
        let bytes = fs::read(file)?;
        let content = String::from_utf8_lossy(&bytes);
        let installed = self.installed_declarations(module_id);
        let prefix = module_id.replace('-', "_").to_lowercase();

        let mut report = ConflictReport::default();
        for (kind, name) in declarations(&content) {
            if let Some((_, owner)) = installed.get(&name.to_lowercase()) {
                report.errors.push(format!(
                    "{} {} is already declared by module {}",
                    capitalize_kind(kind),
                    name,
                    owner
                ));
            } else if kind == "function" && !name.to_lowercase().starts_with(&prefix) {
                report.warnings.push(format!(
                    "Function {} is not prefixed with {}_",
                    name, prefix
                ));
            }
        }

        debug!(
            module_id = %module_id,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Conflict check finished"
        );
        Ok(report)
    }
}

fn capitalize_kind(kind: &str) -> &'static str {
    match kind {
        "class" => "Class",
        _ => "Function",
    }
}

/// Keep only well-formed keys of a config object and trim string values
pub fn sanitize_config(value: Value) -> Result<Value> {
    let object = match value {
        Value::Object(object) => object,
        other => {
            return Err(OnyxError::InvalidModule(format!(
                "Module config must be a JSON object, got {}",
                other
            )))
        }
    };

    let sanitized: Map<String, Value> = object
        .into_iter()
        .filter(|(key, _)| CONFIG_KEY.is_match(key))
        .map(|(key, value)| match value {
            Value::String(s) => (key, Value::String(s.trim().to_string())),
            other => (key, other),
        })
        .collect();

    Ok(Value::Object(sanitized))
}

/// File name restricted to `[A-Za-z0-9._-]`
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect();

    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "module".to_string()
    } else {
        cleaned
    }
}
