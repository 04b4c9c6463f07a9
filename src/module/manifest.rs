//! Module manifest headers
//!
//! A module's main source file carries plain-text header lines such as
//! `Module ID: onyx-essentials`. The same rules are used by the installer,
//! the directory scanner and the default includer.

use crate::core::error::{OnyxError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

lazy_static! {
    static ref MODULE_NAME_MARKER: Regex = Regex::new(r"(?i)Module\s+Name:").unwrap();
    static ref MODULE_ID_MARKER: Regex = Regex::new(r"(?i)Module\s+ID:").unwrap();
    static ref MODULE_ID_SLUG: Regex = Regex::new(r"(?i)^[a-z0-9]+(?:-[a-z0-9]+)*$").unwrap();
    static ref MODULE_ID_HEADER: Regex = header_regex("Module ID");
    static ref MODULE_NAME_HEADER: Regex = header_regex("Module Name");
    static ref DESCRIPTION_HEADER: Regex = header_regex("Description");
    static ref VERSION_HEADER: Regex = header_regex("Version");
    static ref AUTHOR_HEADER: Regex = header_regex("Author");
    static ref ENTRY_POINT_HEADER: Regex = header_regex("Entry Point");
}

fn header_regex(header: &str) -> Regex {
    Regex::new(&format!(r"(?i){}:[ \t]*(.+)", regex::escape(header))).unwrap()
}

pub const DEFAULT_VERSION: &str = "1.0.0";

/// Metadata declared in a module's main file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleHeaders {
    pub module_id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub author: String,
    /// Explicit implementation type; skips name-derived resolution
    pub entry_point: Option<String>,
}

fn capture(regex: &Regex, content: &str) -> Option<String> {
    regex
        .captures(content)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Module ids are dash-delimited slugs and double as directory names
pub fn is_valid_module_id(module_id: &str) -> bool {
    MODULE_ID_SLUG.is_match(module_id)
}

/// Parse manifest headers out of source text
pub fn parse_headers(content: &str) -> Result<ModuleHeaders> {
    let module_id = capture(&MODULE_ID_HEADER, content);
    let name = capture(&MODULE_NAME_HEADER, content);

    let (module_id, name) = match (module_id, name) {
        (Some(id), Some(name)) => (id, name),
        _ => {
            return Err(OnyxError::InvalidModule(
                "Missing required headers (Module ID and Module Name)".to_string(),
            ))
        }
    };

    if !is_valid_module_id(&module_id) {
        return Err(OnyxError::InvalidModule(format!(
            "Module ID '{}' must be a dash-delimited slug",
            module_id
        )));
    }

    Ok(ModuleHeaders {
        module_id,
        name,
        description: capture(&DESCRIPTION_HEADER, content).unwrap_or_default(),
        version: capture(&VERSION_HEADER, content).unwrap_or_else(|| DEFAULT_VERSION.to_string()),
        author: capture(&AUTHOR_HEADER, content).unwrap_or_default(),
        entry_point: capture(&ENTRY_POINT_HEADER, content),
    })
}

/// Read a file and parse its headers
pub fn parse_module_file(path: &Path) -> Result<ModuleHeaders> {
    let bytes = fs::read(path)?;
    parse_headers(&String::from_utf8_lossy(&bytes))
}

/// 1-based line of the `Module ID:` header, if present
pub fn module_id_line(content: &str) -> Option<usize> {
    MODULE_ID_HEADER
        .find(content)
        .map(|m| content[..m.start()].matches('\n').count() + 1)
}

/// Record-style path: components joined with forward slashes
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Whether a file looks like a module main file
pub fn is_main_file(path: &Path) -> bool {
    match fs::read(path) {
        Ok(bytes) => {
            let content = String::from_utf8_lossy(&bytes);
            MODULE_NAME_MARKER.is_match(&content) && MODULE_ID_MARKER.is_match(&content)
        }
        Err(_) => false,
    }
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case(extension))
        .unwrap_or(false)
}

fn sorted_entries(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        } else if path.is_file() {
            files.push(path);
        }
    }

    files.sort();
    dirs.sort();
    Ok((files, dirs))
}

/// Locate the main file of a module tree
///
/// Root-level source files are checked first, then the source files one
/// directory down. Both levels are visited in sorted order.
pub fn find_main_file(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let (files, dirs) = sorted_entries(dir)?;

    if let Some(found) = files
        .into_iter()
        .filter(|path| has_extension(path, extension))
        .find(|path| is_main_file(path))
    {
        return Ok(Some(found));
    }

    for sub in dirs {
        let (files, _) = sorted_entries(&sub)?;
        if let Some(found) = files
            .into_iter()
            .filter(|path| has_extension(path, extension))
            .find(|path| is_main_file(path))
        {
            return Ok(Some(found));
        }
    }

    Ok(None)
}
