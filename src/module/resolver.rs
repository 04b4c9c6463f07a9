//! Class resolver
//!
//! Maps a module id to the implementation type it registered under. Modules
//! follow a loose naming convention, so several spellings are tried.

use super::catalog::ModuleCatalog;
use std::sync::Arc;

/// Segments written fully upper-case in the acronym variant
const ACRONYMS: &[&str] = &[
    "ai", "api", "ui", "id", "db", "io", "ip", "url", "uri", "ssl", "ftp", "http", "html", "css",
    "js", "php", "sql", "xml", "json", "csv", "pdf", "seo", "rss", "cdn", "dns", "tcp", "udp",
];

const TYPE_PREFIX: &str = "OC_";

fn capitalize(segment: &str) -> String {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn upper_first_two(name: &str) -> String {
    let split = name
        .char_indices()
        .nth(2)
        .map(|(idx, _)| idx)
        .unwrap_or(name.len());
    format!("{}{}", name[..split].to_uppercase(), &name[split..])
}

/// Candidate type names for a module id, most preferred first
pub fn candidate_names(module_id: &str) -> Vec<String> {
    let segments: Vec<&str> = module_id.split('-').collect();

    let base = segments
        .iter()
        .map(|segment| capitalize(segment))
        .collect::<Vec<_>>()
        .join("_");

    let acronym = segments
        .iter()
        .map(|segment| {
            if ACRONYMS.contains(&segment.to_lowercase().as_str()) {
                segment.to_uppercase()
            } else {
                capitalize(segment)
            }
        })
        .collect::<Vec<_>>()
        .join("_");

    let mut candidates = vec![
        base.clone(),
        format!("{}{}", TYPE_PREFIX, base),
        upper_first_two(&base),
    ];
    if acronym != base {
        candidates.push(acronym.clone());
        candidates.push(format!("{}{}", TYPE_PREFIX, acronym));
    }

    let mut unique = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique
}

/// Resolves module ids against the compiled-in catalog
#[derive(Debug, Clone)]
pub struct ClassResolver {
    catalog: Arc<ModuleCatalog>,
}

impl ClassResolver {
    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<ModuleCatalog> {
        &self.catalog
    }

    /// First candidate present in the catalog
    ///
    /// A declared entry point is the only name checked when given.
    pub fn resolve(&self, module_id: &str, entry_point: Option<&str>) -> Option<String> {
        if let Some(declared) = entry_point {
            return self
                .catalog
                .has_type(declared)
                .then(|| declared.to_string());
        }

        candidate_names(module_id)
            .into_iter()
            .find(|candidate| self.catalog.has_type(candidate))
    }
}
