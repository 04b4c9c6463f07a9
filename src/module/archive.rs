//! Archival of deleted modules
//!
//! Before a module directory is removed its files are packed into a zip
//! under the archive directory, together with the record it was deleted
//! from. Restoring archives is handled elsewhere.

use crate::core::error::{OnyxError, Result};
use crate::db::models::ModuleRecord;
use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const RECORD_ENTRY: &str = "module-record.json";

pub trait ModuleArchiver: Send + Sync {
    /// Pack `module_dir` and return the archive path
    fn archive(&self, record: &ModuleRecord, module_dir: &Path) -> Result<PathBuf>;
}

/// Writes one zip per deleted module
#[derive(Debug, Clone)]
pub struct ZipArchiver {
    archive_dir: PathBuf,
}

impl ZipArchiver {
    pub fn new(archive_dir: PathBuf) -> Self {
        Self { archive_dir }
    }

    fn archive_path(&self, module_id: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        self.archive_dir
            .join(format!("{}-{}-{}.zip", module_id, stamp, &uuid::Uuid::new_v4().simple().to_string()[..8]))
    }
}

fn zip_error(e: zip::result::ZipError) -> OnyxError {
    OnyxError::ArchiveError(e.to_string())
}

impl ModuleArchiver for ZipArchiver {
    fn archive(&self, record: &ModuleRecord, module_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir)?;
        let path = self.archive_path(&record.module_id);

        let file = fs::File::create(&path)?;
        let mut writer = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let manifest = serde_json::to_vec_pretty(record)
            .map_err(|e| OnyxError::SerializationError(e.to_string()))?;
        writer.start_file(RECORD_ENTRY, options).map_err(zip_error)?;
        writer.write_all(&manifest)?;

        if module_dir.is_dir() {
            for entry in WalkDir::new(module_dir)
                .min_depth(1)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let relative = match entry.path().strip_prefix(module_dir) {
                    Ok(relative) => relative,
                    Err(_) => continue,
                };
                let name = format!(
                    "files/{}",
                    relative.to_string_lossy().replace('\\', "/")
                );

                if entry.file_type().is_dir() {
                    writer.add_directory(name, options).map_err(zip_error)?;
                } else if entry.file_type().is_file() {
                    debug!("Archiving {}", entry.path().display());
                    writer.start_file(name, options).map_err(zip_error)?;
                    let mut source = fs::File::open(entry.path())?;
                    io::copy(&mut source, &mut writer)?;
                }
            }
        }

        writer.finish().map_err(zip_error)?;

        info!(module_id = %record.module_id, "Module archived to {}", path.display());
        Ok(path)
    }
}
