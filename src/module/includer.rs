//! Bringing module sources into the process
//!
//! Module code is compiled in, so "including" a module means checking that
//! its source file on disk still declares the module it is registered as.
//! Failures carry the file and line they refer to.

use super::manifest::{self, ModuleHeaders};
use crate::core::error::{OnyxError, Result};
use crate::db::models::ModuleRecord;
use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};
use tokio::task;

thread_local! {
    static PANIC_LOCATION: RefCell<Option<String>> = RefCell::new(None);
}

static LOCATION_HOOK: Once = Once::new();

pub trait ModuleIncluder: Send + Sync {
    /// Include the module at `path`, returning its manifest
    fn include(&self, record: &ModuleRecord, path: &Path) -> Result<ModuleHeaders>;
}

/// Default includer: the manifest must name the record's module id
#[derive(Debug, Default, Clone)]
pub struct ManifestIncluder;

impl ManifestIncluder {
    pub fn new() -> Self {
        Self
    }
}

impl ModuleIncluder for ManifestIncluder {
    fn include(&self, record: &ModuleRecord, path: &Path) -> Result<ModuleHeaders> {
        let bytes = fs::read(path)
            .map_err(|e| OnyxError::IncludeFailed(format!("{}: {}", path.display(), e)))?;
        let content = String::from_utf8_lossy(&bytes);

        let headers = manifest::parse_headers(&content)
            .map_err(|e| OnyxError::IncludeFailed(format!("{}:1: {}", path.display(), e)))?;

        if headers.module_id != record.module_id {
            let line = manifest::module_id_line(&content).unwrap_or(1);
            return Err(OnyxError::IncludeFailed(format!(
                "{}:{}: file declares module '{}', expected '{}'",
                path.display(),
                line,
                headers.module_id,
                record.module_id
            )));
        }

        Ok(headers)
    }
}

/// Readable text from a panic payload
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Chain a hook that remembers where the current thread last panicked
fn install_location_hook() {
    LOCATION_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if let Some(location) = info.location() {
                let at = format!("{}:{}", location.file(), location.line());
                let _ = PANIC_LOCATION.try_with(|slot| *slot.borrow_mut() = Some(at));
            }
            previous(info);
        }));
    });
}

/// A panic caught at a module boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaughtPanic {
    pub message: String,
    /// `file:line` where the panic was raised
    pub location: Option<String>,
}

impl fmt::Display for CaughtPanic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{} at {}", self.message, location),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Run `f`, turning a panic into a `CaughtPanic` with its location
pub fn catch_panic<R>(f: impl FnOnce() -> R) -> std::result::Result<R, CaughtPanic> {
    install_location_hook();
    let take = || PANIC_LOCATION.try_with(|slot| slot.borrow_mut().take()).ok().flatten();
    take();

    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| CaughtPanic {
        message: panic_message(payload.as_ref()),
        location: take(),
    })
}

/// Run an includer on the blocking pool, converting panics into errors
pub async fn include_isolated(
    includer: Arc<dyn ModuleIncluder>,
    record: ModuleRecord,
    path: PathBuf,
) -> Result<ModuleHeaders> {
    let joined = task::spawn_blocking(move || {
        catch_panic(|| includer.include(&record, &path)).map_err(|caught| {
            OnyxError::IncludeFailed(format!(
                "{}: panicked while including: {}",
                path.display(),
                caught
            ))
        })
    })
    .await
    .map_err(|e| OnyxError::TaskError(format!("Include task failed: {}", e)))?;

    joined?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_module(dir: &Path, id: &str) -> PathBuf {
        let path = dir.join("main.php");
        fs::write(
            &path,
            format!("<?php\n/*\n * Module Name: Test\n * Module ID: {}\n */\n", id),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_manifest_includer_accepts_matching_id() {
        let dir = TempDir::new().unwrap();
        let path = write_module(dir.path(), "foo");
        let record = ModuleRecord::new_inactive("foo", "Foo", "foo/main.php");

        let headers = ManifestIncluder::new().include(&record, &path).unwrap();
        assert_eq!(headers.module_id, "foo");
    }

    #[test]
    fn test_manifest_includer_reports_line_on_mismatch() {
        let dir = TempDir::new().unwrap();
        let path = write_module(dir.path(), "bar");
        let record = ModuleRecord::new_inactive("foo", "Foo", "foo/main.php");

        let err = ManifestIncluder::new().include(&record, &path).unwrap_err();
        assert_eq!(err.error_code(), "module_include_failed");
        assert!(err.to_string().contains("main.php:4:"));
    }

    #[tokio::test]
    async fn test_include_isolated_catches_panics() {
        struct Exploding;
        impl ModuleIncluder for Exploding {
            fn include(&self, _record: &ModuleRecord, _path: &Path) -> Result<ModuleHeaders> {
                panic!("fatal error in module source");
            }
        }

        let record = ModuleRecord::new_inactive("foo", "Foo", "foo/main.php");
        let err = include_isolated(Arc::new(Exploding), record, PathBuf::from("foo/main.php"))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "module_include_failed");
        let message = err.to_string();
        assert!(message.contains("fatal error in module source"));
        assert!(message.contains(&format!("at {}:", file!())), "{}", message);
    }

    #[test]
    fn test_catch_panic_reports_location() {
        let line = line!() + 1;
        let caught = catch_panic(|| -> u32 { panic!("boom {}", 7) }).unwrap_err();
        assert_eq!(caught.message, "boom 7");
        assert_eq!(caught.location, Some(format!("{}:{}", file!(), line)));
        assert_eq!(caught.to_string(), format!("boom 7 at {}:{}", file!(), line));

        assert_eq!(catch_panic(|| 5), Ok(5));
    }
}
