//! Modules compiled into the `onyx-command` binary

use super::catalog::ModuleCatalog;
use super::types::{Module, ModuleContext};
use crate::core::error::{OnyxError, Result};
use std::fs;
use tracing::info;

const ESSENTIALS_STATE_DIR: &str = "state";

/// Site maintenance toolkit shipped with the host
///
/// Keeps its working state under `<module dir>/state`, which uninstall
/// removes.
#[derive(Debug, Default)]
pub struct OnyxEssentials;

impl Module for OnyxEssentials {
    fn init(&self, context: &ModuleContext) -> Result<()> {
        if let Some(config) = &context.config {
            if !config.is_object() {
                return Err(OnyxError::InvalidModule(format!(
                    "{}: config must be an object",
                    context.module_id
                )));
            }
        }

        fs::create_dir_all(context.module_dir.join(ESSENTIALS_STATE_DIR))?;

        let features = context
            .config
            .as_ref()
            .and_then(|c| c.as_object())
            .map(|object| {
                object
                    .iter()
                    .filter(|(_, enabled)| enabled.as_bool().unwrap_or(false))
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            })
            .unwrap_or_default();
        info!(module_id = %context.module_id, features = %features, "Onyx Essentials ready");
        Ok(())
    }

    fn has_uninstall(&self) -> bool {
        true
    }

    fn uninstall(&self, context: &ModuleContext) -> Result<()> {
        let state = context.module_dir.join(ESSENTIALS_STATE_DIR);
        if state.exists() {
            fs::remove_dir_all(&state)?;
        }
        Ok(())
    }
}

/// Catalog of every module type built into the binary
pub fn builtin_catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.register_type("OC_Onyx_Essentials", || OnyxEssentials);
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::resolver::ClassResolver;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    #[test]
    fn test_essentials_resolves_by_prefixed_name() {
        let resolver = ClassResolver::new(Arc::new(builtin_catalog()));
        assert_eq!(
            resolver.resolve("onyx-essentials", None).as_deref(),
            Some("OC_Onyx_Essentials")
        );
    }

    #[test]
    fn test_essentials_lifecycle() {
        let dir = TempDir::new().unwrap();
        let context = ModuleContext::new("onyx-essentials", dir.path().to_path_buf())
            .with_config(Some(json!({"login_lockdown": true})));

        let module = OnyxEssentials;
        module.init(&context).unwrap();
        assert!(dir.path().join("state").is_dir());

        module.uninstall(&context).unwrap();
        assert!(!dir.path().join("state").exists());
    }

    #[test]
    fn test_essentials_rejects_non_object_config() {
        let dir = TempDir::new().unwrap();
        let context = ModuleContext::new("onyx-essentials", dir.path().to_path_buf())
            .with_config(Some(json!([1])));
        assert!(OnyxEssentials.init(&context).is_err());
    }
}
