//! Module catalog
//!
//! Registry of implementation types and functions compiled into the
//! process. The class resolver and the uninstall runner look names up here.

use super::types::{Module, ModuleContext, ModuleFactory, ModuleHook};
use crate::core::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Compiled-in module implementations, keyed by type name
#[derive(Default, Clone)]
pub struct ModuleCatalog {
    /// `None` marks a type without a recognized entry point
    types: HashMap<String, Option<ModuleFactory>>,
    functions: HashMap<String, ModuleHook>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type whose singleton is built by `factory`
    pub fn register_type<F, M>(&mut self, type_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: Module + 'static,
    {
        let factory: ModuleFactory = Arc::new(move || Arc::new(factory()) as Arc<dyn Module>);
        self.types.insert(type_name.into(), Some(factory));
        self
    }

    /// Register a type that exists but exposes no entry point
    pub fn register_passive_type(&mut self, type_name: impl Into<String>) -> &mut Self {
        self.types.insert(type_name.into(), None);
        self
    }

    pub fn register_function<F>(&mut self, name: impl Into<String>, hook: F) -> &mut Self
    where
        F: Fn(&ModuleContext) -> Result<()> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(hook));
        self
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Entry-point factory for a type; `None` if unknown or passive
    pub fn factory(&self, type_name: &str) -> Option<ModuleFactory> {
        self.types.get(type_name).and_then(|factory| factory.clone())
    }

    pub fn function(&self, name: &str) -> Option<ModuleHook> {
        self.functions.get(name).cloned()
    }

    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.types.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut functions: Vec<&String> = self.functions.keys().collect();
        functions.sort();
        f.debug_struct("ModuleCatalog")
            .field("types", &self.type_names())
            .field("functions", &functions)
            .finish()
    }
}
