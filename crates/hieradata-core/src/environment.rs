//! Lookup environments
//!
//! An [`Environment`] is built once per compilation and passed by reference
//! to every lookup. It holds the loaded hierarchies of the global layer, the
//! environment itself and its modules, together with the backend registry
//! and the data cache. It is immutable once built; reloading means building
//! a new one (optionally sharing the same cache after invalidating it).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use indexmap::IndexMap;

use crate::backend::BackendRegistry;
use crate::datasource::HierarchyResolver;
use crate::error::{Error, Result};
use crate::hierarchy::{ConfigLoader, Hierarchy, LayerKind, ScopeDescriptor};
use crate::key::LookupKey;
use crate::merge::MergeStrategy;
use crate::provider::DataCache;
use crate::scope::Scope;

/// When module layers take part in a lookup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModuleEligibility {
    /// Modules are consulted only when the global and environment layers
    /// yield nothing, whatever the merge strategy
    FallbackOnly,
    /// `first` lookups fall back to modules; merging lookups always include them
    #[default]
    Aggregate,
}

/// A layer and its loaded hierarchy
#[derive(Debug, Clone)]
pub struct Layer {
    pub hierarchy: Hierarchy,
}

impl Layer {
    /// Load the layer rooted at `root`
    pub fn load(kind: LayerKind, root: impl Into<PathBuf>) -> Result<Self> {
        let descriptor = ScopeDescriptor::new(kind, root);
        Ok(Self {
            hierarchy: ConfigLoader::load(&descriptor)?,
        })
    }

    pub fn kind(&self) -> &LayerKind {
        &self.hierarchy.layer
    }

    pub fn root(&self) -> &Path {
        &self.hierarchy.root
    }

    /// Parse every data file this layer can reach without scope variables
    pub fn check(&self, backends: &BackendRegistry) -> Vec<SourceCheck> {
        let cache = DataCache::new();
        let scope = Scope::new();
        let mut checks = Vec::new();

        for level in &self.hierarchy.levels {
            for source in HierarchyResolver::expand_level(level, &scope).sources {
                let status = match cache.load(&source, backends) {
                    Ok(Some(table)) => CheckStatus::Valid { keys: table.len() },
                    Ok(None) => CheckStatus::Missing,
                    Err(e) => CheckStatus::Invalid(e),
                };
                checks.push(SourceCheck {
                    level: source.level_name,
                    location: source.location,
                    status,
                });
            }
        }

        checks
    }
}

/// Result of checking one data file
#[derive(Debug, Clone)]
pub struct SourceCheck {
    pub level: String,
    pub location: PathBuf,
    pub status: CheckStatus,
}

#[derive(Debug, Clone)]
pub enum CheckStatus {
    Valid { keys: usize },
    Missing,
    Invalid(Error),
}

/// The layers visible to lookups in one environment
pub struct Environment {
    name: String,
    global: Option<Layer>,
    environment: Layer,
    modules: IndexMap<String, Layer>,
    backends: Arc<BackendRegistry>,
    cache: Arc<DataCache>,
    module_eligibility: ModuleEligibility,
}

impl Environment {
    /// Start building an environment named `name` rooted at `root`
    pub fn builder(name: impl Into<String>, root: impl Into<PathBuf>) -> EnvironmentBuilder {
        EnvironmentBuilder {
            name: name.into(),
            root: root.into(),
            global_root: None,
            modules: Vec::new(),
            modulepaths: Vec::new(),
            backends: None,
            cache: None,
            module_eligibility: ModuleEligibility::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn global(&self) -> Option<&Layer> {
        self.global.as_ref()
    }

    pub fn environment(&self) -> &Layer {
        &self.environment
    }

    pub fn module(&self, name: &str) -> Option<&Layer> {
        self.modules.get(name)
    }

    pub fn modules(&self) -> impl Iterator<Item = (&str, &Layer)> {
        self.modules.iter().map(|(name, layer)| (name.as_str(), layer))
    }

    pub fn backends(&self) -> &BackendRegistry {
        &self.backends
    }

    pub fn cache(&self) -> &Arc<DataCache> {
        &self.cache
    }

    pub fn module_eligibility(&self) -> ModuleEligibility {
        self.module_eligibility
    }

    /// Layers searched for every key, in precedence order
    pub fn primary_layers(&self) -> impl Iterator<Item = &Layer> {
        self.global.iter().chain(std::iter::once(&self.environment))
    }

    /// The module layer a key is qualified to, if that module exists
    pub fn module_for(&self, key: &LookupKey) -> Option<&Layer> {
        key.module().and_then(|module| self.modules.get(module))
    }

    /// Merge policy declared for a key's root under `lookup_options`.
    ///
    /// The environment's declaration wins over the module's, which wins over
    /// the global one.
    pub fn declared_merge(&self, key: &LookupKey) -> Option<&MergeStrategy> {
        let root = key.root();
        self.environment
            .hierarchy
            .merge_for(root)
            .or_else(|| self.module_for(key).and_then(|m| m.hierarchy.merge_for(root)))
            .or_else(|| self.global.as_ref().and_then(|g| g.hierarchy.merge_for(root)))
    }

    /// Drop every cached data file under this environment's layers
    pub fn invalidate_cache(&self) {
        for layer in self.primary_layers().chain(self.modules.values()) {
            self.cache.invalidate_under(layer.root());
        }
    }
}

/// Builds an [`Environment`], loading every layer's hierarchy
pub struct EnvironmentBuilder {
    name: String,
    root: PathBuf,
    global_root: Option<PathBuf>,
    modules: Vec<(String, PathBuf)>,
    modulepaths: Vec<PathBuf>,
    backends: Option<Arc<BackendRegistry>>,
    cache: Option<Arc<DataCache>>,
    module_eligibility: ModuleEligibility,
}

impl EnvironmentBuilder {
    /// Add a global layer rooted at `root`
    pub fn global_dir(mut self, root: impl Into<PathBuf>) -> Self {
        self.global_root = Some(root.into());
        self
    }

    /// Add a module layer
    pub fn module(mut self, name: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        self.modules.push((name.into(), root.into()));
        self
    }

    /// Add every subdirectory of `dir` as a module named after it
    pub fn modulepath(mut self, dir: impl Into<PathBuf>) -> Self {
        self.modulepaths.push(dir.into());
        self
    }

    pub fn backends(mut self, backends: Arc<BackendRegistry>) -> Self {
        self.backends = Some(backends);
        self
    }

    /// Share a data cache with other environments
    pub fn cache(mut self, cache: Arc<DataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn module_eligibility(mut self, eligibility: ModuleEligibility) -> Self {
        self.module_eligibility = eligibility;
        self
    }

    /// Load every hierarchy declaration
    pub fn build(self) -> Result<Environment> {
        let global = self
            .global_root
            .map(|root| Layer::load(LayerKind::Global, root))
            .transpose()?;

        let environment = Layer::load(LayerKind::Environment(self.name.clone()), self.root)?;

        let mut modules = IndexMap::new();
        for dir in &self.modulepaths {
            for (name, root) in scan_modulepath(dir)? {
                if !modules.contains_key(&name) {
                    let layer = Layer::load(LayerKind::Module(name.clone()), root)?;
                    modules.insert(name, layer);
                }
            }
        }
        // Explicit modules replace any found on a modulepath
        for (name, root) in self.modules {
            let layer = Layer::load(LayerKind::Module(name.clone()), root)?;
            modules.insert(name, layer);
        }

        log::debug!(
            "Environment '{}' built with {} module(s){}",
            self.name,
            modules.len(),
            if global.is_some() { " and a global layer" } else { "" }
        );

        Ok(Environment {
            name: self.name,
            global,
            environment,
            modules,
            backends: self
                .backends
                .unwrap_or_else(|| Arc::new(BackendRegistry::with_builtins())),
            cache: self.cache.unwrap_or_default(),
            module_eligibility: self.module_eligibility,
        })
    }
}

fn scan_modulepath(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::io(dir, e.to_string()))?;

    let mut modules = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(dir, e.to_string()))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            modules.push((name.to_string(), path.clone()));
        }
    }
    modules.sort();
    Ok(modules)
}
