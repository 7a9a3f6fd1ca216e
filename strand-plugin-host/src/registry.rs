//! Plugin registry with hot reload support
//!
//! The key space (plugin names and type identifiers) is fixed when
//! [`RegistryBuilder::build`] returns. Afterwards only the instances inside
//! each [`ReloadableSlot`] change, and every lookup first asks the slot to
//! check its artifact.

use crate::discovery::{ArtifactScanner, DEFAULT_EXTENSION};
use crate::loader::{ArtifactLoader, LoaderError, WasmArtifactLoader};
use crate::plugin::{PluginHandle, PluginInfo, ProcessError};
use crate::slot::{artifact_modified, ReloadOutcome, ReloadableSlot};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A thread-safe registry of hot-reloadable plugins
#[derive(Clone)]
pub struct PluginRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    /// Slots indexed by plugin name
    by_name: HashMap<String, Arc<ReloadableSlot>>,
    /// Same slots indexed by fully-qualified type identifier
    by_type: HashMap<String, Arc<ReloadableSlot>>,
    /// Prefix tried when a bare type identifier is not found
    default_namespace: Option<String>,
    /// Artifacts that were loaded, in discovery order
    artifacts: Vec<PathBuf>,
    /// Directories that were scanned
    directories: Vec<PathBuf>,
}

/// Builder that performs discovery and freezes the registry key space
pub struct RegistryBuilder {
    loader: Option<Arc<dyn ArtifactLoader>>,
    default_namespace: Option<String>,
    extension: String,
    directories: Vec<PathBuf>,
    artifacts: Vec<PathBuf>,
}

/// Errors returned by [`PluginRegistry::invoke`]
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Plugin not found: {0}")]
    PluginNotFound(String),

    #[error("Plugin '{plugin}' failed: {source}")]
    Processing {
        plugin: String,
        #[source]
        source: ProcessError,
    },
}

impl RegistryError {
    /// True when the lookup failed, as opposed to the plugin itself
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PluginNotFound(_))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self {
            loader: None,
            default_namespace: None,
            extension: DEFAULT_EXTENSION.to_string(),
            directories: Vec::new(),
            artifacts: Vec::new(),
        }
    }
}

impl RegistryBuilder {
    /// Use a specific artifact loader instead of a default [`WasmArtifactLoader`]
    pub fn loader(mut self, loader: Arc<dyn ArtifactLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Namespace prepended to bare type identifiers in [`PluginRegistry::get_by_type`]
    pub fn default_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.default_namespace = Some(namespace).filter(|ns| !ns.is_empty());
        self
    }

    /// Artifact file extension used by [`RegistryBuilder::discover`]
    pub fn extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Scan a directory for artifacts at build time
    pub fn discover(mut self, dir: impl Into<PathBuf>) -> Self {
        self.directories.push(dir.into());
        self
    }

    /// Register a single artifact file at build time
    pub fn register_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    /// Load every artifact and build the registry
    ///
    /// Unreadable directories and broken artifacts are logged and skipped;
    /// only failing to create the default loader is an error.
    pub fn build(self) -> Result<PluginRegistry, LoaderError> {
        let loader: Arc<dyn ArtifactLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(WasmArtifactLoader::new()?),
        };

        let scanner = ArtifactScanner::new(self.extension);
        let scanned = scanner.scan_directories(&self.directories);
        for (path, error) in &scanned.failures {
            tracing::warn!(path = %path.display(), error = %error, "Plugin discovery failed");
        }

        let mut candidates = scanned.artifacts;
        candidates.extend(self.artifacts);

        let mut inner = RegistryInner {
            by_name: HashMap::new(),
            by_type: HashMap::new(),
            default_namespace: self.default_namespace,
            artifacts: Vec::new(),
            directories: self.directories,
        };

        for path in candidates {
            if inner.artifacts.contains(&path) {
                continue;
            }
            if let Err(e) = inner.load_artifact(&loader, &path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load artifact");
            }
        }

        tracing::info!(
            plugins = inner.by_name.len(),
            artifacts = inner.artifacts.len(),
            "Plugins loaded"
        );

        Ok(PluginRegistry {
            inner: Arc::new(inner),
        })
    }
}

impl RegistryInner {
    fn load_artifact(
        &mut self,
        loader: &Arc<dyn ArtifactLoader>,
        path: &Path,
    ) -> Result<(), LoaderError> {
        // Read before loading so a write racing the load triggers a reload later
        let modified = artifact_modified(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let plugins = loader.load(path)?;
        self.artifacts.push(path.to_path_buf());

        for plugin in plugins {
            let slot = Arc::new(ReloadableSlot::new(
                plugin,
                path,
                modified,
                Arc::clone(loader),
            ));
            let name = slot.name().to_string();
            tracing::info!(plugin = %name, path = %path.display(), "Plugin registered");

            if let Some(type_name) = slot.current().type_name() {
                self.by_type.insert(type_name.to_string(), Arc::clone(&slot));
            }
            if let Some(previous) = self.by_name.insert(name.clone(), slot) {
                tracing::warn!(
                    plugin = %name,
                    previous = %previous.artifact().display(),
                    current = %path.display(),
                    "Duplicate plugin name, last discovered wins"
                );
            }
        }

        Ok(())
    }
}

impl PluginRegistry {
    /// Start building a registry
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Discover `.wasm` artifacts in `dir` with the default loader
    pub fn discover(dir: impl Into<PathBuf>) -> Result<Self, LoaderError> {
        Self::builder().discover(dir).build()
    }

    /// Current name and description of every plugin, sorted by name
    ///
    /// Each slot is checked for reload first. The result is not a
    /// consistent snapshot across slots while reloads are in flight.
    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self
            .inner
            .by_name
            .values()
            .map(|slot| {
                slot.check_reload();
                slot.info()
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Look up a plugin by name
    pub fn get_by_name(&self, name: &str) -> Option<PluginHandle> {
        self.inner.by_name.get(name).map(|slot| slot.get())
    }

    /// Look up a plugin by type identifier, then by `default_namespace.type_id`
    pub fn get_by_type(&self, type_id: &str) -> Option<PluginHandle> {
        self.slot_by_type(type_id).map(|slot| slot.get())
    }

    /// Look up a plugin by name, falling back to its type identifier
    pub fn get(&self, id: &str) -> Option<PluginHandle> {
        self.get_by_name(id).or_else(|| self.get_by_type(id))
    }

    /// Resolve `id` and run the plugin on `input`
    pub fn invoke(&self, id: &str, input: &str) -> Result<String, RegistryError> {
        let plugin = self
            .get(id)
            .ok_or_else(|| RegistryError::PluginNotFound(id.to_string()))?;

        plugin
            .process(input)
            .map_err(|source| RegistryError::Processing {
                plugin: id.to_string(),
                source,
            })
    }

    /// Published info for a plugin name, without checking its artifact
    pub fn snapshot(&self, name: &str) -> Option<PluginInfo> {
        self.inner.by_name.get(name).map(|slot| slot.info())
    }

    /// Slots currently backed by `path`, sorted by plugin name
    pub fn slots_for_artifact(&self, path: &Path) -> Vec<Arc<ReloadableSlot>> {
        let mut slots: Vec<Arc<ReloadableSlot>> = self
            .inner
            .by_name
            .values()
            .filter(|slot| slot.artifact() == path)
            .cloned()
            .collect();
        slots.sort_by(|a, b| a.name().cmp(b.name()));
        slots
    }

    /// Check every slot backed by `path`; returns how many were reloaded
    pub fn check_artifact(&self, path: &Path) -> usize {
        self.slots_for_artifact(path)
            .iter()
            .filter(|slot| matches!(slot.check_reload(), ReloadOutcome::Reloaded { .. }))
            .count()
    }

    /// Check every slot; returns how many were reloaded
    pub fn check_all(&self) -> usize {
        self.inner
            .by_name
            .values()
            .filter(|slot| matches!(slot.check_reload(), ReloadOutcome::Reloaded { .. }))
            .count()
    }

    /// Registered plugin names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.by_name.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a plugin name exists
    pub fn contains(&self, name: &str) -> bool {
        self.inner.by_name.contains_key(name)
    }

    /// Artifacts that contributed to the key space
    pub fn artifacts(&self) -> &[PathBuf] {
        &self.inner.artifacts
    }

    /// Directories scanned at build time
    pub fn directories(&self) -> &[PathBuf] {
        &self.inner.directories
    }

    /// Namespace used as fallback for bare type identifiers
    pub fn default_namespace(&self) -> Option<&str> {
        self.inner.default_namespace.as_deref()
    }

    /// Get the number of registered plugin names
    pub fn len(&self) -> usize {
        self.inner.by_name.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.by_name.is_empty()
    }

    fn slot_by_type(&self, type_id: &str) -> Option<&Arc<ReloadableSlot>> {
        self.inner.by_type.get(type_id).or_else(|| {
            let namespace = self.inner.default_namespace.as_deref()?;
            self.inner.by_type.get(&format!("{}.{}", namespace, type_id))
        })
    }
}
