//! Reloadable slot: one plugin name bound to its artifact
//!
//! The published instance lives behind an `RwLock<Arc<Generation>>` and is
//! replaced as a whole, so readers either see the previous generation or
//! the new one. Reload checks take a separate per-slot mutex that also
//! holds the last observed modification time; readers never wait on it.

use crate::loader::{ArtifactLoader, LoaderError};
use crate::plugin::{PluginHandle, PluginInfo};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::SystemTime;

/// A published plugin instance
pub struct Generation {
    /// The instance callers receive
    pub plugin: PluginHandle,

    /// 1 for the instance found at discovery, +1 per successful reload
    pub number: u64,

    /// When this generation was published
    pub loaded_at: DateTime<Utc>,

    /// Artifact modification time this generation was loaded from
    pub modified: SystemTime,
}

/// Result of [`ReloadableSlot::check_reload`]
#[derive(Debug)]
pub enum ReloadOutcome {
    /// Artifact not modified since the last check
    Unchanged,

    /// A new generation was published
    Reloaded { generation: u64 },

    /// The artifact reloaded but no longer declares this plugin; previous instance kept
    Retained,

    /// The artifact failed to load; previous instance kept
    Failed(LoaderError),
}

/// Holder of one named plugin and its hot-reload protocol
pub struct ReloadableSlot {
    name: String,
    artifact: PathBuf,
    loader: Arc<dyn ArtifactLoader>,
    current: RwLock<Arc<Generation>>,
    observed: Mutex<SystemTime>,
}

impl ReloadableSlot {
    /// Wrap a freshly discovered plugin
    ///
    /// `modified` is the artifact modification time read before the load
    /// that produced `plugin`.
    pub fn new(
        plugin: PluginHandle,
        artifact: impl Into<PathBuf>,
        modified: SystemTime,
        loader: Arc<dyn ArtifactLoader>,
    ) -> Self {
        let generation = Generation {
            plugin: Arc::clone(&plugin),
            number: 1,
            loaded_at: Utc::now(),
            modified,
        };
        Self {
            name: plugin.name().to_string(),
            artifact: artifact.into(),
            loader,
            current: RwLock::new(Arc::new(generation)),
            observed: Mutex::new(modified),
        }
    }

    /// Slot key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Artifact backing this slot
    pub fn artifact(&self) -> &Path {
        &self.artifact
    }

    /// Currently published generation, without checking the artifact
    pub fn generation(&self) -> Arc<Generation> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&current)
    }

    /// Currently published instance, without checking the artifact
    pub fn current(&self) -> PluginHandle {
        Arc::clone(&self.generation().plugin)
    }

    /// Check the artifact and return the (possibly new) instance
    pub fn get(&self) -> PluginHandle {
        self.check_reload();
        self.current()
    }

    /// Snapshot of the published generation
    pub fn info(&self) -> PluginInfo {
        let generation = self.generation();
        PluginInfo {
            name: self.name.clone(),
            description: generation.plugin.description().to_string(),
            type_name: generation.plugin.type_name().map(str::to_string),
            artifact: self.artifact.clone(),
            generation: generation.number,
            loaded_at: generation.loaded_at,
            artifact_modified: DateTime::<Utc>::from(generation.modified),
        }
    }

    /// Reload the plugin if its artifact changed since the last check
    ///
    /// Checks on the same slot are serialized; concurrent callers wait for
    /// an in-flight load and then see its result as `Unchanged`.
    pub fn check_reload(&self) -> ReloadOutcome {
        let modified = match artifact_modified(&self.artifact) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::debug!(
                    plugin = %self.name,
                    path = %self.artifact.display(),
                    error = %e,
                    "Artifact metadata unavailable, keeping current instance"
                );
                return ReloadOutcome::Unchanged;
            }
        };

        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        if modified <= *observed {
            tracing::trace!(plugin = %self.name, "Artifact unchanged");
            return ReloadOutcome::Unchanged;
        }

        // Recorded before loading so a broken artifact is retried only
        // after its next modification.
        *observed = modified;

        tracing::info!(
            plugin = %self.name,
            path = %self.artifact.display(),
            "Artifact changed, reloading"
        );

        let plugins = match self.loader.load(&self.artifact) {
            Ok(plugins) => plugins,
            Err(e) => {
                tracing::warn!(
                    plugin = %self.name,
                    path = %self.artifact.display(),
                    error = %e,
                    "Failed to reload artifact, keeping previous instance"
                );
                return ReloadOutcome::Failed(e);
            }
        };

        let Some(plugin) = plugins.into_iter().rev().find(|p| p.name() == self.name) else {
            tracing::warn!(
                plugin = %self.name,
                path = %self.artifact.display(),
                "Reloaded artifact no longer declares plugin, keeping previous instance"
            );
            return ReloadOutcome::Retained;
        };

        let previous = self.generation();
        if plugin.type_name() != previous.plugin.type_name() {
            tracing::warn!(
                plugin = %self.name,
                previous = previous.plugin.type_name().unwrap_or("<none>"),
                current = plugin.type_name().unwrap_or("<none>"),
                "Plugin type changed across reload"
            );
        }

        let generation = Arc::new(Generation {
            plugin,
            number: previous.number + 1,
            loaded_at: Utc::now(),
            modified,
        });
        let number = generation.number;

        *self.current.write().unwrap_or_else(PoisonError::into_inner) = generation;

        tracing::info!(plugin = %self.name, generation = number, "Plugin reloaded");
        ReloadOutcome::Reloaded { generation: number }
    }
}

/// Last modification time of an artifact
pub fn artifact_modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}
