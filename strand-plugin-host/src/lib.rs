//! strand-plugin-host: hot-reloading plugin registry for strand
//!
//! This crate discovers plugin artifacts in a directory, loads them with
//! wasmtime and republishes each plugin when its artifact changes on disk.

pub mod discovery;
pub mod loader;
pub mod plugin;
pub mod registry;
pub mod slot;
pub mod watcher;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{default_plugin_dirs, ArtifactScanner, DiscoveryError, DiscoveryResult};
pub use loader::{ArtifactLoader, LoaderConfig, LoaderError, WasmArtifactLoader, WasmPlugin};
pub use plugin::{PluginHandle, PluginInfo, ProcessError, StringPlugin};
pub use registry::{PluginRegistry, RegistryBuilder, RegistryError};
pub use slot::{Generation, ReloadOutcome, ReloadableSlot};
pub use strand_plugin_api::{ArtifactManifest, PluginSpec, API_VERSION};
pub use watcher::{HotReloadWatcher, WatcherConfig, WatcherError};
