//! Plugin capability contract
//!
//! Every plugin, whatever artifact it came from, is driven through
//! [`StringPlugin`]. The registry only ever hands out [`PluginHandle`]s.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// A string-transform plugin
///
/// `process` may be called concurrently from several threads.
pub trait StringPlugin: Send + Sync {
    /// Registry key; stable across instances of the same plugin
    fn name(&self) -> &str;

    /// Human-readable description
    fn description(&self) -> &str;

    /// Fully-qualified type identifier, if the artifact declared one
    fn type_name(&self) -> Option<&str> {
        None
    }

    /// Transform `input` into the plugin's output
    fn process(&self, input: &str) -> Result<String, ProcessError>;
}

/// Shared handle to a published plugin instance
pub type PluginHandle = Arc<dyn StringPlugin>;

/// Errors raised by [`StringPlugin::process`]
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Plugin reported failure: {0}")]
    Failed(String),

    #[error("Plugin trapped: {0}")]
    Trap(#[source] anyhow::Error),

    #[error("Fuel exhausted (CPU limit exceeded)")]
    FuelExhausted,

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Invalid plugin output: {0}")]
    InvalidOutput(String),

    #[error("Memory access error: {0}")]
    MemoryAccess(String),
}

/// Snapshot of one registry entry, as returned by `PluginRegistry::list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    /// Registry key
    pub name: String,

    /// Description of the currently published instance
    pub description: String,

    /// Type identifier of the currently published instance
    pub type_name: Option<String>,

    /// Artifact the plugin is loaded from
    pub artifact: PathBuf,

    /// Number of times this slot has been published (1 after discovery)
    pub generation: u64,

    /// When the current instance was published
    pub loaded_at: DateTime<Utc>,

    /// Artifact modification time the current instance was loaded from
    pub artifact_modified: DateTime<Utc>,
}
