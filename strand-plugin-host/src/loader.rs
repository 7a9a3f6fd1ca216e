//! Artifact loader using wasmtime
//!
//! Every [`ArtifactLoader::load`] compiles the artifact from scratch, so a
//! reload never reuses code or state from an earlier generation. Each
//! `process` call then runs in a fresh store with its own fuel budget.

use crate::plugin::{PluginHandle, ProcessError, StringPlugin};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strand_plugin_api::{
    exports, unpack_outcome, unpack_ptr_len, ArtifactManifest, PluginSpec, API_VERSION,
};
use thiserror::Error;
use wasmtime::*;

/// Errors that can occur during artifact loading
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Engine creation failed: {0}")]
    EngineCreation(#[source] anyhow::Error),

    #[error("Failed to read artifact {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Module compilation failed: {0}")]
    ModuleCompilation(#[source] anyhow::Error),

    #[error("Instantiation failed: {0}")]
    Instantiation(#[source] anyhow::Error),

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Plugin '{plugin}' export '{export}' is missing or is not (i32, i32) -> i64")]
    InvalidPluginExport { plugin: String, export: String },

    #[error("Function call failed: {function} - {source}")]
    FunctionCall {
        function: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error("API version mismatch: expected {expected}, got {actual}")]
    ApiVersionMismatch { expected: u32, actual: u32 },

    #[error("Deserialization failed: {0}")]
    Deserialization(#[source] rmp_serde::decode::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Memory access error: {0}")]
    MemoryAccess(String),

    #[error("Fuel exhausted (CPU limit exceeded)")]
    FuelExhausted,
}

/// Produces fresh plugin instances from an artifact file
pub trait ArtifactLoader: Send + Sync {
    /// Load every plugin the artifact declares
    ///
    /// Each call must produce new instances that share nothing with
    /// instances from earlier calls.
    fn load(&self, path: &Path) -> Result<Vec<PluginHandle>, LoaderError>;
}

/// Configuration for the Wasm artifact loader
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Fuel limit per call (CPU limit)
    pub fuel_limit: u64,

    /// Maximum WASM stack size in bytes
    pub max_stack_size: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            fuel_limit: 10_000_000,
            max_stack_size: 1024 * 1024, // 1MB
        }
    }
}

/// Artifact loader backed by a wasmtime engine
pub struct WasmArtifactLoader {
    engine: Engine,
    config: LoaderConfig,
}

/// One compiled generation of an artifact
///
/// Shared by every plugin the generation declares; dropped together with
/// the last of them.
struct CompiledArtifact {
    path: PathBuf,
    engine: Engine,
    instance_pre: InstancePre<()>,
    fuel_limit: u64,
}

/// A plugin declared by a Wasm artifact
pub struct WasmPlugin {
    spec: PluginSpec,
    artifact: Arc<CompiledArtifact>,
}

impl WasmArtifactLoader {
    /// Create a loader with default limits
    pub fn new() -> Result<Self, LoaderError> {
        Self::with_config(LoaderConfig::default())
    }

    /// Create a loader with custom limits
    pub fn with_config(config: LoaderConfig) -> Result<Self, LoaderError> {
        let mut wasm_config = Config::new();
        wasm_config.consume_fuel(true);
        wasm_config.wasm_memory64(false);
        wasm_config.max_wasm_stack(config.max_stack_size);

        let engine = Engine::new(&wasm_config).map_err(LoaderError::EngineCreation)?;

        Ok(Self { engine, config })
    }

    /// Loader configuration
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Compile artifact bytes and validate the plugins they declare
    ///
    /// `path` is only recorded for diagnostics.
    pub fn load_bytes(
        &self,
        wasm_bytes: &[u8],
        path: &Path,
    ) -> Result<Vec<WasmPlugin>, LoaderError> {
        // 1. Compile module (binary or text form)
        let module =
            Module::new(&self.engine, wasm_bytes).map_err(LoaderError::ModuleCompilation)?;

        // 2. Pre-link; artifacts get no host imports
        let linker: Linker<()> = Linker::new(&self.engine);
        let instance_pre = linker
            .instantiate_pre(&module)
            .map_err(LoaderError::Instantiation)?;

        // 3. Instantiate once to read the manifest
        let mut store = Store::new(&self.engine, ());
        store
            .set_fuel(self.config.fuel_limit)
            .map_err(LoaderError::EngineCreation)?;
        let instance = instance_pre
            .instantiate(&mut store)
            .map_err(LoaderError::Instantiation)?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| LoaderError::ExportNotFound(exports::MEMORY.to_string()))?;

        instance
            .get_typed_func::<i32, i32>(&mut store, exports::ALLOC)
            .map_err(|_| LoaderError::ExportNotFound(exports::ALLOC.to_string()))?;

        let dealloc_fn = instance
            .get_typed_func::<(i32, i32), ()>(&mut store, exports::DEALLOC)
            .map_err(|_| LoaderError::ExportNotFound(exports::DEALLOC.to_string()))?;

        let manifest_fn = instance
            .get_typed_func::<(), i64>(&mut store, exports::MANIFEST)
            .map_err(|_| LoaderError::ExportNotFound(exports::MANIFEST.to_string()))?;

        let packed = manifest_fn.call(&mut store, ()).map_err(|e| {
            if is_out_of_fuel(&e) {
                LoaderError::FuelExhausted
            } else {
                LoaderError::FunctionCall {
                    function: exports::MANIFEST,
                    source: e,
                }
            }
        })?;

        let (ptr, len) = unpack_ptr_len(packed);
        if len < 0 {
            return Err(LoaderError::InvalidManifest(format!(
                "negative manifest length {}",
                len
            )));
        }

        // 4. Decode and validate the manifest
        let manifest_bytes = read_memory(&store, &memory, ptr, len as usize)
            .map_err(LoaderError::MemoryAccess)?;
        let manifest: ArtifactManifest =
            rmp_serde::from_slice(&manifest_bytes).map_err(LoaderError::Deserialization)?;

        if manifest.api_version != API_VERSION {
            return Err(LoaderError::ApiVersionMismatch {
                expected: API_VERSION,
                actual: manifest.api_version,
            });
        }

        dealloc_fn
            .call(&mut store, (ptr, len))
            .map_err(|e| LoaderError::FunctionCall {
                function: exports::DEALLOC,
                source: e,
            })?;

        // 5. Every declared plugin must export a process function
        for spec in &manifest.plugins {
            if spec.name.is_empty() {
                return Err(LoaderError::InvalidManifest(format!(
                    "plugin with export '{}' has an empty name",
                    spec.export
                )));
            }
            instance
                .get_typed_func::<(i32, i32), i64>(&mut store, &spec.export)
                .map_err(|_| LoaderError::InvalidPluginExport {
                    plugin: spec.name.clone(),
                    export: spec.export.clone(),
                })?;
        }

        let artifact = Arc::new(CompiledArtifact {
            path: path.to_path_buf(),
            engine: self.engine.clone(),
            instance_pre,
            fuel_limit: self.config.fuel_limit,
        });

        tracing::debug!(
            path = %path.display(),
            plugins = manifest.plugins.len(),
            "Artifact compiled"
        );

        Ok(manifest
            .plugins
            .into_iter()
            .map(|spec| WasmPlugin {
                spec,
                artifact: Arc::clone(&artifact),
            })
            .collect())
    }
}

impl ArtifactLoader for WasmArtifactLoader {
    fn load(&self, path: &Path) -> Result<Vec<PluginHandle>, LoaderError> {
        let wasm_bytes = std::fs::read(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let plugins = self.load_bytes(&wasm_bytes, path)?;
        Ok(plugins
            .into_iter()
            .map(|plugin| Arc::new(plugin) as PluginHandle)
            .collect())
    }
}

impl WasmPlugin {
    /// Manifest entry this plugin was created from
    pub fn spec(&self) -> &PluginSpec {
        &self.spec
    }

    /// Artifact this plugin was compiled from
    pub fn artifact_path(&self) -> &Path {
        &self.artifact.path
    }
}

impl StringPlugin for WasmPlugin {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn description(&self) -> &str {
        &self.spec.description
    }

    fn type_name(&self) -> Option<&str> {
        self.spec.type_name.as_deref()
    }

    fn process(&self, input: &str) -> Result<String, ProcessError> {
        let artifact = &self.artifact;

        // 1. Fresh store and instance per call
        let mut store = Store::new(&artifact.engine, ());
        store
            .set_fuel(artifact.fuel_limit)
            .map_err(ProcessError::Instantiation)?;
        let instance = artifact
            .instance_pre
            .instantiate(&mut store)
            .map_err(call_error)?;

        let memory = instance
            .get_memory(&mut store, exports::MEMORY)
            .ok_or_else(|| ProcessError::MemoryAccess("memory export missing".to_string()))?;
        let alloc_fn = instance
            .get_typed_func::<i32, i32>(&mut store, exports::ALLOC)
            .map_err(ProcessError::Instantiation)?;
        let process_fn = instance
            .get_typed_func::<(i32, i32), i64>(&mut store, &self.spec.export)
            .map_err(ProcessError::Instantiation)?;

        // 2. Copy input into guest memory
        let input_bytes = input.as_bytes();
        let input_len = i32::try_from(input_bytes.len())
            .map_err(|_| ProcessError::MemoryAccess("input too large".to_string()))?;
        let input_ptr = alloc_fn
            .call(&mut store, input_len)
            .map_err(call_error)?;
        memory
            .write(&mut store, input_ptr as u32 as usize, input_bytes)
            .map_err(|e| ProcessError::MemoryAccess(format!("Failed to write input: {}", e)))?;

        // 3. Call the plugin's export
        let packed = process_fn
            .call(&mut store, (input_ptr, input_len))
            .map_err(call_error)?;

        // 4. Read output, which may be a failure message
        let (output_ptr, output_len, failed) = unpack_outcome(packed);
        let output_bytes = read_memory(&store, &memory, output_ptr, output_len as usize)
            .map_err(ProcessError::MemoryAccess)?;
        let output = String::from_utf8(output_bytes)
            .map_err(|e| ProcessError::InvalidOutput(e.to_string()))?;

        if failed {
            Err(ProcessError::Failed(output))
        } else {
            Ok(output)
        }
    }
}

fn read_memory(
    store: &Store<()>,
    memory: &Memory,
    ptr: i32,
    len: usize,
) -> Result<Vec<u8>, String> {
    let data = memory.data(store);
    let start = ptr as u32 as usize;
    let end = start.checked_add(len).unwrap_or(usize::MAX);
    if end > data.len() {
        return Err(format!(
            "Out of bounds: ptr={}, len={}, memory_size={}",
            start,
            len,
            data.len()
        ));
    }
    Ok(data[start..end].to_vec())
}

fn is_out_of_fuel(error: &anyhow::Error) -> bool {
    matches!(error.downcast_ref::<Trap>(), Some(Trap::OutOfFuel))
}

fn call_error(error: anyhow::Error) -> ProcessError {
    if is_out_of_fuel(&error) {
        ProcessError::FuelExhausted
    } else {
        ProcessError::Trap(error)
    }
}
