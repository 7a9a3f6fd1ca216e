//! Configuration file handling
//!
//! Every table is optional; missing keys fall back to the defaults below and
//! command line flags are applied on top by the binary.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strand_plugin_host::{
    default_plugin_dirs, LoaderConfig, PluginRegistry, WasmArtifactLoader, WatcherConfig,
};

/// Name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "strand.toml";

const APP_NAME: &str = "strand";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub plugins: PluginsConfig,
    pub loader: LoaderSection,
    pub server: ServerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    /// Artifact directory; the platform default when unset
    pub dir: Option<PathBuf>,
    pub extension: String,
    pub default_namespace: Option<String>,
    /// Reload changed artifacts in the background
    pub watch: bool,
    pub debounce_ms: u64,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            dir: None,
            extension: "wasm".to_string(),
            default_namespace: None,
            watch: false,
            debounce_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderSection {
    pub fuel_limit: u64,
    pub max_stack_size: usize,
}

impl Default for LoaderSection {
    fn default() -> Self {
        let defaults = LoaderConfig::default();
        Self {
            fuel_limit: defaults.fuel_limit,
            max_stack_size: defaults.max_stack_size,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load the given file, or `strand.toml` when present, or the defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let local = Path::new(DEFAULT_CONFIG_FILE);
                if local.is_file() {
                    Self::load(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.plugins.extension.trim_start_matches('.').is_empty() {
            bail!("plugins.extension must not be empty");
        }
        if self.loader.fuel_limit == 0 {
            bail!("loader.fuel_limit must be greater than zero");
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.server
            .listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", self.server.listen))
    }

    /// Directory scanned for artifacts
    ///
    /// Without an explicit `dir`, the first existing platform default is
    /// used, falling back to `./plugins`.
    pub fn plugin_dir(&self) -> PathBuf {
        if let Some(dir) = &self.plugins.dir {
            return dir.clone();
        }
        let candidates = default_plugin_dirs(APP_NAME);
        candidates
            .iter()
            .find(|dir| dir.is_dir())
            .or_else(|| candidates.last())
            .cloned()
            .unwrap_or_else(|| PathBuf::from("plugins"))
    }

    pub fn loader_config(&self) -> LoaderConfig {
        LoaderConfig {
            fuel_limit: self.loader.fuel_limit,
            max_stack_size: self.loader.max_stack_size,
        }
    }

    pub fn watcher_config(&self) -> WatcherConfig {
        WatcherConfig {
            debounce: Duration::from_millis(self.plugins.debounce_ms),
        }
    }

    /// Discover the plugin directory with a Wasm loader built from `[loader]`
    pub fn build_registry(&self) -> Result<PluginRegistry> {
        let loader = WasmArtifactLoader::with_config(self.loader_config())
            .context("Failed to create artifact loader")?;

        let mut builder = PluginRegistry::builder()
            .loader(std::sync::Arc::new(loader))
            .extension(self.plugins.extension.clone())
            .discover(self.plugin_dir());
        if let Some(namespace) = &self.plugins.default_namespace {
            builder = builder.default_namespace(namespace.clone());
        }

        builder.build().context("Failed to build plugin registry")
    }
}
