//! Artifact discovery and directory scanning
//!
//! Finds candidate artifact files in plugin directories. Loading them is
//! left to the registry.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default artifact file extension
pub const DEFAULT_EXTENSION: &str = "wasm";

/// Errors that can occur during artifact discovery
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Failed to read directory {path}: {source}")]
    ReadDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of artifact discovery
#[derive(Debug, Default)]
pub struct DiscoveryResult {
    /// Artifact files found, in scan order
    pub artifacts: Vec<PathBuf>,

    /// Directories or entries that could not be read
    pub failures: Vec<(PathBuf, DiscoveryError)>,
}

impl DiscoveryResult {
    /// Returns true if every directory was read completely
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Non-recursive artifact directory scanner
#[derive(Debug, Clone)]
pub struct ArtifactScanner {
    extension: String,
}

impl Default for ArtifactScanner {
    fn default() -> Self {
        Self::new(DEFAULT_EXTENSION)
    }
}

impl ArtifactScanner {
    /// Create a scanner for files ending in `.{extension}` (case-insensitive)
    pub fn new(extension: impl Into<String>) -> Self {
        let extension = extension.into();
        Self {
            extension: extension.trim_start_matches('.').to_ascii_lowercase(),
        }
    }

    /// Extension this scanner matches, without the leading dot
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Check whether a path looks like an artifact
    pub fn is_artifact(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false)
    }

    /// Scan a directory for artifact files
    ///
    /// Subdirectories are not entered. Results are sorted by path.
    pub fn scan_directory(&self, dir: impl AsRef<Path>) -> Result<DiscoveryResult, DiscoveryError> {
        let dir = dir.as_ref();

        if !dir.is_dir() {
            return Err(DiscoveryError::DirectoryNotFound(dir.to_path_buf()));
        }

        let entries = std::fs::read_dir(dir).map_err(|source| DiscoveryError::ReadDirectory {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut result = DiscoveryResult::default();

        for entry in entries {
            let entry = match entry {
                Ok(e) => e,
                Err(source) => {
                    result.failures.push((
                        dir.to_path_buf(),
                        DiscoveryError::ReadDirectory {
                            path: dir.to_path_buf(),
                            source,
                        },
                    ));
                    continue;
                }
            };

            let path = entry.path();
            if path.is_file() && self.is_artifact(&path) {
                result.artifacts.push(path);
            }
        }

        result.artifacts.sort();
        Ok(result)
    }

    /// Scan multiple directories
    ///
    /// Directory-level errors are collected instead of aborting the scan.
    pub fn scan_directories(
        &self,
        dirs: impl IntoIterator<Item = impl AsRef<Path>>,
    ) -> DiscoveryResult {
        let mut all = DiscoveryResult::default();

        for dir in dirs {
            let dir = dir.as_ref();
            match self.scan_directory(dir) {
                Ok(result) => {
                    all.artifacts.extend(result.artifacts);
                    all.failures.extend(result.failures);
                }
                Err(e) => all.failures.push((dir.to_path_buf(), e)),
            }
        }

        all
    }
}

/// Get default plugin directories for the current platform
pub fn default_plugin_dirs(app_name: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();

    // User-local plugins
    if let Some(data_dir) = dirs::data_local_dir() {
        dirs.push(data_dir.join(app_name).join("plugins"));
    }

    // Current directory plugins
    dirs.push(PathBuf::from("plugins"));

    dirs
}
