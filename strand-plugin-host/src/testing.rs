//! Test helpers: a text-scripted artifact loader
//!
//! Artifact files hold one plugin per line as
//! `name;type_name;description;output`. An output of `!fail` makes
//! `process` fail; a file starting with `!corrupt` fails to load.

use crate::loader::{ArtifactLoader, LoaderError};
use crate::plugin::{PluginHandle, ProcessError, StringPlugin};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

pub(crate) struct ScriptedLoader {
    loads: AtomicUsize,
    delay: Duration,
}

struct ScriptedPlugin {
    name: String,
    type_name: Option<String>,
    description: String,
    output: String,
}

impl ScriptedLoader {
    pub(crate) fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            loads: AtomicUsize::new(0),
            delay,
        }
    }

    pub(crate) fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ArtifactLoader for ScriptedLoader {
    fn load(&self, path: &Path) -> Result<Vec<PluginHandle>, LoaderError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        let text = std::fs::read_to_string(path).map_err(|source| LoaderError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if text.starts_with("!corrupt") {
            return Err(LoaderError::InvalidManifest("scripted corruption".to_string()));
        }

        let mut plugins: Vec<PluginHandle> = Vec::new();
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            let fields: Vec<&str> = line.splitn(4, ';').collect();
            if fields.len() != 4 {
                return Err(LoaderError::InvalidManifest(format!("bad line: {}", line)));
            }
            plugins.push(Arc::new(ScriptedPlugin {
                name: fields[0].to_string(),
                type_name: Some(fields[1].to_string()).filter(|t| !t.is_empty()),
                description: fields[2].to_string(),
                output: fields[3].to_string(),
            }));
        }
        Ok(plugins)
    }
}

impl StringPlugin for ScriptedPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    fn process(&self, _input: &str) -> Result<String, ProcessError> {
        if self.output == "!fail" {
            Err(ProcessError::Failed("scripted failure".to_string()))
        } else {
            Ok(self.output.clone())
        }
    }
}

pub(crate) fn write_artifact(dir: &Path, file_name: &str, script: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, script).unwrap();
    path
}

/// Move the artifact's mtime `secs` into the future, past anything a
/// slot may have observed.
pub(crate) fn bump_modified(path: &Path, secs: u64) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(secs))
        .unwrap();
}

/// Atomically replace an artifact with a new script and a bumped mtime,
/// so concurrent readers never observe a half-written file.
pub(crate) fn replace_artifact(path: &Path, script: &str, secs: u64) {
    let staging = path.with_extension("staging");
    std::fs::write(&staging, script).unwrap();
    bump_modified(&staging, secs);
    std::fs::rename(&staging, path).unwrap();
}
