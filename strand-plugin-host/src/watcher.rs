//! Background reloads driven by file system events
//!
//! Lookups already reload stale plugins on demand. The watcher does the
//! same work ahead of time: when a registered artifact changes on disk, the
//! slots it backs are checked on a blocking thread so the next request finds
//! the new generation already published. Artifacts that appear after
//! discovery are ignored.

use crate::PluginRegistry;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct WatcherConfig {
    /// Quiet period after the last event before reloading
    pub debounce: Duration,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("Failed to watch {path}: {source}")]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },

    #[error("Failed to initialize watcher: {0}")]
    WatcherInit(#[source] notify::Error),
}

/// Keeps a registry's artifacts warm while it is alive
pub struct HotReloadWatcher {
    registry: PluginRegistry,
    _watcher: RecommendedWatcher,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl HotReloadWatcher {
    /// Start watching the directories holding the registry's artifacts
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(registry: PluginRegistry, config: WatcherConfig) -> Result<Self, WatcherError> {
        let targets = ArtifactTargets::new(registry.artifacts());

        let (event_tx, event_rx) = mpsc::channel::<Event>(100);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                // Fails only once the event loop is gone
                event_tx.blocking_send(event).ok();
            }
            Err(err) => tracing::warn!(error = %err, "File watch error"),
        })
        .map_err(WatcherError::WatcherInit)?;

        for dir in targets.directories() {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .map_err(|source| WatcherError::Watch {
                    path: dir.clone(),
                    source,
                })?;
            tracing::info!(dir = %dir.display(), "Watching for artifact changes");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_events(
            registry.clone(),
            targets,
            event_rx,
            shutdown_rx,
            config.debounce,
        ));

        Ok(Self {
            registry,
            _watcher: watcher,
            shutdown,
            task,
        })
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Stop the event loop and wait for an in-flight reload to finish
    pub async fn shutdown(self) {
        self.shutdown.send(true).ok();
        if let Err(err) = self.task.await {
            tracing::error!(error = %err, "Watcher task aborted");
        }
    }
}

/// Registered artifacts keyed by canonical path
///
/// Event paths are absolute; registered paths may not be.
struct ArtifactTargets {
    by_canonical: HashMap<PathBuf, PathBuf>,
}

impl ArtifactTargets {
    fn new(artifacts: &[PathBuf]) -> Self {
        Self {
            by_canonical: artifacts
                .iter()
                .map(|path| (canonical(path), path.clone()))
                .collect(),
        }
    }

    fn directories(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = self
            .by_canonical
            .keys()
            .filter_map(|path| path.parent().map(Path::to_path_buf))
            .collect();
        dirs.sort();
        dirs.dedup();
        dirs
    }

    /// Add the registered artifacts an event touches; true if any matched
    fn collect(&self, event: &Event, pending: &mut Vec<PathBuf>) -> bool {
        let mut matched = false;
        for path in &event.paths {
            match self.by_canonical.get(&canonical(path)) {
                Some(registered) => {
                    if !pending.contains(registered) {
                        pending.push(registered.clone());
                    }
                    matched = true;
                }
                None => tracing::trace!(path = %path.display(), "Ignoring unregistered path"),
            }
        }
        matched
    }
}

async fn run_events(
    registry: PluginRegistry,
    targets: ArtifactTargets,
    mut events: mpsc::Receiver<Event>,
    mut shutdown: watch::Receiver<bool>,
    debounce: Duration,
) {
    let mut pending: Vec<PathBuf> = Vec::new();
    let mut deadline: Option<Instant> = None;

    loop {
        let flush_at = deadline;
        let flush = async move {
            match flush_at {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            event = events.recv() => match event {
                Some(event) => {
                    if targets.collect(&event, &mut pending) {
                        deadline = Some(Instant::now() + debounce);
                    }
                }
                None => break,
            },
            _ = flush => {
                deadline = None;
                reload(&registry, std::mem::take(&mut pending)).await;
            }
        }
    }

    tracing::debug!("Hot reload watcher stopped");
}

/// Check the slots of changed artifacts off the async runtime
async fn reload(registry: &PluginRegistry, paths: Vec<PathBuf>) {
    let registry = registry.clone();
    let result = tokio::task::spawn_blocking(move || {
        for path in paths {
            let reloaded = registry.check_artifact(&path);
            tracing::debug!(path = %path.display(), reloaded, "Artifact change processed");
        }
    })
    .await;

    if let Err(err) = result {
        tracing::error!(error = %err, "Reload task failed");
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
