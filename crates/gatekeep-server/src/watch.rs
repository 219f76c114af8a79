//! File watchers for hot reload.
//!
//! Each watched file's parent directory is watched non-recursively, so editors that
//! replace a file by rename are still seen. Events are debounced and coalesced into a
//! single pending notification.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecommendedWatcher, Watcher};
use notify_debouncer_mini::{DebounceEventResult, Debouncer, new_debouncer};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::context::Gateway;
use crate::error::{ProxyError, Result};

/// Watches a set of files and signals when any of them changes.
pub struct FileWatcher {
    _debouncer: Debouncer<RecommendedWatcher>,
}

impl FileWatcher {
    /// Start watching `paths`. The receiver yields once per debounced batch.
    pub fn new(paths: &[PathBuf], debounce: Duration) -> Result<(Self, mpsc::Receiver<()>)> {
        let targets: HashSet<PathBuf> = paths
            .iter()
            .map(std::path::absolute)
            .collect::<std::io::Result<_>>()?;
        let dirs: HashSet<PathBuf> = targets
            .iter()
            .filter_map(|p| p.parent().map(Path::to_path_buf))
            .collect();

        let (tx, rx) = mpsc::channel(1);
        let watched = targets.clone();
        let mut debouncer = new_debouncer(debounce, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    if events.iter().any(|e| watched.contains(&e.path)) {
                        // A full channel already has a reload pending.
                        let _ = tx.try_send(());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "file watch error"),
            }
        })
        .map_err(|e| ProxyError::watch(format!("watcher init: {}", e)))?;

        for dir in &dirs {
            debouncer
                .watcher()
                .watch(dir, notify::RecursiveMode::NonRecursive)
                .map_err(|e| ProxyError::watch(format!("failed to watch {}: {}", dir.display(), e)))?;
        }

        tracing::debug!(files = ?targets, "watching files");
        Ok((
            Self {
                _debouncer: debouncer,
            },
            rx,
        ))
    }
}

/// Keeps a watcher and its reload task alive. Dropping it stops both.
pub struct WatchHandle {
    _watcher: FileWatcher,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn new(watcher: FileWatcher, task: JoinHandle<()>) -> Self {
        Self {
            _watcher: watcher,
            task,
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Reload the gateway whenever the config file changes.
///
/// An invalid file is logged and the running configuration stays in effect.
pub fn watch_config(gateway: Arc<Gateway>, path: PathBuf) -> Result<WatchHandle> {
    let (watcher, mut changes) =
        FileWatcher::new(std::slice::from_ref(&path), gateway.options().watch_debounce)?;

    let task = tokio::spawn(async move {
        while changes.recv().await.is_some() {
            tracing::info!(path = %path.display(), "config changed, reloading");
            if let Err(e) = gateway.reload_from(&path).await {
                let fields = e.field_errors();
                if fields.is_empty() {
                    tracing::error!(error = %e, "config reload failed, keeping previous configuration");
                } else {
                    for field in fields {
                        tracing::error!(error = %field, "invalid config field");
                    }
                    tracing::error!("config reload rejected, keeping previous configuration");
                }
            }
        }
    });

    Ok(WatchHandle::new(watcher, task))
}
