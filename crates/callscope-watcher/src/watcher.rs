//! Filesystem watcher that keeps [`FileVersions`] current

use crate::versions::FileVersions;
use anyhow::Result;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Events emitted by the watcher after the version table was updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// File or directory created
    Created(PathBuf),
    /// File or directory modified
    Modified(PathBuf),
    /// File or directory removed
    Removed(PathBuf),
}

impl WatchEvent {
    pub fn path(&self) -> &Path {
        match self {
            WatchEvent::Created(path) | WatchEvent::Modified(path) | WatchEvent::Removed(path) => path,
        }
    }
}

/// Bumps the version of every changed file under a project root.
pub struct VersionWatcher {
    watcher: RecommendedWatcher,
    event_rx: mpsc::UnboundedReceiver<WatchEvent>,
    root_path: PathBuf,
    versions: Arc<FileVersions>,
}

impl VersionWatcher {
    /// Create a watcher for `root_path` feeding `versions`. Call [`start`](Self::start) to begin.
    pub fn new(root_path: impl AsRef<Path>, versions: Arc<FileVersions>) -> Result<Self> {
        let root_path = root_path.as_ref().to_path_buf();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let callback_versions = Arc::clone(&versions);
        let watcher = notify::recommended_watcher(move |res: Result<notify::Event, notify::Error>| {
            match res {
                Ok(event) => {
                    debug!("File system event: {:?}", event);
                    Self::handle_notify_event(event, &callback_versions, &event_tx);
                }
                Err(e) => {
                    error!("File system watch error: {}", e);
                }
            }
        })?;

        Ok(Self {
            watcher,
            event_rx,
            root_path,
            versions,
        })
    }

    /// Bump versions first so consumers never see an event ahead of its version.
    fn handle_notify_event(
        event: notify::Event,
        versions: &FileVersions,
        event_tx: &mpsc::UnboundedSender<WatchEvent>,
    ) {
        let make: fn(PathBuf) -> WatchEvent = match event.kind {
            notify::EventKind::Create(_) => WatchEvent::Created,
            notify::EventKind::Modify(_) => WatchEvent::Modified,
            notify::EventKind::Remove(_) => WatchEvent::Removed,
            _ => return,
        };
        for path in event.paths {
            if should_ignore_path(&path) {
                continue;
            }
            versions.bump(&path);
            if let Err(e) = event_tx.send(make(path)) {
                warn!("Failed to send watch event: {}", e);
            }
        }
    }

    /// Watch the project root recursively.
    pub fn start(&mut self) -> Result<()> {
        info!("Watching directory: {:?}", self.root_path);
        self.watcher.watch(&self.root_path, RecursiveMode::Recursive)?;
        Ok(())
    }

    /// Stop watching the project root.
    pub fn stop(&mut self) -> Result<()> {
        info!("Stopping watch for: {:?}", self.root_path);
        self.watcher.unwatch(&self.root_path)?;
        Ok(())
    }

    /// Wait for the next change. `None` once the watcher is gone.
    pub async fn next_event(&mut self) -> Option<WatchEvent> {
        self.event_rx.recv().await
    }

    /// Take every change that is already queued, without waiting.
    pub fn drain_pending(&mut self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.event_rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub fn root_path(&self) -> &Path {
        &self.root_path
    }

    pub fn versions(&self) -> &Arc<FileVersions> {
        &self.versions
    }
}

/// Check if a path should be ignored (e.g., target/, .git/, etc.)
fn should_ignore_path(path: &Path) -> bool {
    path.components().any(|component| {
        matches!(
            component.as_os_str().to_str(),
            Some("target") | Some(".git") | Some("node_modules")
        )
    })
}
