//! Project source watcher.
//!
//! Forwards changed project-relative paths to the dev server, which drops
//! cached builds for the affected entrypoints. Nothing is rebuilt here; the
//! next request for an invalidated asset rebuilds it lazily.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// Directories whose contents never trigger invalidation.
const IGNORED_DIRS: &[&str] = &[".git", "node_modules", ".now"];

/// A watcher that monitors the project directory for source changes.
pub struct ProjectWatcher {
    root: PathBuf,
    poll_interval: Duration,
    change_tx: mpsc::UnboundedSender<String>,
}

impl ProjectWatcher {
    /// Create a new ProjectWatcher.
    ///
    /// Returns the watcher and a receiver of changed paths, relative to the
    /// project root and `/`-separated.
    pub fn new(root: &Path, poll_interval: Duration) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (change_tx, change_rx) = mpsc::unbounded_channel();

        (
            Self {
                root: root.to_path_buf(),
                poll_interval,
                change_tx,
            },
            change_rx,
        )
    }

    /// Start watching in the background. The returned handle must be kept
    /// alive for as long as events are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.change_tx.clone();
        let root = self.root.canonicalize().unwrap_or_else(|_| self.root.clone());
        let event_root = root.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    for path in &event.paths {
                        if let Some(relative) = relative_source_path(&event_root, path) {
                            tracing::debug!(path = %relative, "Source change detected");
                            let _ = tx.send(relative);
                        }
                    }
                }
                Err(e) => tracing::error!("Watch error: {:?}", e),
            },
            Config::default().with_poll_interval(self.poll_interval),
        )?;

        watcher.watch(&root, RecursiveMode::Recursive)?;

        tracing::info!(path = ?root, "Project watcher started");
        Ok(watcher)
    }
}

/// Project-relative, `/`-separated path, or `None` for ignored locations.
pub fn relative_source_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component.as_os_str().to_str()?;
        if IGNORED_DIRS.contains(&part) {
            return None;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}
