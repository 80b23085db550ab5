//! Desired-state file watcher for hot reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::settings::loader::{load_desired_state, DesiredState};

/// A watcher that reloads the desired-state file whenever it changes.
pub struct DesiredStateWatcher {
    path: PathBuf,
    update_tx: mpsc::UnboundedSender<DesiredState>,
}

impl DesiredStateWatcher {
    /// Create a new DesiredStateWatcher.
    ///
    /// Returns the watcher and a receiver for freshly loaded states.
    pub fn new(path: &Path) -> (Self, mpsc::UnboundedReceiver<DesiredState>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                path: path.to_path_buf(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching the file in a background thread.
    ///
    /// The returned handle must be kept alive for as long as updates are wanted.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let path = self.path.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if event.kind.is_modify() || event.kind.is_create() {
                        tracing::info!(path = ?path, "Desired state change detected, reloading");
                        match load_desired_state(&path) {
                            Ok(state) => {
                                let _ = tx.send(state);
                            }
                            Err(e) => {
                                tracing::error!(error = %e, "Failed to reload desired state, keeping current state");
                            }
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "Watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;

        tracing::info!(path = ?self.path, "Desired state watcher started");
        Ok(watcher)
    }
}
