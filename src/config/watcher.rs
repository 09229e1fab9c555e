//! Application directory watcher for hot reload.

use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::app::manifest::MANIFEST_NAMES;

/// Watches application directories and reports which application root
/// needs a refresh (manifest edited, application added or removed).
pub struct AppWatcher {
    directories: Vec<PathBuf>,
    update_tx: mpsc::UnboundedSender<PathBuf>,
}

impl AppWatcher {
    /// Returns the watcher and a receiver of application roots to refresh.
    pub fn new(directories: &[PathBuf]) -> (Self, mpsc::UnboundedReceiver<PathBuf>) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();

        (
            Self {
                directories: directories.to_vec(),
                update_tx,
            },
            update_rx,
        )
    }

    /// Start watching in a background thread. Dropping the returned watcher stops it.
    pub fn run(self) -> Result<RecommendedWatcher, notify::Error> {
        let tx = self.update_tx.clone();
        let directories = self.directories.clone();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if !(event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove()) {
                        return;
                    }
                    for path in &event.paths {
                        if let Some(root) = app_root_for(&directories, path) {
                            tracing::debug!(root = %root.display(), "application change detected");
                            let _ = tx.send(root);
                        }
                    }
                }
                Err(e) => tracing::error!(error = ?e, "watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;

        for directory in &self.directories {
            watcher.watch(directory, RecursiveMode::Recursive)?;
        }

        tracing::info!(directories = ?self.directories, "application watcher started");
        Ok(watcher)
    }
}

/// Application root affected by a change at `changed`, if the change matters:
/// an application directory itself, or a manifest directly inside one.
pub fn app_root_for(directories: &[PathBuf], changed: &Path) -> Option<PathBuf> {
    directories.iter().find_map(|directory| {
        let relative = changed.strip_prefix(directory).ok()?;
        let parts: Vec<_> = relative
            .components()
            .filter_map(|component| match component {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        match parts.as_slice() {
            [app] => Some(directory.join(app)),
            [app, file] if MANIFEST_NAMES.iter().any(|name| *file == *name) => Some(directory.join(app)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_root_for() {
        let dirs = [PathBuf::from("/srv/apps")];
        assert_eq!(
            app_root_for(&dirs, Path::new("/srv/apps/blog/app.conf")),
            Some(PathBuf::from("/srv/apps/blog"))
        );
        assert_eq!(
            app_root_for(&dirs, Path::new("/srv/apps/blog")),
            Some(PathBuf::from("/srv/apps/blog"))
        );
        assert_eq!(app_root_for(&dirs, Path::new("/srv/apps/blog/index.html")), None);
        assert_eq!(app_root_for(&dirs, Path::new("/srv/apps/blog/sub/app.conf")), None);
        assert_eq!(app_root_for(&dirs, Path::new("/elsewhere/app.conf")), None);
    }
}
