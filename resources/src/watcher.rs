use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::manager::ResourceManager;

/// Watches an asset directory and reloads resources whose files changed.
pub struct ResourceWatcher {
    /// Dropping it stops change notifications for the asset root.
    _watcher: RecommendedWatcher,
    /// File changes not yet turned into reloads by `reload_changed`.
    event_rx: mpsc::Receiver<notify::Event>,
    root: PathBuf,
}

impl ResourceWatcher {
    /// Watches `root` recursively. Returns `None` if it is not a directory
    /// or cannot be watched.
    pub fn new(root: impl AsRef<Path>) -> Option<Self> {
        let root = root.as_ref().canonicalize().ok()?;
        if !root.is_dir() {
            return None;
        }

        let (tx, rx) = mpsc::channel::<notify::Event>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        })
        .ok()?;

        if let Err(e) = watcher.watch(&root, RecursiveMode::Recursive) {
            log::warn!("Failed to watch {:?}: {e}", root);
            return None;
        }
        log::info!("Watching resources in {:?}", root);

        Some(Self {
            _watcher: watcher,
            event_rx: rx,
            root,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Drains change events and returns the resource ids (paths relative to
    /// the root, with `/` separators) of changed files.
    pub fn poll_changes(&self) -> Vec<String> {
        let mut changed = HashSet::new();

        while let Ok(event) = self.event_rx.try_recv() {
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                continue;
            }
            for path in &event.paths {
                if let Some(id) = self.to_resource_id(path) {
                    changed.insert(id);
                }
            }
        }

        changed.into_iter().collect()
    }

    /// Reloads the resources of every changed file whose source is outdated.
    /// Returns how many resources were reloaded.
    pub fn reload_changed(&self, manager: &ResourceManager) -> usize {
        self.poll_changes()
            .iter()
            .map(|id| manager.reload_resources_with_id(id, false))
            .sum()
    }

    fn to_resource_id(&self, path: &Path) -> Option<String> {
        let relative = path.strip_prefix(&self.root).ok()?;
        let id = relative.to_string_lossy().replace('\\', "/");
        (!id.is_empty()).then_some(id)
    }
}
