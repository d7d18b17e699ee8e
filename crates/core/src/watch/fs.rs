//! Filesystem notifications for a vault on local disk.
//!
//! Wraps a `notify` watcher and translates its raw events into
//! vault-relative [`TreeEvent`]s. Content-only modifications are dropped:
//! they cannot change which conflicts a file has.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::TreeEvent;
use crate::errors::WatchError;
use crate::tree::FsTree;

/// Recursive watch over a vault root.
pub struct VaultWatcher {
    watcher: RecommendedWatcher,
    root: PathBuf,
    watching: bool,
}

impl VaultWatcher {
    /// Start watching `root`. Events arrive on the returned receiver until
    /// the watcher is closed or dropped.
    pub fn start(
        root: impl AsRef<Path>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<TreeEvent>), WatchError> {
        let root = root.as_ref().canonicalize()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let tree = FsTree::new(root.clone());

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for tree_event in convert_notify_event(&tree, event) {
                        // The receiver is gone once the coordinator stopped.
                        let _ = tx.send(tree_event);
                    }
                }
                Err(e) => {
                    error!(error = %e, "file watcher error");
                }
            },
            Config::default(),
        )?;

        watcher.watch(&root, RecursiveMode::Recursive)?;
        info!(root = %root.display(), "watching vault");

        Ok((
            Self {
                watcher,
                root,
                watching: true,
            },
            rx,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stop watching. The event channel closes once the watcher is dropped.
    pub fn close(mut self) -> Result<(), WatchError> {
        self.unwatch()
    }

    fn unwatch(&mut self) -> Result<(), WatchError> {
        if !self.watching {
            return Ok(());
        }
        self.watching = false;
        self.watcher.unwatch(&self.root)?;
        info!(root = %self.root.display(), "stopped watching vault");
        Ok(())
    }
}

impl Drop for VaultWatcher {
    fn drop(&mut self) {
        if let Err(e) = self.unwatch() {
            warn!(error = %e, "failed to stop vault watcher");
        }
    }
}

/// Translate one raw notification. Paths outside the vault or inside hidden
/// directories produce nothing.
fn convert_notify_event(tree: &FsTree, event: Event) -> Vec<TreeEvent> {
    let relative = |path: &PathBuf| tree.relative(path).filter(|p| !p.is_empty());

    let events = match event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(TreeEvent::created)
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(relative)
            .map(TreeEvent::deleted)
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                match (relative(&event.paths[0]), relative(&event.paths[1])) {
                    (Some(from), Some(to)) => vec![TreeEvent::renamed(from, to)],
                    // Moved in from a hidden or outside location.
                    (None, Some(to)) => vec![TreeEvent::created(to)],
                    (Some(from), None) => vec![TreeEvent::deleted(from)],
                    (None, None) => Vec::new(),
                }
            }
            RenameMode::From => event
                .paths
                .iter()
                .filter_map(relative)
                .map(TreeEvent::deleted)
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .filter_map(relative)
                .map(TreeEvent::created)
                .collect(),
            // Only one side reported: existence tells which one.
            _ => event
                .paths
                .iter()
                .filter_map(|path| {
                    let rel = relative(path)?;
                    Some(if path.exists() {
                        TreeEvent::created(rel)
                    } else {
                        TreeEvent::deleted(rel)
                    })
                })
                .collect(),
        },
        _ => Vec::new(),
    };

    if !events.is_empty() {
        debug!(?events, "converted watcher event");
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::time::Duration;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_convert_structural_events() {
        let tree = FsTree::new("/vault");

        assert_eq!(
            convert_notify_event(&tree, event(EventKind::Create(CreateKind::File), &["/vault/a.md"])),
            vec![TreeEvent::created("a.md")]
        );
        assert_eq!(
            convert_notify_event(&tree, event(EventKind::Remove(RemoveKind::File), &["/vault/d/b.md"])),
            vec![TreeEvent::deleted("d/b.md")]
        );
        assert_eq!(
            convert_notify_event(
                &tree,
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                    &["/vault/a.md", "/vault/b.md"]
                )
            ),
            vec![TreeEvent::renamed("a.md", "b.md")]
        );
    }

    #[test]
    fn test_ignores_content_and_hidden_changes() {
        let tree = FsTree::new("/vault");
        assert!(convert_notify_event(
            &tree,
            event(EventKind::Modify(ModifyKind::Data(DataChange::Content)), &["/vault/a.md"])
        )
        .is_empty());
        assert!(convert_notify_event(
            &tree,
            event(EventKind::Create(CreateKind::File), &["/vault/.stversions/a.md"])
        )
        .is_empty());
        assert!(convert_notify_event(
            &tree,
            event(EventKind::Create(CreateKind::File), &["/elsewhere/a.md"])
        )
        .is_empty());
    }

    #[test]
    fn test_rename_from_hidden_is_create() {
        let tree = FsTree::new("/vault");
        assert_eq!(
            convert_notify_event(
                &tree,
                event(
                    EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
                    &["/vault/.syncthing.a.md.tmp", "/vault/a.md"]
                )
            ),
            vec![TreeEvent::created("a.md")]
        );
    }

    #[tokio::test]
    async fn test_watcher_reports_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let (watcher, mut rx) = VaultWatcher::start(dir.path()).unwrap();

        std::fs::write(watcher.root().join("notes.md"), "x").unwrap();

        let received = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = rx.recv().await {
                if event == TreeEvent::created("notes.md") {
                    return true;
                }
            }
            false
        })
        .await;
        assert!(matches!(received, Ok(true)));

        watcher.close().unwrap();
    }
}
