//! Live conflict counts for open views.
//!
//! A view is anything that displays one file together with the number of
//! conflicts in its group (a tab header, a status line, a status file
//! entry). The [`LiveUpdateCoordinator`] keeps those counts in step with
//! file-tree mutations. Each event only recomputes the groups it can
//! affect, never the whole index.
//!
//! Events arrive over an owned channel; [`run`] drives the coordinator until
//! the channel closes or shutdown is signalled, then hands it back.

pub mod fs;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info};

use crate::conflict::index::group_for_file;
use crate::conflict::marker::latest_path;
use crate::tree::{FileTree, TreeFile};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A structural change in the file tree. Paths are vault-relative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TreeEvent {
    Created { path: String },
    Deleted { path: String },
    Renamed { path: String, old_path: String },
}

impl TreeEvent {
    pub fn created(path: impl Into<String>) -> Self {
        Self::Created { path: path.into() }
    }

    pub fn deleted(path: impl Into<String>) -> Self {
        Self::Deleted { path: path.into() }
    }

    pub fn renamed(old_path: impl Into<String>, path: impl Into<String>) -> Self {
        Self::Renamed {
            path: path.into(),
            old_path: old_path.into(),
        }
    }
}

/// Handle of an open view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ViewId(u64);

impl std::fmt::Display for ViewId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "view-{}", self.0)
    }
}

/// New conflict count for one view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusUpdate {
    pub view: ViewId,
    /// File the view is bound to.
    pub path: String,
    pub conflict_count: usize,
}

/// Receives status updates pushed by the coordinator.
#[async_trait]
pub trait StatusSink: Send {
    async fn publish(&mut self, update: &StatusUpdate);
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Tracks open views and the last count pushed to each.
pub struct LiveUpdateCoordinator<T: FileTree + ?Sized> {
    tree: Arc<T>,
    views: BTreeMap<ViewId, String>,
    counts: BTreeMap<ViewId, usize>,
    next_id: u64,
}

impl<T: FileTree + ?Sized> LiveUpdateCoordinator<T> {
    pub fn new(tree: Arc<T>) -> Self {
        Self {
            tree,
            views: BTreeMap::new(),
            counts: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Bind a new view to `path` and compute its initial count.
    pub fn open_view(&mut self, path: &str) -> StatusUpdate {
        let id = ViewId(self.next_id);
        self.next_id += 1;
        let path = TreeFile::new(path).path().to_string();
        debug!(view = %id, path = %path, "view opened");
        self.views.insert(id, path);
        self.refresh(id)
    }

    /// Forget a view. Returns `false` if it was not open.
    pub fn close_view(&mut self, id: ViewId) -> bool {
        self.counts.remove(&id);
        let removed = self.views.remove(&id).is_some();
        if removed {
            debug!(view = %id, "view closed");
        }
        removed
    }

    /// Path a view is currently bound to.
    pub fn bound_path(&self, id: ViewId) -> Option<&str> {
        self.views.get(&id).map(String::as_str)
    }

    /// Last count pushed to a view.
    pub fn count(&self, id: ViewId) -> Option<usize> {
        self.counts.get(&id).copied()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Recompute the views an event can affect and return their new counts.
    pub fn handle_event(&mut self, event: &TreeEvent) -> Vec<StatusUpdate> {
        let mut keys = BTreeSet::new();
        match event {
            TreeEvent::Created { path } | TreeEvent::Deleted { path } => {
                keys.insert(latest_path(&TreeFile::new(path)));
            }
            TreeEvent::Renamed { path, old_path } => {
                let new_path = TreeFile::new(path).path().to_string();
                let old_path = TreeFile::new(old_path).path().to_string();
                // Views follow the file they show, including files inside a
                // renamed directory.
                let old_prefix = format!("{}/", old_path);
                for bound in self.views.values_mut() {
                    let rebound = if *bound == old_path {
                        new_path.clone()
                    } else if let Some(rest) = bound.strip_prefix(&old_prefix) {
                        format!("{}/{}", new_path, rest)
                    } else {
                        continue;
                    };
                    debug!(from = %bound, to = %rebound, "rebinding view after rename");
                    keys.insert(latest_path(&TreeFile::new(&rebound)));
                    *bound = rebound;
                }
                keys.insert(latest_path(&TreeFile::new(&old_path)));
                keys.insert(latest_path(&TreeFile::new(&new_path)));
            }
        }

        let affected: Vec<ViewId> = self
            .views
            .iter()
            .filter(|(_, bound)| keys.contains(&latest_path(&TreeFile::new(bound.as_str()))))
            .map(|(id, _)| *id)
            .collect();

        debug!(?event, keys = ?keys, views = affected.len(), "handling tree event");
        affected.into_iter().map(|id| self.refresh(id)).collect()
    }

    fn refresh(&mut self, id: ViewId) -> StatusUpdate {
        let path = self.views.get(&id).cloned().unwrap_or_default();
        let conflict_count = group_for_file(self.tree.as_ref(), &TreeFile::new(&path)).len();
        self.counts.insert(id, conflict_count);
        StatusUpdate {
            view: id,
            path,
            conflict_count,
        }
    }
}

/// Feed events into the coordinator and publish every resulting update.
///
/// Stops when `shutdown` is notified or every sender has been dropped, and
/// returns the coordinator so the caller can inspect or reuse it.
pub async fn run<T, S>(
    mut coordinator: LiveUpdateCoordinator<T>,
    mut events: mpsc::UnboundedReceiver<TreeEvent>,
    sink: &mut S,
    shutdown: Arc<Notify>,
) -> LiveUpdateCoordinator<T>
where
    T: FileTree + ?Sized,
    S: StatusSink + ?Sized,
{
    info!(views = coordinator.view_count(), "live update loop started");

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("live update loop received shutdown signal");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    info!("event channel closed");
                    break;
                };
                for update in coordinator.handle_event(&event) {
                    sink.publish(&update).await;
                }
            }
        }
    }

    info!("live update loop stopped");
    coordinator
}
