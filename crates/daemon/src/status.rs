//! Status reporting for tracked files.
//!
//! Every update is logged; when a status file is configured the full set of
//! counts is rewritten there as JSON after each change, so editors and
//! status bars can poll a single file.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use synconflict_core::watch::{StatusSink, StatusUpdate, ViewId};

/// Contents of the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub updated_at: DateTime<Utc>,
    pub vault: String,
    /// Total conflicts across tracked files.
    pub total_conflicts: usize,
    pub files: Vec<FileStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileStatus {
    pub path: String,
    pub conflict_count: usize,
}

/// [`StatusSink`] that logs changes and mirrors them to a JSON file.
pub struct StatusReporter {
    vault: String,
    status_file: Option<PathBuf>,
    /// Latest count per view, in the order views were opened.
    files: BTreeMap<ViewId, FileStatus>,
}

impl StatusReporter {
    pub fn new(vault: impl Into<String>, status_file: Option<PathBuf>) -> Self {
        Self {
            vault: vault.into(),
            status_file,
            files: BTreeMap::new(),
        }
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        let files: Vec<FileStatus> = self.files.values().cloned().collect();
        StatusSnapshot {
            updated_at: Utc::now(),
            vault: self.vault.clone(),
            total_conflicts: files.iter().map(|f| f.conflict_count).sum(),
            files,
        }
    }

    /// Record an update. Returns `true` if anything visible changed.
    fn record(&mut self, update: &StatusUpdate) -> bool {
        let status = FileStatus {
            path: update.path.clone(),
            conflict_count: update.conflict_count,
        };
        let previous = self.files.insert(update.view, status.clone());
        match previous {
            Some(prev) if prev == status => false,
            Some(prev) => {
                info!(
                    path = %status.path,
                    previous = prev.conflict_count,
                    conflicts = status.conflict_count,
                    "conflict count changed"
                );
                true
            }
            None => {
                info!(path = %status.path, conflicts = status.conflict_count, "tracking file");
                true
            }
        }
    }

    /// Write the snapshot via a temporary file so readers never see a
    /// partially written document.
    pub async fn write_status_file(&self) {
        let Some(path) = &self.status_file else {
            return;
        };
        let json = match serde_json::to_string_pretty(&self.snapshot()) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to serialize status");
                return;
            }
        };

        let tmp = path.with_extension("json.tmp");
        let result = async {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&tmp, json).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;

        match result {
            Ok(()) => debug!(path = %path.display(), "status file written"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write status file"),
        }
    }
}

#[async_trait]
impl StatusSink for StatusReporter {
    async fn publish(&mut self, update: &StatusUpdate) {
        if self.record(update) {
            self.write_status_file().await;
        }
    }
}
