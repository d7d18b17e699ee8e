//! Error types for the synconflict core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Parsing and indexing never fail: a filename that does not follow the
//! conflict convention is a normal negative result, not an error. Only the
//! merge path, configuration loading and the filesystem watcher can fail.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watch(#[from] WatchError),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the merge orchestrator and its strategies.
///
/// None of these are retried. Every variant renders as a single
/// human-readable notice.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The storage backend cannot hand out absolute filesystem paths, so an
    /// external process has nothing to open.
    #[error("merge tool '{tool}' needs files on a local filesystem, but this vault is not backed by one")]
    BackendUnsupported { tool: String },

    /// The external program could not be started.
    #[error("failed to start merge tool '{program}': {message}")]
    ToolSpawnFailed { program: String, message: String },

    /// The external program ran but exited unsuccessfully.
    #[error("merge tool '{program}' failed (exit {exit_code}){}", format_stderr(.stderr))]
    ToolExitFailed {
        program: String,
        exit_code: i32,
        stderr: String,
    },

    /// The custom tool was selected without a command template.
    #[error("custom merge tool selected but no command is configured (set merge.custom_command)")]
    ConfigurationMissing,

    /// Deleting the conflict file failed.
    #[error("{}failed to delete conflict file '{path}': {message}", merge_prefix(.after_merge))]
    DeletionFailed {
        path: String,
        message: String,
        after_merge: bool,
    },

    /// A file involved in the merge disappeared before dispatch.
    #[error("file '{path}' no longer exists")]
    FileMissing { path: String },

    /// The embedded merge surface is not available in this host.
    #[error("embedded merge is not available here")]
    SurfaceUnavailable,

    /// The embedded merge surface failed while interacting with the user.
    #[error("merge view failed: {0}")]
    Surface(String),

    /// Reading or writing one of the files failed.
    #[error("merge I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

fn merge_prefix(after_merge: &bool) -> &'static str {
    if *after_merge {
        "merge succeeded but "
    } else {
        ""
    }
}

fn format_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}

impl MergeError {
    /// Whether the merge itself succeeded and only the cleanup failed.
    pub fn merge_succeeded(&self) -> bool {
        matches!(
            self,
            Self::DeletionFailed {
                after_merge: true,
                ..
            }
        )
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Watch errors
// ---------------------------------------------------------------------------

/// Errors from the filesystem watcher feeding the live-update coordinator.
#[derive(Debug, Error)]
pub enum WatchError {
    /// The platform watcher could not be created or attached.
    #[error("file watcher error: {0}")]
    Watcher(String),

    /// Generic I/O error (e.g. the vault root cannot be canonicalized).
    #[error("watch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        Self::Watcher(err.to_string())
    }
}
