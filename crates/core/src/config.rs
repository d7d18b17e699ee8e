//! TOML-based configuration for synconflict.
//!
//! Every section is optional. The merge option names used by the original
//! note-taking plugin (`mergeTool`, `customMergeTool`,
//! `customMergeToolWaits`) are accepted as aliases so existing settings can
//! be pasted in unchanged.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Which directory tree to scan.
    #[serde(default)]
    pub vault: VaultConfig,

    /// Merge tool selection.
    #[serde(default)]
    pub merge: MergeConfig,

    /// Watcher daemon settings.
    #[serde(default)]
    pub daemon: DaemonConfig,
}

// ---------------------------------------------------------------------------
// Vault
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Root directory of the synced vault (default: current directory).
    #[serde(default = "default_root")]
    pub root: PathBuf,
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Which merge backend to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeToolKind {
    #[default]
    Meld,
    Smerge,
    Goland,
    Custom,
    Embedded,
}

impl MergeToolKind {
    pub const ALL: [MergeToolKind; 5] = [
        Self::Meld,
        Self::Smerge,
        Self::Goland,
        Self::Custom,
        Self::Embedded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meld => "meld",
            Self::Smerge => "smerge",
            Self::Goland => "goland",
            Self::Custom => "custom",
            Self::Embedded => "embedded",
        }
    }
}

impl fmt::Display for MergeToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MergeToolKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "merge.tool".into(),
                detail: format!(
                    "unknown merge tool '{}' (expected one of: meld, smerge, goland, custom, embedded)",
                    s
                ),
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    #[serde(default, alias = "mergeTool")]
    pub tool: MergeToolKind,

    /// Command template for the custom tool. `$BASE` and `$CONFLICT` are
    /// replaced with the original and conflict paths.
    #[serde(default, alias = "customMergeTool", skip_serializing_if = "Option::is_none")]
    pub custom_command: Option<String>,

    /// Whether the custom command blocks until the user finished merging.
    #[serde(default, alias = "customMergeToolWaits")]
    pub custom_waits: bool,
}

// ---------------------------------------------------------------------------
// Daemon
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where to write the JSON conflict-count status, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,

    /// Vault-relative files to track from startup.
    #[serde(default)]
    pub track: Vec<String>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            status_file: None,
            track: Vec::new(),
        }
    }
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load configuration from a TOML file at `path`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Like [`load_from_file`](Self::load_from_file), but a missing file
    /// yields the defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no configuration file, using defaults");
            return Ok(Self::default());
        }
        Self::load_from_file(path)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validate that the configuration is semantically correct.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.merge.tool == MergeToolKind::Custom
            && self
                .merge
                .custom_command
                .as_deref()
                .map_or(true, |c| c.trim().is_empty())
        {
            return Err(ConfigError::InvalidValue {
                field: "merge.custom_command".into(),
                detail: "a command is required when merge.tool = \"custom\"".into(),
            });
        }
        if !LOG_LEVELS.contains(&self.daemon.log_level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "daemon.log_level".into(),
                detail: format!(
                    "'{}' is not one of {}",
                    self.daemon.log_level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }
        if self.vault.root.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "vault.root".into(),
                detail: "vault root must not be empty".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }
}
