//! Merge tool strategies.
//!
//! A closed set of backends selected by configuration. External tools are
//! spawned as child processes with tool-specific argument conventions; the
//! embedded variant is served by [`super::merge_view`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::{MergeConfig, MergeToolKind};
use crate::errors::MergeError;
use crate::spawn::{Invocation, ProcessSpawner};

/// Environment variable carrying the path of the original (latest) file.
pub const ENV_BASE: &str = "BASE";
/// Environment variable carrying the path of the conflict file.
pub const ENV_CONFLICT: &str = "CONFLICT";

const TOKEN_BASE: &str = "$BASE";
const TOKEN_CONFLICT: &str = "$CONFLICT";

/// A merge backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tool", rename_all = "snake_case")]
pub enum MergeTool {
    /// `meld <latest> <conflict>`
    Meld,
    /// `smerge mergetool <latest> <conflict> -o <latest>`
    SublimeMerge,
    /// `goland merge <conflict> <latest> <latest> --wait`
    GoLand,
    /// A user-supplied command template.
    Custom { command: String, waits: bool },
    /// The two-pane merge surface provided by the host.
    Embedded,
}

impl MergeTool {
    pub fn from_config(config: &MergeConfig) -> Self {
        match config.tool {
            MergeToolKind::Meld => Self::Meld,
            MergeToolKind::Smerge => Self::SublimeMerge,
            MergeToolKind::Goland => Self::GoLand,
            MergeToolKind::Custom => Self::Custom {
                command: config.custom_command.clone().unwrap_or_default(),
                waits: config.custom_waits,
            },
            MergeToolKind::Embedded => Self::Embedded,
        }
    }

    /// Name used in configuration files and on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Meld => "meld",
            Self::SublimeMerge => "smerge",
            Self::GoLand => "goland",
            Self::Custom { .. } => "custom",
            Self::Embedded => "embedded",
        }
    }

    /// Human-readable name.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Meld => "Meld",
            Self::SublimeMerge => "Sublime Merge",
            Self::GoLand => "GoLand",
            Self::Custom { .. } => "Custom tool",
            Self::Embedded => "Built-in merge view",
        }
    }

    /// Whether completing [`merge`](crate::conflict::ConflictResolver::resolve)
    /// means the user has finished editing.
    ///
    /// Only then may the caller offer to delete the conflict file right away.
    /// The embedded surface confirms through its own save action instead.
    pub fn waits(&self) -> bool {
        match self {
            Self::Meld | Self::SublimeMerge | Self::GoLand => true,
            Self::Custom { waits, .. } => *waits,
            Self::Embedded => false,
        }
    }

    pub fn is_external(&self) -> bool {
        !matches!(self, Self::Embedded)
    }

    /// Build the command line for merging `conflict` into `latest`.
    ///
    /// Both paths are also exported as `BASE` and `CONFLICT` for tools that
    /// prefer the environment over positional arguments.
    pub fn invocation(&self, latest: &Path, conflict: &Path) -> Result<Invocation, MergeError> {
        let latest = latest.to_string_lossy().into_owned();
        let conflict = conflict.to_string_lossy().into_owned();

        let (program, args) = match self {
            Self::Meld => ("meld".to_string(), vec![latest.clone(), conflict.clone()]),
            Self::SublimeMerge => (
                "smerge".to_string(),
                vec![
                    "mergetool".into(),
                    latest.clone(),
                    conflict.clone(),
                    "-o".into(),
                    latest.clone(),
                ],
            ),
            Self::GoLand => (
                "goland".to_string(),
                vec![
                    "merge".into(),
                    conflict.clone(),
                    latest.clone(),
                    latest.clone(),
                    "--wait".into(),
                ],
            ),
            Self::Custom { command, .. } => {
                let mut tokens = command
                    .split_whitespace()
                    .map(|token| substitute(token, &latest, &conflict));
                let program = tokens.next().ok_or(MergeError::ConfigurationMissing)?;
                (program, tokens.collect())
            }
            Self::Embedded => {
                return Err(MergeError::BackendUnsupported {
                    tool: self.name().to_string(),
                })
            }
        };

        let env = BTreeMap::from([
            (ENV_BASE.to_string(), latest),
            (ENV_CONFLICT.to_string(), conflict),
        ]);

        Ok(Invocation { program, args, env })
    }

    /// Run an external tool and wait for the process to exit.
    pub(crate) async fn run_external(
        &self,
        spawner: &dyn ProcessSpawner,
        latest: &Path,
        conflict: &Path,
    ) -> Result<(), MergeError> {
        let invocation = self.invocation(latest, conflict)?;
        debug!(tool = self.name(), ?invocation, "running external merge tool");

        let exit = spawner.execute(&invocation).await.map_err(|e| {
            warn!(program = %invocation.program, error = %e, "failed to spawn merge tool");
            MergeError::ToolSpawnFailed {
                program: invocation.program.clone(),
                message: e.to_string(),
            }
        })?;

        if !exit.success() {
            let exit_code = exit.code.unwrap_or(-1);
            warn!(program = %invocation.program, exit_code, "merge tool failed");
            return Err(MergeError::ToolExitFailed {
                program: invocation.program,
                exit_code,
                stderr: exit.stderr,
            });
        }

        info!(program = %invocation.program, "merge tool exited successfully");
        Ok(())
    }
}

impl std::fmt::Display for MergeTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Replace the `$BASE`/`$CONFLICT` tokens inside one template word. Any
/// other text, including unknown `$NAME` tokens such as `$BASEDIR`, passes
/// through unchanged.
///
/// Single left-to-right scan: substituted paths are never scanned again.
fn substitute(word: &str, latest: &str, conflict: &str) -> String {
    let mut out = String::with_capacity(word.len());
    let mut rest = word;
    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let candidate = &rest[idx..];
        let name_len = candidate[1..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(candidate.len() - 1);
        let token = &candidate[..1 + name_len];
        match token {
            TOKEN_BASE => out.push_str(latest),
            TOKEN_CONFLICT => out.push_str(conflict),
            other => out.push_str(other),
        }
        rest = &candidate[token.len()..];
    }
    out.push_str(rest);
    out
}
