//! Process-spawn capability used by the external merge tools.

use std::collections::BTreeMap;
use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// How a spawned process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessExit {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stderr: String,
}

impl ProcessExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs an [`Invocation`] to completion without blocking the runtime.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    /// An `Err` means the process could not be started at all.
    async fn execute(&self, invocation: &Invocation) -> io::Result<ProcessExit>;
}

/// Spawns real processes with `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct TokioSpawner;

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn execute(&self, invocation: &Invocation) -> io::Result<ProcessExit> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        info!(program = %invocation.program, args = ?invocation.args, "spawning merge tool");
        let output = cmd.output().await?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            debug!(program = %invocation.program, %stdout, "merge tool stdout");
        }
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !stderr.trim().is_empty() {
            warn!(program = %invocation.program, %stderr, "merge tool stderr");
        }

        Ok(ProcessExit {
            code: output.status.code(),
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Invocation {
        Invocation {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            env: BTreeMap::from([("CONFLICT".to_string(), "c.md".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_exit_code_and_stderr_captured() {
        let exit = TokioSpawner
            .execute(&sh("echo \"bad $CONFLICT\" >&2; exit 3"))
            .await
            .unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success());
        assert_eq!(exit.stderr.trim(), "bad c.md");
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let invocation = Invocation {
            program: "definitely-not-a-merge-tool-7f3a".into(),
            args: Vec::new(),
            env: BTreeMap::new(),
        };
        let err = TokioSpawner.execute(&invocation).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
