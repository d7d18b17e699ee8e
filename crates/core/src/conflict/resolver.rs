//! Merge orchestration.
//!
//! The [`ConflictResolver`] takes one original/conflict pair through a
//! merge with the selected [`MergeTool`]:
//!
//! ```text
//! Idle -> Dispatching -> Running -> Succeeded
//!              |            |
//!              +------------+-----> Failed
//! ```
//!
//! Every precondition is checked while dispatching, before any process is
//! spawned. Deleting the conflict file is never automatic: callers offer it
//! to the user and invoke [`ConflictResolver::cleanup`] on confirmation.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::merge_view::{MergeDecision, MergeSession, MergeSurface};
use super::strategy::MergeTool;
use crate::config::MergeConfig;
use crate::errors::MergeError;
use crate::spawn::{ProcessSpawner, TokioSpawner};
use crate::tree::{EntryKind, FileTree, TreeFile};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Lifecycle of a single merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveState {
    Idle,
    Dispatching,
    Running,
    Succeeded,
    Failed,
}

impl fmt::Display for ResolveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// How a successful merge ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MergeOutcome {
    /// An external tool exited successfully. `offer_cleanup` is set when the
    /// tool waited for the user, so the conflict may be deleted now.
    Merged { offer_cleanup: bool },
    /// The embedded view saved the merged text into the original.
    /// `cleanup_error` is set when the requested deletion of the conflict
    /// failed; the merge itself still succeeded.
    Saved {
        conflict_deleted: bool,
        cleanup_error: Option<String>,
    },
    /// The embedded view was discarded; nothing was written.
    Discarded,
}

/// One in-flight merge. Owns nothing but its state; logs each transition.
struct Resolution<'a> {
    original: &'a TreeFile,
    conflict: &'a TreeFile,
    tool: &'a MergeTool,
    state: ResolveState,
}

impl<'a> Resolution<'a> {
    fn new(original: &'a TreeFile, conflict: &'a TreeFile, tool: &'a MergeTool) -> Self {
        Self {
            original,
            conflict,
            tool,
            state: ResolveState::Idle,
        }
    }

    fn advance(&mut self, next: ResolveState) {
        debug!(
            original = %self.original,
            conflict = %self.conflict,
            tool = self.tool.name(),
            from = %self.state,
            to = %next,
            "merge state transition"
        );
        self.state = next;
    }

    fn fail(&mut self, err: MergeError) -> MergeError {
        self.advance(ResolveState::Failed);
        warn!(
            original = %self.original,
            conflict = %self.conflict,
            tool = self.tool.name(),
            error = %err,
            "merge failed"
        );
        err
    }
}

/// What dispatching decided to run.
enum Dispatch {
    External { latest: PathBuf, conflict: PathBuf },
    Embedded(Arc<dyn MergeSurface>),
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Runs merges against a file tree.
///
/// Cheap to clone and free of shared mutable state, so independent merges
/// may run concurrently.
pub struct ConflictResolver<T: FileTree + ?Sized> {
    tree: Arc<T>,
    spawner: Arc<dyn ProcessSpawner>,
    surface: Option<Arc<dyn MergeSurface>>,
    default_tool: MergeTool,
}

impl<T: FileTree + ?Sized> Clone for ConflictResolver<T> {
    fn clone(&self) -> Self {
        Self {
            tree: Arc::clone(&self.tree),
            spawner: Arc::clone(&self.spawner),
            surface: self.surface.clone(),
            default_tool: self.default_tool.clone(),
        }
    }
}

impl<T: FileTree + ?Sized> ConflictResolver<T> {
    /// A resolver that spawns real processes and has no embedded surface.
    pub fn new(tree: Arc<T>) -> Self {
        Self {
            tree,
            spawner: Arc::new(TokioSpawner),
            surface: None,
            default_tool: MergeTool::Meld,
        }
    }

    /// A resolver whose default tool comes from the `[merge]` section.
    pub fn from_config(tree: Arc<T>, config: &MergeConfig) -> Self {
        let mut resolver = Self::new(tree);
        resolver.default_tool = MergeTool::from_config(config);
        debug!(tool = resolver.default_tool.name(), "configured merge resolver");
        resolver
    }

    pub fn with_spawner(mut self, spawner: Arc<dyn ProcessSpawner>) -> Self {
        self.spawner = spawner;
        self
    }

    pub fn with_surface(mut self, surface: Arc<dyn MergeSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn tree(&self) -> &Arc<T> {
        &self.tree
    }

    pub fn default_tool(&self) -> &MergeTool {
        &self.default_tool
    }

    /// Merge `conflict` into `original` with `tool`.
    ///
    /// On failure neither file has been modified by the resolver.
    pub async fn resolve(
        &self,
        original: &TreeFile,
        conflict: &TreeFile,
        tool: &MergeTool,
    ) -> Result<MergeOutcome, MergeError> {
        let mut resolution = Resolution::new(original, conflict, tool);
        info!(
            original = %original,
            conflict = %conflict,
            tool = tool.name(),
            "starting merge"
        );

        resolution.advance(ResolveState::Dispatching);
        let dispatch = match self.dispatch(original, conflict, tool) {
            Ok(dispatch) => dispatch,
            Err(e) => return Err(resolution.fail(e)),
        };

        resolution.advance(ResolveState::Running);
        let result = match dispatch {
            Dispatch::External { latest, conflict } => tool
                .run_external(self.spawner.as_ref(), &latest, &conflict)
                .await
                .map(|()| MergeOutcome::Merged {
                    offer_cleanup: tool.waits(),
                }),
            Dispatch::Embedded(surface) => {
                self.run_embedded(surface.as_ref(), original, conflict).await
            }
        };

        match result {
            Ok(outcome) => {
                resolution.advance(ResolveState::Succeeded);
                info!(original = %original, ?outcome, "merge finished");
                Ok(outcome)
            }
            Err(e) => Err(resolution.fail(e)),
        }
    }

    /// Delete the conflict after a successful merge, once the user agreed.
    pub async fn cleanup(&self, conflict: &TreeFile) -> Result<(), MergeError> {
        self.remove_conflict(conflict, true).await
    }

    /// Delete a conflict file without merging it.
    pub async fn delete_conflict(&self, conflict: &TreeFile) -> Result<(), MergeError> {
        self.remove_conflict(conflict, false).await
    }

    // -----------------------------------------------------------------------
    // Internal helpers
    // -----------------------------------------------------------------------

    fn dispatch(
        &self,
        original: &TreeFile,
        conflict: &TreeFile,
        tool: &MergeTool,
    ) -> Result<Dispatch, MergeError> {
        self.require_file(conflict)?;

        if !tool.is_external() {
            let surface = self.surface.clone().ok_or(MergeError::SurfaceUnavailable)?;
            return Ok(Dispatch::Embedded(surface));
        }

        self.require_file(original)?;
        let unsupported = || MergeError::BackendUnsupported {
            tool: tool.name().to_string(),
        };
        let latest = self
            .tree
            .absolute_path(original.path())
            .ok_or_else(unsupported)?;
        let conflict = self
            .tree
            .absolute_path(conflict.path())
            .ok_or_else(unsupported)?;

        // Surfaces template problems before anything is spawned.
        tool.invocation(&latest, &conflict)?;

        Ok(Dispatch::External { latest, conflict })
    }

    fn require_file(&self, file: &TreeFile) -> Result<(), MergeError> {
        match self.tree.entry(file.path()) {
            Some(EntryKind::File) => Ok(()),
            _ => Err(MergeError::FileMissing {
                path: file.path().to_string(),
            }),
        }
    }

    async fn run_embedded(
        &self,
        surface: &dyn MergeSurface,
        original: &TreeFile,
        conflict: &TreeFile,
    ) -> Result<MergeOutcome, MergeError> {
        // A deleted original starts from an empty pane; saving recreates it.
        let a = if self.tree.exists(original.path()) {
            self.read(original).await?
        } else {
            String::new()
        };
        let b = self.read(conflict).await?;

        let mut session = MergeSession::new(original.clone(), conflict.clone(), a, b);
        match surface.present(&mut session).await? {
            MergeDecision::Discard => {
                info!(original = %original, "embedded merge discarded");
                Ok(MergeOutcome::Discarded)
            }
            MergeDecision::Save { delete_conflict } => {
                self.tree
                    .write(original.path(), session.editable_text())
                    .await
                    .map_err(|source| MergeError::Io {
                        path: original.path().to_string(),
                        source,
                    })?;
                info!(original = %original, "saved merged text");

                let cleanup_error = if delete_conflict {
                    self.remove_conflict(conflict, true)
                        .await
                        .err()
                        .map(|e| e.to_string())
                } else {
                    None
                };
                Ok(MergeOutcome::Saved {
                    conflict_deleted: delete_conflict && cleanup_error.is_none(),
                    cleanup_error,
                })
            }
        }
    }

    async fn read(&self, file: &TreeFile) -> Result<String, MergeError> {
        self.tree
            .read(file.path())
            .await
            .map_err(|source| MergeError::Io {
                path: file.path().to_string(),
                source,
            })
    }

    async fn remove_conflict(&self, conflict: &TreeFile, after_merge: bool) -> Result<(), MergeError> {
        match self.tree.remove(conflict.path()).await {
            Ok(()) => {
                info!(conflict = %conflict, "deleted conflict file");
                Ok(())
            }
            Err(e) => {
                warn!(conflict = %conflict, error = %e, "failed to delete conflict file");
                Err(MergeError::DeletionFailed {
                    path: conflict.path().to_string(),
                    message: e.to_string(),
                    after_merge,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{Invocation, ProcessExit};
    use crate::tree::{FsTree, MemoryTree};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    const CONFLICT: &str = "notes.sync-conflict-20230710-123718-ABCDE.md";

    /// Records invocations and answers with a fixed exit.
    struct FakeSpawner {
        calls: Mutex<Vec<Invocation>>,
        code: Option<i32>,
        spawn_error: bool,
        delay: Duration,
    }

    impl FakeSpawner {
        fn exiting(code: i32) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                code: Some(code),
                spawn_error: false,
                delay: Duration::ZERO,
            }
        }

        fn calls(&self) -> Vec<Invocation> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessSpawner for FakeSpawner {
        async fn execute(&self, invocation: &Invocation) -> io::Result<ProcessExit> {
            self.calls.lock().unwrap().push(invocation.clone());
            if self.spawn_error {
                return Err(io::Error::new(io::ErrorKind::NotFound, "No such file or directory"));
            }
            tokio::time::sleep(self.delay).await;
            Ok(ProcessExit {
                code: self.code,
                stderr: if self.code == Some(0) {
                    String::new()
                } else {
                    "boom".into()
                },
            })
        }
    }

    /// Optionally reverts every chunk, then answers with `decision`.
    struct ScriptedSurface {
        decision: MergeDecision,
        take_all: bool,
    }

    #[async_trait]
    impl MergeSurface for ScriptedSurface {
        async fn present(&self, session: &mut MergeSession) -> Result<MergeDecision, MergeError> {
            if self.take_all {
                while session.revert_chunk(0).is_some() {}
            }
            Ok(self.decision)
        }
    }

    fn fs_vault() -> (tempfile::TempDir, Arc<FsTree>) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("notes.md"), "mine\n").unwrap();
        std::fs::write(dir.path().join(CONFLICT), "theirs\n").unwrap();
        let tree = Arc::new(FsTree::new(dir.path()));
        (dir, tree)
    }

    fn files() -> (TreeFile, TreeFile) {
        (TreeFile::new("notes.md"), TreeFile::new(CONFLICT))
    }

    #[tokio::test]
    async fn test_external_merge_success_offers_cleanup() {
        let (dir, tree) = fs_vault();
        let spawner = Arc::new(FakeSpawner::exiting(0));
        let resolver = ConflictResolver::new(tree).with_spawner(spawner.clone());
        let (original, conflict) = files();

        let outcome = resolver
            .resolve(&original, &conflict, &MergeTool::Meld)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { offer_cleanup: true });

        let calls = spawner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, "meld");
        assert_eq!(
            calls[0].args,
            vec![
                dir.path().join("notes.md").to_string_lossy().to_string(),
                dir.path().join(CONFLICT).to_string_lossy().to_string(),
            ]
        );
        assert!(dir.path().join(CONFLICT).exists(), "no automatic deletion");
    }

    #[tokio::test]
    async fn test_non_waiting_custom_tool_does_not_offer_cleanup() {
        let (_dir, tree) = fs_vault();
        let resolver =
            ConflictResolver::new(tree).with_spawner(Arc::new(FakeSpawner::exiting(0)));
        let (original, conflict) = files();
        let tool = MergeTool::Custom {
            command: "my-merge $BASE $CONFLICT".into(),
            waits: false,
        };
        let outcome = resolver.resolve(&original, &conflict, &tool).await.unwrap();
        assert_eq!(outcome, MergeOutcome::Merged { offer_cleanup: false });
    }

    #[tokio::test]
    async fn test_tool_failure_leaves_files_untouched() {
        let (dir, tree) = fs_vault();
        let resolver =
            ConflictResolver::new(tree).with_spawner(Arc::new(FakeSpawner::exiting(2)));
        let (original, conflict) = files();

        let err = resolver
            .resolve(&original, &conflict, &MergeTool::GoLand)
            .await
            .unwrap_err();
        match err {
            MergeError::ToolExitFailed {
                program,
                exit_code,
                stderr,
            } => {
                assert_eq!(program, "goland");
                assert_eq!(exit_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(dir.path().join("notes.md")).unwrap(), "mine\n");
        assert_eq!(std::fs::read_to_string(dir.path().join(CONFLICT)).unwrap(), "theirs\n");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_verbatim() {
        let (_dir, tree) = fs_vault();
        let spawner = FakeSpawner {
            spawn_error: true,
            ..FakeSpawner::exiting(0)
        };
        let resolver = ConflictResolver::new(tree).with_spawner(Arc::new(spawner));
        let (original, conflict) = files();
        let err = resolver
            .resolve(&original, &conflict, &MergeTool::Meld)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            MergeError::ToolSpawnFailed { ref message, .. } if message == "No such file or directory"
        ));
    }

    #[tokio::test]
    async fn test_preconditions_checked_before_spawning() {
        let (_dir, tree) = fs_vault();
        let spawner = Arc::new(FakeSpawner::exiting(0));
        let resolver = ConflictResolver::new(tree).with_spawner(spawner.clone());
        let (original, conflict) = files();

        let empty_custom = MergeTool::Custom {
            command: String::new(),
            waits: true,
        };
        assert!(matches!(
            resolver.resolve(&original, &conflict, &empty_custom).await,
            Err(MergeError::ConfigurationMissing)
        ));

        let gone = TreeFile::new("notes.sync-conflict-20230711-000000-GONE.md");
        assert!(matches!(
            resolver.resolve(&original, &gone, &MergeTool::Meld).await,
            Err(MergeError::FileMissing { ref path }) if path == gone.path()
        ));

        assert!(spawner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_virtual_backend_rejects_external_tools() {
        let tree = Arc::new(MemoryTree::with_files([("notes.md", "a"), (CONFLICT, "b")]));
        let spawner = Arc::new(FakeSpawner::exiting(0));
        let resolver = ConflictResolver::new(tree).with_spawner(spawner.clone());
        let (original, conflict) = files();

        let err = resolver
            .resolve(&original, &conflict, &MergeTool::SublimeMerge)
            .await
            .unwrap_err();
        assert!(matches!(err, MergeError::BackendUnsupported { ref tool } if tool == "smerge"));
        assert!(spawner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_embedded_save_writes_and_deletes() {
        let tree = Arc::new(MemoryTree::with_files([
            ("notes.md", "title\nmine\n"),
            (CONFLICT, "title\ntheirs\n"),
        ]));
        let resolver = ConflictResolver::new(tree.clone()).with_surface(Arc::new(ScriptedSurface {
            decision: MergeDecision::Save {
                delete_conflict: true,
            },
            take_all: true,
        }));
        let (original, conflict) = files();

        let outcome = resolver
            .resolve(&original, &conflict, &MergeTool::Embedded)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            MergeOutcome::Saved {
                conflict_deleted: true,
                cleanup_error: None,
            }
        );
        assert_eq!(tree.contents("notes.md").as_deref(), Some("title\ntheirs\n"));
        assert!(!tree.exists(CONFLICT));
    }

    /// Removes the conflict behind the resolver's back, then asks to save
    /// and delete it.
    struct ConflictVanishesSurface {
        tree: Arc<MemoryTree>,
    }

    #[async_trait]
    impl MergeSurface for ConflictVanishesSurface {
        async fn present(&self, session: &mut MergeSession) -> Result<MergeDecision, MergeError> {
            session.set_editable_text("merged\n");
            self.tree.remove(CONFLICT).await.unwrap();
            Ok(MergeDecision::Save {
                delete_conflict: true,
            })
        }
    }

    #[tokio::test]
    async fn test_embedded_save_succeeds_when_cleanup_fails() {
        let tree = Arc::new(MemoryTree::with_files([("notes.md", "mine\n"), (CONFLICT, "theirs\n")]));
        let resolver = ConflictResolver::new(tree.clone()).with_surface(Arc::new(
            ConflictVanishesSurface { tree: tree.clone() },
        ));
        let (original, conflict) = files();

        let outcome = resolver
            .resolve(&original, &conflict, &MergeTool::Embedded)
            .await
            .unwrap();
        match outcome {
            MergeOutcome::Saved {
                conflict_deleted,
                cleanup_error,
            } => {
                assert!(!conflict_deleted);
                let message = cleanup_error.unwrap();
                assert!(message.starts_with("merge succeeded but"), "{message}");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(tree.contents("notes.md").as_deref(), Some("merged\n"));
    }

    #[tokio::test]
    async fn test_embedded_discard_writes_nothing() {
        let tree = Arc::new(MemoryTree::with_files([("notes.md", "mine\n"), (CONFLICT, "theirs\n")]));
        let resolver = ConflictResolver::new(tree.clone()).with_surface(Arc::new(ScriptedSurface {
            decision: MergeDecision::Discard,
            take_all: true,
        }));
        let (original, conflict) = files();

        let outcome = resolver
            .resolve(&original, &conflict, &MergeTool::Embedded)
            .await
            .unwrap();
        assert_eq!(outcome, MergeOutcome::Discarded);
        assert_eq!(tree.contents("notes.md").as_deref(), Some("mine\n"));
        assert_eq!(tree.contents(CONFLICT).as_deref(), Some("theirs\n"));
    }

    #[tokio::test]
    async fn test_embedded_without_surface() {
        let tree = Arc::new(MemoryTree::with_files([("notes.md", ""), (CONFLICT, "")]));
        let resolver = ConflictResolver::new(tree);
        let (original, conflict) = files();
        assert!(matches!(
            resolver.resolve(&original, &conflict, &MergeTool::Embedded).await,
            Err(MergeError::SurfaceUnavailable)
        ));
    }

    #[tokio::test]
    async fn test_cleanup_and_delete_report_context() {
        let tree = Arc::new(MemoryTree::with_files([("notes.md", ""), (CONFLICT, "")]));
        let resolver = ConflictResolver::new(tree.clone());
        let (_, conflict) = files();

        resolver.cleanup(&conflict).await.unwrap();
        assert!(!tree.exists(CONFLICT));

        let err = resolver.cleanup(&conflict).await.unwrap_err();
        assert!(err.merge_succeeded());
        assert!(err.to_string().starts_with("merge succeeded but"));

        let err = resolver.delete_conflict(&conflict).await.unwrap_err();
        assert!(matches!(err, MergeError::DeletionFailed { after_merge: false, .. }));
    }

    #[tokio::test]
    async fn test_concurrent_resolutions_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "a.md",
            "a.sync-conflict-20230101-000000-X.md",
            "b.md",
            "b.sync-conflict-20230101-000000-Y.md",
        ] {
            std::fs::write(dir.path().join(name), name).unwrap();
        }
        let spawner = Arc::new(FakeSpawner {
            delay: Duration::from_millis(20),
            ..FakeSpawner::exiting(0)
        });
        let resolver =
            ConflictResolver::new(Arc::new(FsTree::new(dir.path()))).with_spawner(spawner.clone());
        let other = resolver.clone();

        let a = (TreeFile::new("a.md"), TreeFile::new("a.sync-conflict-20230101-000000-X.md"));
        let b = (TreeFile::new("b.md"), TreeFile::new("b.sync-conflict-20230101-000000-Y.md"));
        let (ra, rb) = tokio::join!(
            resolver.resolve(&a.0, &a.1, &MergeTool::Meld),
            other.resolve(&b.0, &b.1, &MergeTool::Meld),
        );
        assert!(ra.is_ok());
        assert!(rb.is_ok());
        assert_eq!(spawner.calls().len(), 2);
    }

    #[test]
    fn test_from_config_sets_default_tool() {
        let config = MergeConfig {
            tool: crate::config::MergeToolKind::Embedded,
            ..MergeConfig::default()
        };
        let resolver = ConflictResolver::from_config(Arc::new(MemoryTree::new()), &config);
        assert_eq!(resolver.default_tool(), &MergeTool::Embedded);
    }
}
