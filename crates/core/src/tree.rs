//! File tree accessors.
//!
//! The conflict index and the merge orchestrator never touch the disk
//! directly; they go through a [`FileTree`] handed to them by the caller.
//! Paths are vault-relative, `/`-separated and have no leading slash. The
//! vault root itself is the empty string.
//!
//! Two implementations are provided:
//! - [`FsTree`]: a live view of a local directory.
//! - [`MemoryTree`]: an in-memory tree with no filesystem behind it.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};
use walkdir::WalkDir;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A reference to a file in the tree by its vault-relative path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct TreeFile {
    path: String,
}

impl TreeFile {
    /// Wrap a vault-relative path, normalising separators and stray slashes.
    pub fn new(path: impl AsRef<str>) -> Self {
        Self {
            path: normalize(path.as_ref()),
        }
    }

    /// Full vault-relative path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Last path component, including the extension.
    pub fn name(&self) -> &str {
        match self.path.rfind('/') {
            Some(idx) => &self.path[idx + 1..],
            None => &self.path,
        }
    }

    /// File name without its last extension.
    pub fn basename(&self) -> &str {
        let name = self.name();
        match extension_dot(name) {
            Some(idx) => &name[..idx],
            None => name,
        }
    }

    /// Text after the last `.` of the name, or `""` when there is none.
    ///
    /// A leading dot does not start an extension (`.gitignore` has none).
    pub fn extension(&self) -> &str {
        let name = self.name();
        match extension_dot(name) {
            Some(idx) => &name[idx + 1..],
            None => "",
        }
    }

    /// Path of the containing directory, `""` for files in the root.
    pub fn parent(&self) -> &str {
        parent_of(&self.path)
    }
}

impl std::fmt::Display for TreeFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

fn extension_dot(name: &str) -> Option<usize> {
    match name.rfind('.') {
        Some(0) | None => None,
        Some(idx) => Some(idx),
    }
}

/// What lives at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// Directory part of a vault-relative path.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[..idx],
        None => "",
    }
}

/// Join a directory and a name into a vault-relative path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

fn normalize(path: &str) -> String {
    path.replace('\\', "/")
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Read and mutate access to the file tree a vault lives in.
#[async_trait]
pub trait FileTree: Send + Sync {
    /// Every file (directories excluded), sorted by path.
    fn files(&self) -> Vec<TreeFile>;

    /// Look up what exists at `path`, if anything.
    fn entry(&self, path: &str) -> Option<EntryKind>;

    /// Direct children of the directory at `dir`, sorted by name.
    fn children(&self, dir: &str) -> Vec<(TreeFile, EntryKind)>;

    /// Absolute location on disk, or `None` when the backend is not a
    /// direct filesystem.
    fn absolute_path(&self, path: &str) -> Option<PathBuf>;

    async fn read(&self, path: &str) -> io::Result<String>;

    async fn write(&self, path: &str, contents: &str) -> io::Result<()>;

    async fn remove(&self, path: &str) -> io::Result<()>;

    fn exists(&self, path: &str) -> bool {
        self.entry(path).is_some()
    }

    /// The file at `path` if it exists and is not a directory.
    fn file(&self, path: &str) -> Option<TreeFile> {
        match self.entry(path) {
            Some(EntryKind::File) => Some(TreeFile::new(path)),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Local filesystem
// ---------------------------------------------------------------------------

/// A [`FileTree`] over a local directory.
///
/// Every query reads the disk, so results always reflect the current state
/// rather than a cached snapshot. Hidden entries (names starting with `.`)
/// are skipped: they hold sync-agent metadata and editor state, not notes.
#[derive(Debug, Clone)]
pub struct FsTree {
    root: PathBuf,
}

impl FsTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a vault-relative path onto the disk.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for part in normalize(path).split('/').filter(|p| !p.is_empty()) {
            full.push(part);
        }
        full
    }

    /// Map an absolute path back to a vault-relative one. Returns `None` for
    /// paths outside the root or inside hidden entries.
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut parts = Vec::new();
        for component in rel.components() {
            let part = component.as_os_str().to_str()?;
            if is_hidden(part) {
                return None;
            }
            parts.push(part);
        }
        Some(parts.join("/"))
    }

    fn read_dir_sorted(&self, dir: &str) -> Vec<(TreeFile, EntryKind)> {
        let full = self.resolve(dir);
        let entries = match std::fs::read_dir(&full) {
            Ok(entries) => entries,
            Err(e) => {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(dir = %full.display(), error = %e, "failed to list directory");
                }
                return Vec::new();
            }
        };

        let mut children = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!(path = %entry.path().display(), "skipping non-UTF-8 file name");
                continue;
            };
            if is_hidden(name) {
                continue;
            }
            // Follow symlinks so a linked note counts as a file.
            let kind = match std::fs::metadata(entry.path()) {
                Ok(meta) if meta.is_dir() => EntryKind::Directory,
                Ok(_) => EntryKind::File,
                Err(_) => continue,
            };
            children.push((TreeFile::new(join(dir, name)), kind));
        }
        children.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        children
    }
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

#[async_trait]
impl FileTree for FsTree {
    fn files(&self) -> Vec<TreeFile> {
        // The root itself may live in a hidden directory; only entries below
        // it are filtered.
        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                e.depth() == 0 || !e.file_name().to_str().is_some_and(is_hidden)
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.loop_ancestor().is_some() => {
                    debug!(path = ?e.path(), "skipping symlink loop");
                    continue;
                }
                Err(e) => {
                    warn!(root = %self.root.display(), error = %e, "failed to walk vault");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            match self.relative(entry.path()) {
                Some(path) => files.push(TreeFile::new(path)),
                None => debug!(path = %entry.path().display(), "skipping non-UTF-8 path"),
            }
        }
        files.sort();
        files
    }

    fn entry(&self, path: &str) -> Option<EntryKind> {
        if normalize(path).split('/').any(is_hidden) {
            return None;
        }
        match std::fs::metadata(self.resolve(path)) {
            Ok(meta) if meta.is_dir() => Some(EntryKind::Directory),
            Ok(_) => Some(EntryKind::File),
            Err(_) => None,
        }
    }

    fn children(&self, dir: &str) -> Vec<(TreeFile, EntryKind)> {
        self.read_dir_sorted(dir)
    }

    fn absolute_path(&self, path: &str) -> Option<PathBuf> {
        Some(self.resolve(path))
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        tokio::fs::read_to_string(self.resolve(path)).await
    }

    async fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        tokio::fs::write(self.resolve(path), contents).await
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        tokio::fs::remove_file(self.resolve(path)).await
    }
}

// ---------------------------------------------------------------------------
// In-memory tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Node {
    File(String),
    Directory,
}

/// A [`FileTree`] held entirely in memory.
///
/// Directories are created implicitly for every file added. There is no
/// filesystem behind it, so [`FileTree::absolute_path`] always returns `None`.
#[derive(Debug, Default)]
pub struct MemoryTree {
    nodes: Mutex<BTreeMap<String, Node>>,
}

impl MemoryTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tree from `(path, contents)` pairs.
    pub fn with_files<'a>(files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let tree = Self::new();
        for (path, contents) in files {
            tree.insert(path, contents);
        }
        tree
    }

    /// Add or replace a file, creating its parent directories.
    pub fn insert(&self, path: &str, contents: &str) {
        let path = normalize(path);
        let mut nodes = self.lock();
        let mut dir = parent_of(&path).to_string();
        while !dir.is_empty() {
            nodes.insert(dir.clone(), Node::Directory);
            dir = parent_of(&dir).to_string();
        }
        nodes.insert(path, Node::File(contents.to_string()));
    }

    /// Add an empty directory.
    pub fn insert_dir(&self, path: &str) {
        self.lock().insert(normalize(path), Node::Directory);
    }

    /// Move a file to a new path.
    pub fn rename(&self, from: &str, to: &str) -> io::Result<()> {
        let contents = {
            let mut nodes = self.lock();
            match nodes.remove(&normalize(from)) {
                Some(Node::File(contents)) => contents,
                Some(node) => {
                    nodes.insert(normalize(from), node);
                    return Err(not_a_file(from));
                }
                None => return Err(not_found(from)),
            }
        };
        self.insert(to, &contents);
        Ok(())
    }

    /// Current contents of a file, for assertions.
    pub fn contents(&self, path: &str) -> Option<String> {
        match self.lock().get(&normalize(path)) {
            Some(Node::File(contents)) => Some(contents.clone()),
            _ => None,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Node>> {
        // A poisoned map is still structurally valid.
        self.nodes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("{}: no such file", path))
}

fn not_a_file(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, format!("{}: is a directory", path))
}

#[async_trait]
impl FileTree for MemoryTree {
    fn files(&self) -> Vec<TreeFile> {
        self.lock()
            .iter()
            .filter(|(_, node)| matches!(node, Node::File(_)))
            .map(|(path, _)| TreeFile::new(path))
            .collect()
    }

    fn entry(&self, path: &str) -> Option<EntryKind> {
        let path = normalize(path);
        if path.is_empty() {
            return Some(EntryKind::Directory);
        }
        self.lock().get(&path).map(|node| match node {
            Node::File(_) => EntryKind::File,
            Node::Directory => EntryKind::Directory,
        })
    }

    fn children(&self, dir: &str) -> Vec<(TreeFile, EntryKind)> {
        let dir = normalize(dir);
        let mut children: Vec<_> = self
            .lock()
            .iter()
            .filter(|(path, _)| parent_of(path) == dir)
            .map(|(path, node)| {
                let kind = match node {
                    Node::File(_) => EntryKind::File,
                    Node::Directory => EntryKind::Directory,
                };
                (TreeFile::new(path), kind)
            })
            .collect();
        children.sort_by(|a, b| a.0.name().cmp(b.0.name()));
        children
    }

    fn absolute_path(&self, _path: &str) -> Option<PathBuf> {
        None
    }

    async fn read(&self, path: &str) -> io::Result<String> {
        match self.lock().get(&normalize(path)) {
            Some(Node::File(contents)) => Ok(contents.clone()),
            Some(Node::Directory) => Err(not_a_file(path)),
            None => Err(not_found(path)),
        }
    }

    async fn write(&self, path: &str, contents: &str) -> io::Result<()> {
        if let Some(Node::Directory) = self.lock().get(&normalize(path)) {
            return Err(not_a_file(path));
        }
        self.insert(path, contents);
        Ok(())
    }

    async fn remove(&self, path: &str) -> io::Result<()> {
        let path = normalize(path);
        let mut nodes = self.lock();
        match nodes.get(&path) {
            Some(Node::File(_)) => {}
            Some(Node::Directory) => return Err(not_a_file(&path)),
            None => return Err(not_found(&path)),
        }
        nodes.remove(&path);
        Ok(())
    }
}
