//! Grouping of conflict files by the original they belong to.
//!
//! The index is a pure projection of the file tree: it is rebuilt from
//! scratch on every request and never cached, so the tree stays the single
//! source of truth even while the sync agent keeps writing to it.

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info};

use super::marker::{self, ConflictMarker};
use crate::tree::{FileTree, TreeFile};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One conflict file together with its parsed name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictEntry {
    pub marker: ConflictMarker,
    pub file: TreeFile,
}

/// An original path and every conflict file currently associated with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictGroup {
    /// Identity key of the group.
    pub original_path: String,
    /// The original, when a file (not a directory) exists at `original_path`.
    pub original: Option<TreeFile>,
    /// Oldest first; ties and unknown timestamps keep encounter order, with
    /// unknown timestamps after every known one.
    pub conflicts: Vec<ConflictEntry>,
}

impl ConflictGroup {
    fn new(original_path: String, original: Option<TreeFile>) -> Self {
        Self {
            original_path,
            original,
            conflicts: Vec::new(),
        }
    }

    /// `true` when there is nothing to resolve.
    pub fn is_empty(&self) -> bool {
        self.conflicts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conflicts.len()
    }

    pub fn oldest(&self) -> Option<&ConflictEntry> {
        self.conflicts.first()
    }

    pub fn newest(&self) -> Option<&ConflictEntry> {
        self.conflicts.last()
    }

    /// Look up an entry by the path of its conflict file.
    pub fn entry(&self, conflict_path: &str) -> Option<&ConflictEntry> {
        self.conflicts
            .iter()
            .find(|entry| entry.file.path() == conflict_path)
    }

    fn sort(&mut self) {
        // Stable: equal keys keep the order they were encountered in.
        self.conflicts
            .sort_by_key(|entry| entry.marker.timestamp.sort_key());
    }
}

/// All conflict groups of a tree, keyed by original path.
pub type ConflictIndex = BTreeMap<String, ConflictGroup>;

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Group every conflict file in the tree by its original path.
///
/// Files that are not conflicts do not create groups, so every returned
/// group has at least one conflict.
pub fn all_groups<T: FileTree + ?Sized>(tree: &T) -> ConflictIndex {
    let files = tree.files();
    let mut index = ConflictIndex::new();

    for file in files.iter() {
        let Some(marker) = marker::parse(file) else {
            continue;
        };
        let original_path = marker::original_path(file, &marker);
        let group = index.entry(original_path.clone()).or_insert_with(|| {
            let original = tree.file(&original_path);
            ConflictGroup::new(original_path, original)
        });
        group.conflicts.push(ConflictEntry {
            marker,
            file: file.clone(),
        });
    }

    for group in index.values_mut() {
        group.sort();
    }

    info!(
        files = files.len(),
        groups = index.len(),
        "indexed conflict groups"
    );
    index
}

/// The conflict group `file` belongs to, whether `file` is the original or
/// one of its conflicts.
///
/// Only the file's own directory is scanned: the sync agent always writes
/// conflicts next to their original. A file without conflicts yields an
/// empty group.
pub fn group_for_file<T: FileTree + ?Sized>(tree: &T, file: &TreeFile) -> ConflictGroup {
    let original_path = marker::latest_path(file);
    let mut group = ConflictGroup::new(original_path.clone(), tree.file(&original_path));

    for (child, _) in tree.children(file.parent()) {
        if child.path() == original_path {
            continue;
        }
        let Some(marker) = marker::parse(&child) else {
            continue;
        };
        if marker::original_path(&child, &marker) == original_path {
            group.conflicts.push(ConflictEntry {
                marker,
                file: child,
            });
        }
    }

    group.sort();
    debug!(
        file = %file,
        original = %group.original_path,
        conflicts = group.len(),
        "computed conflict group"
    );
    group
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{FileTree, MemoryTree};

    const CONFLICT: &str = "notes.sync-conflict-20230710-123718-ABCDE.md";

    fn paths(group: &ConflictGroup) -> Vec<&str> {
        group.conflicts.iter().map(|c| c.file.path()).collect()
    }

    #[test]
    fn test_single_conflict_scenario() {
        let tree = MemoryTree::with_files([("notes.md", "mine"), (CONFLICT, "theirs")]);
        let index = all_groups(&tree);

        assert_eq!(index.len(), 1);
        let group = &index["notes.md"];
        assert_eq!(group.original_path, "notes.md");
        assert_eq!(group.original.as_ref().map(|f| f.path()), Some("notes.md"));
        assert_eq!(group.len(), 1);

        let entry = &group.conflicts[0];
        assert_eq!(entry.marker.original_name, "notes.md");
        assert_eq!(entry.marker.device_id, "ABCDE");
        assert_eq!(entry.marker.timestamp.to_string(), "2023-07-10 12:37:18");
    }

    #[test]
    fn test_groups_sorted_oldest_first() {
        let tree = MemoryTree::with_files([
            ("dir/a.md", ""),
            ("dir/a.sync-conflict-20240101-000000-ZZZ.md", ""),
            ("dir/a.sync-conflict-20220101-000000-YYY.md", ""),
            ("dir/a.sync-conflict-20231345-000000-BAD.md", ""),
            ("dir/a.sync-conflict-20230101-000000-XXX.md", ""),
        ]);
        let index = all_groups(&tree);
        let group = &index["dir/a.md"];
        assert_eq!(
            paths(group),
            vec![
                "dir/a.sync-conflict-20220101-000000-YYY.md",
                "dir/a.sync-conflict-20230101-000000-XXX.md",
                "dir/a.sync-conflict-20240101-000000-ZZZ.md",
                "dir/a.sync-conflict-20231345-000000-BAD.md",
            ]
        );
        assert_eq!(group.oldest().unwrap().marker.device_id, "YYY");
        assert_eq!(group.newest().unwrap().marker.device_id, "BAD");

        let known: Vec<_> = group
            .conflicts
            .iter()
            .filter_map(|c| c.marker.timestamp.known())
            .collect();
        assert!(known.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_equal_timestamps_keep_encounter_order() {
        let tree = MemoryTree::with_files([
            ("a.sync-conflict-20230101-000000-BBB.md", ""),
            ("a.sync-conflict-20230101-000000-AAA.md", ""),
        ]);
        let group = &all_groups(&tree)["a.md"];
        let devices: Vec<_> = group
            .conflicts
            .iter()
            .map(|c| c.marker.device_id.as_str())
            .collect();
        assert_eq!(devices, vec!["AAA", "BBB"]);
    }

    #[test]
    fn test_group_for_original_and_conflict_agree() {
        let tree = MemoryTree::with_files([
            ("notes.md", ""),
            (CONFLICT, ""),
            ("notes.sync-conflict-20230711-000000-FGHIJ.md", ""),
            ("other.md", ""),
            ("other.sync-conflict-20230711-000000-FGHIJ.md", ""),
        ]);
        let from_original = group_for_file(&tree, &TreeFile::new("notes.md"));
        let from_conflict = group_for_file(&tree, &TreeFile::new(CONFLICT));
        assert_eq!(from_original.original_path, "notes.md");
        assert_eq!(from_original, from_conflict);
        assert_eq!(from_original.len(), 2);
    }

    #[test]
    fn test_bulk_and_single_queries_match() {
        let tree = MemoryTree::with_files([
            ("a/x.md", ""),
            ("a/x.sync-conflict-20230102-000000-B.md", ""),
            ("a/x.sync-conflict-20230101-000000-A.md", ""),
            ("a/x.sync-conflict-20230101-000000-C.md", ""),
            ("a/y.sync-conflict-20230101-000000-A.md", ""),
            ("b/x.sync-conflict-20230101-000000-A.md", ""),
        ]);
        let index = all_groups(&tree);
        assert_eq!(index.len(), 3);
        for (original_path, group) in &index {
            let single = group_for_file(&tree, &TreeFile::new(original_path));
            assert_eq!(&single, group, "mismatch for {original_path}");
        }
    }

    #[test]
    fn test_file_without_conflicts_is_empty_group() {
        let tree = MemoryTree::with_files([("plain.md", "")]);
        let group = group_for_file(&tree, &TreeFile::new("plain.md"));
        assert!(group.is_empty());
        assert_eq!(group.original_path, "plain.md");
        assert!(all_groups(&tree).is_empty());
    }

    #[tokio::test]
    async fn test_deleted_original_keeps_group_key() {
        let tree = MemoryTree::with_files([("notes.md", ""), (CONFLICT, "")]);
        tree.remove("notes.md").await.unwrap();

        let group = group_for_file(&tree, &TreeFile::new(CONFLICT));
        assert_eq!(group.original_path, "notes.md");
        assert!(group.original.is_none());
        assert_eq!(group.len(), 1);
        assert!(all_groups(&tree)["notes.md"].original.is_none());
    }

    #[test]
    fn test_directory_at_original_path_is_not_an_original() {
        let tree = MemoryTree::with_files([("notes.sync-conflict-20230710-123718-ABCDE", "")]);
        tree.insert_dir("notes");
        let group = &all_groups(&tree)["notes"];
        assert!(group.original.is_none());
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_group_serializes_for_reports() {
        let tree = MemoryTree::with_files([
            ("notes.md", ""),
            (CONFLICT, ""),
            ("notes.sync-conflict-20231345-000000-BAD.md", ""),
        ]);
        let json = serde_json::to_value(group_for_file(&tree, &TreeFile::new("notes.md"))).unwrap();
        assert_eq!(json["original_path"], "notes.md");
        assert_eq!(json["original"], "notes.md");
        assert_eq!(json["conflicts"][0]["file"], CONFLICT);
        assert_eq!(json["conflicts"][0]["marker"]["device_id"], "ABCDE");
        assert_eq!(json["conflicts"][0]["marker"]["timestamp"], "2023-07-10T12:37:18");
        assert_eq!(json["conflicts"][1]["marker"]["timestamp"]["raw"], "20231345-000000");
    }

    #[test]
    fn test_group_for_file_only_scans_siblings() {
        let tree = MemoryTree::with_files([
            ("notes.md", ""),
            ("sub/notes.sync-conflict-20230710-123718-ABCDE.md", ""),
        ]);
        assert!(group_for_file(&tree, &TreeFile::new("notes.md")).is_empty());
        let nested = group_for_file(
            &tree,
            &TreeFile::new("sub/notes.sync-conflict-20230710-123718-ABCDE.md"),
        );
        assert_eq!(nested.original_path, "sub/notes.md");
        assert_eq!(nested.len(), 1);
    }
}
