//! Embedded two-pane merge.
//!
//! A [`MergeSession`] holds the original as an editable buffer (`a`) and the
//! conflict as a read-only reference (`b`). Differences are grouped into
//! chunks with `similar`; each chunk can be reverted from `b` into `a`. The
//! host renders the session through a [`MergeSurface`] and reports back
//! whether to save or discard.

use std::ops::Range;

use async_trait::async_trait;
use serde::Serialize;
use similar::{DiffTag, TextDiff};
use tracing::debug;

use crate::errors::MergeError;
use crate::tree::TreeFile;

/// A contiguous block of lines that differ between the two buffers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeChunk {
    /// Line range in the editable buffer.
    pub a_lines: Range<usize>,
    /// Line range in the conflict buffer.
    pub b_lines: Range<usize>,
    pub a_text: String,
    pub b_text: String,
    #[serde(skip)]
    a_bytes: Range<usize>,
}

impl MergeChunk {
    /// Lines only present in the conflict.
    pub fn is_insertion(&self) -> bool {
        self.a_lines.is_empty()
    }

    /// Lines only present in the original.
    pub fn is_deletion(&self) -> bool {
        self.b_lines.is_empty()
    }
}

/// State of one embedded merge.
#[derive(Debug, Clone)]
pub struct MergeSession {
    original: TreeFile,
    conflict: TreeFile,
    initial: String,
    a: String,
    b: String,
}

impl MergeSession {
    pub fn new(original: TreeFile, conflict: TreeFile, a: String, b: String) -> Self {
        Self {
            original,
            conflict,
            initial: a.clone(),
            a,
            b,
        }
    }

    pub fn original(&self) -> &TreeFile {
        &self.original
    }

    pub fn conflict(&self) -> &TreeFile {
        &self.conflict
    }

    /// Current contents of the editable pane.
    pub fn editable_text(&self) -> &str {
        &self.a
    }

    /// Contents of the read-only conflict pane.
    pub fn conflict_text(&self) -> &str {
        &self.b
    }

    /// Replace the editable pane wholesale (free-form edit by the user).
    pub fn set_editable_text(&mut self, text: impl Into<String>) {
        self.a = text.into();
    }

    pub fn is_modified(&self) -> bool {
        self.a != self.initial
    }

    /// Differences between the editable pane and the conflict, top to bottom.
    pub fn chunks(&self) -> Vec<MergeChunk> {
        let diff = TextDiff::from_lines(self.a.as_str(), self.b.as_str());
        let old = diff.old_slices();
        let new = diff.new_slices();

        let mut chunks = Vec::new();
        let mut pending: Option<(Range<usize>, Range<usize>)> = None;

        for op in diff.ops() {
            let (tag, a_range, b_range) = op.as_tag_tuple();
            if tag == DiffTag::Equal {
                if let Some((a, b)) = pending.take() {
                    chunks.push(build_chunk(old, new, a, b));
                }
                continue;
            }
            pending = Some(match pending.take() {
                Some((a, b)) => (a.start..a_range.end, b.start..b_range.end),
                None => (a_range, b_range),
            });
        }
        if let Some((a, b)) = pending {
            chunks.push(build_chunk(old, new, a, b));
        }

        chunks
    }

    /// Copy chunk `index` from the conflict into the editable pane.
    ///
    /// Returns the reverted chunk, or `None` when there is no such chunk.
    pub fn revert_chunk(&mut self, index: usize) -> Option<MergeChunk> {
        let chunk = self.chunks().into_iter().nth(index)?;
        self.a.replace_range(chunk.a_bytes.clone(), &chunk.b_text);
        debug!(
            original = %self.original,
            chunk = index,
            lines = ?chunk.a_lines,
            "reverted chunk from conflict"
        );
        Some(chunk)
    }

    /// Unified diff of the editable pane against the conflict.
    pub fn unified_diff(&self) -> String {
        unified_diff(
            self.original.path(),
            self.conflict.path(),
            &self.a,
            &self.b,
        )
    }
}

fn build_chunk(old: &[&str], new: &[&str], a: Range<usize>, b: Range<usize>) -> MergeChunk {
    let start: usize = old[..a.start].iter().map(|s| s.len()).sum();
    let a_text = old[a.clone()].concat();
    let b_text = new[b.clone()].concat();
    MergeChunk {
        a_bytes: start..start + a_text.len(),
        a_lines: a,
        b_lines: b,
        a_text,
        b_text,
    }
}

/// Unified diff between two texts, headed by the given labels. Empty when
/// the texts are identical.
pub fn unified_diff(original_label: &str, modified_label: &str, original: &str, modified: &str) -> String {
    if original == modified {
        return String::new();
    }
    let patch = diffy::create_patch(original, modified).to_string();
    // diffy labels its header "original"/"modified"; swap in the real paths.
    let body: String = patch
        .split_inclusive('\n')
        .skip_while(|line| line.starts_with("---") || line.starts_with("+++"))
        .collect();
    format!("--- {}\n+++ {}\n{}", original_label, modified_label, body)
}

// ---------------------------------------------------------------------------
// Surface
// ---------------------------------------------------------------------------

/// What the user chose to do with an embedded merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeDecision {
    /// Write the editable pane back to the original.
    Save { delete_conflict: bool },
    /// Leave both files untouched.
    Discard,
}

/// Renders a [`MergeSession`] and collects the user's decision.
#[async_trait]
pub trait MergeSurface: Send + Sync {
    async fn present(&self, session: &mut MergeSession) -> Result<MergeDecision, MergeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(a: &str, b: &str) -> MergeSession {
        MergeSession::new(
            TreeFile::new("notes.md"),
            TreeFile::new("notes.sync-conflict-20230710-123718-ABCDE.md"),
            a.to_string(),
            b.to_string(),
        )
    }

    #[test]
    fn test_identical_buffers_have_no_chunks() {
        let s = session("one\ntwo\n", "one\ntwo\n");
        assert!(s.chunks().is_empty());
        assert!(s.unified_diff().is_empty());
    }

    #[test]
    fn test_chunks_cover_each_difference() {
        let s = session(
            "title\nmine\nshared\nend\n",
            "title\ntheirs\nshared\nextra\nend\n",
        );
        let chunks = s.chunks();
        assert_eq!(chunks.len(), 2);

        assert_eq!(chunks[0].a_lines, 1..2);
        assert_eq!(chunks[0].a_text, "mine\n");
        assert_eq!(chunks[0].b_text, "theirs\n");

        assert!(chunks[1].is_insertion());
        assert_eq!(chunks[1].b_text, "extra\n");
    }

    #[test]
    fn test_revert_chunk_copies_conflict_side() {
        let mut s = session(
            "title\nmine\nshared\nend\n",
            "title\ntheirs\nshared\nextra\nend\n",
        );
        s.revert_chunk(1).expect("second chunk exists");
        assert_eq!(s.editable_text(), "title\nmine\nshared\nextra\nend\n");
        assert!(s.is_modified());

        s.revert_chunk(0).expect("first chunk exists");
        assert_eq!(s.editable_text(), s.conflict_text());
        assert!(s.chunks().is_empty());
        assert!(s.revert_chunk(0).is_none());
    }

    #[test]
    fn test_revert_deletion_removes_lines() {
        let mut s = session("a\nlocal only\nb\n", "a\nb\n");
        let chunk = s.revert_chunk(0).unwrap();
        assert!(chunk.is_deletion());
        assert_eq!(s.editable_text(), "a\nb\n");
    }

    #[test]
    fn test_unified_diff_labels() {
        let s = session("a\nb\n", "a\nc\n");
        let diff = s.unified_diff();
        assert!(diff.starts_with(
            "--- notes.md\n+++ notes.sync-conflict-20230710-123718-ABCDE.md\n"
        ));
        assert!(diff.contains("-b\n"));
        assert!(diff.contains("+c\n"));
    }

    #[test]
    fn test_set_editable_text() {
        let mut s = session("a\n", "b\n");
        assert!(!s.is_modified());
        s.set_editable_text("merged\n");
        assert_eq!(s.editable_text(), "merged\n");
        assert!(s.is_modified());
    }
}
