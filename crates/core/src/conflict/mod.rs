//! Conflict discovery, grouping, and merging.
//!
//! The conflict subsystem is responsible for:
//! 1. **Parsing** -- recognising conflict copies by name ([`marker`]).
//! 2. **Grouping** -- collecting the conflicts of each original ([`index`]).
//! 3. **Merging** -- running a merge tool on one pair and cleaning up
//!    afterwards ([`resolver`], [`strategy`], [`merge_view`]).

pub mod index;
pub mod marker;
pub mod merge_view;
pub mod resolver;
pub mod strategy;

pub use index::{all_groups, group_for_file, ConflictEntry, ConflictGroup, ConflictIndex};
pub use marker::{is_conflict, latest_path, ConflictMarker, ConflictTimestamp};
pub use merge_view::{MergeChunk, MergeDecision, MergeSession, MergeSurface};
pub use resolver::{ConflictResolver, MergeOutcome, ResolveState};
pub use strategy::MergeTool;
