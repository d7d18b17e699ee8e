//! synconflict core library.
//!
//! This crate provides the building blocks for dealing with Syncthing
//! conflict copies: configuration, a file-tree abstraction, conflict
//! parsing and grouping, merge orchestration, and live conflict counts
//! driven by filesystem notifications.

pub mod config;
pub mod conflict;
pub mod errors;
pub mod spawn;
pub mod tree;
pub mod watch;

// Re-exports for convenience.
pub use config::AppConfig;
pub use conflict::{all_groups, group_for_file, latest_path, ConflictResolver, MergeTool};
pub use tree::{FileTree, FsTree, MemoryTree, TreeFile};
pub use watch::LiveUpdateCoordinator;
