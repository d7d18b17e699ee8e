//! Subcommands that operate on a vault.

pub mod merge;
pub mod report;
