//! `merge` and `delete`: the actions of the resolve dialog.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Local;
use dialoguer::{Confirm, Select};
use indicatif::{ProgressBar, ProgressStyle};

use synconflict_core::config::{AppConfig, MergeConfig, MergeToolKind};
use synconflict_core::conflict::marker;
use synconflict_core::conflict::{
    group_for_file, ConflictEntry, ConflictResolver, MergeOutcome, MergeTool,
};
use synconflict_core::tree::{FileTree, FsTree, TreeFile};

use super::report::describe_timestamp;
use crate::style;
use crate::surface::TerminalMergeSurface;

/// Merge one conflict of `file`'s group into the original.
pub async fn run_merge(
    tree: Arc<FsTree>,
    config: &AppConfig,
    file: &TreeFile,
    index: Option<usize>,
    tool: Option<MergeToolKind>,
    yes: bool,
) -> Result<()> {
    let group = group_for_file(tree.as_ref(), file);
    if group.is_empty() {
        println!("{}", style::success(&format!("{} has no conflicts", group.original_path)));
        return Ok(());
    }

    let entry = pick_conflict(&group.conflicts, file, index)?;
    let original = TreeFile::new(&group.original_path);

    let resolver = ConflictResolver::from_config(tree, &config.merge)
        .with_surface(Arc::new(TerminalMergeSurface));
    let tool = match tool {
        Some(kind) => MergeTool::from_config(&MergeConfig {
            tool: kind,
            ..config.merge.clone()
        }),
        None => resolver.default_tool().clone(),
    };

    let spinner = tool.is_external().then(|| waiting_spinner(&tool));
    let result = resolver.resolve(&original, &entry.file, &tool).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    match result.with_context(|| format!("failed to merge {}", entry.file))? {
        MergeOutcome::Merged { offer_cleanup: true } => {
            println!("{}", style::success(&format!("{} finished", tool.label())));
            let delete = yes
                || Confirm::new()
                    .with_prompt(format!("Delete the conflicting file {}?", entry.file))
                    .default(false)
                    .interact()
                    .context("failed to read confirmation")?;
            if delete {
                resolver.cleanup(&entry.file).await?;
                println!("{}", style::success(&format!("Deleted {}", entry.file)));
            }
        }
        MergeOutcome::Merged {
            offer_cleanup: false,
        } => {
            println!("{}", style::success(&format!("{} launched", tool.label())));
            println!(
                "{}",
                style::dim(&format!(
                    "When you are done, remove the conflict with: synconflict delete {}",
                    entry.file
                ))
            );
        }
        MergeOutcome::Saved {
            conflict_deleted,
            cleanup_error,
        } => {
            println!("{}", style::success(&format!("Saved {}", original)));
            if conflict_deleted {
                println!("{}", style::success(&format!("Deleted {}", entry.file)));
            }
            if let Some(message) = cleanup_error {
                println!("{}", style::warn(&message));
            }
        }
        MergeOutcome::Discarded => {
            println!("{}", style::warn("Merge discarded; no files were changed"));
        }
    }

    Ok(())
}

/// Delete a conflict copy without merging it.
pub async fn run_delete(tree: Arc<FsTree>, conflict: &TreeFile, yes: bool) -> Result<()> {
    if !marker::is_conflict(conflict) {
        anyhow::bail!("'{}' is not a conflict file; refusing to delete it", conflict);
    }
    if !tree.exists(conflict.path()) {
        anyhow::bail!("'{}' does not exist in the vault", conflict);
    }

    let confirmed = yes
        || Confirm::new()
            .with_prompt(format!("Delete {}? This cannot be undone.", conflict))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
    if !confirmed {
        println!("{}", style::warn("Nothing deleted"));
        return Ok(());
    }

    ConflictResolver::new(tree).delete_conflict(conflict).await?;
    println!("{}", style::success(&format!("Deleted {}", conflict)));
    Ok(())
}

/// Pick which conflict to merge: the explicit `--index`, the file itself
/// when it is a conflict, the only one, or ask.
fn pick_conflict<'a>(
    conflicts: &'a [ConflictEntry],
    file: &TreeFile,
    index: Option<usize>,
) -> Result<&'a ConflictEntry> {
    if let Some(index) = index {
        return index
            .checked_sub(1)
            .and_then(|i| conflicts.get(i))
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "no conflict #{} (this file has {} conflict(s))",
                    index,
                    conflicts.len()
                )
            });
    }
    if let Some(entry) = conflicts.iter().find(|e| e.file == *file) {
        return Ok(entry);
    }
    if let [only] = conflicts {
        return Ok(only);
    }

    let now = Local::now().naive_local();
    let items: Vec<String> = conflicts
        .iter()
        .map(|e| {
            format!(
                "{}  {}  {}",
                e.file.name(),
                e.marker.device_id,
                describe_timestamp(&e.marker.timestamp, now)
            )
        })
        .collect();
    let choice = Select::new()
        .with_prompt("Which conflict do you want to merge?")
        .items(&items)
        .default(items.len() - 1)
        .interact()
        .context("failed to read selection")?;
    Ok(&conflicts[choice])
}

fn waiting_spinner(tool: &MergeTool) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Waiting for {} to exit...", tool.label()));
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use synconflict_core::tree::MemoryTree;

    fn conflicts() -> Vec<ConflictEntry> {
        let tree = MemoryTree::with_files([
            ("notes.md", ""),
            ("notes.sync-conflict-20230710-123718-ABCDE.md", ""),
            ("notes.sync-conflict-20230711-000000-FGHIJ.md", ""),
        ]);
        group_for_file(&tree, &TreeFile::new("notes.md")).conflicts
    }

    #[test]
    fn test_pick_by_index() {
        let conflicts = conflicts();
        let original = TreeFile::new("notes.md");
        let picked = pick_conflict(&conflicts, &original, Some(2)).unwrap();
        assert_eq!(picked.marker.device_id, "FGHIJ");
        assert!(pick_conflict(&conflicts, &original, Some(0)).is_err());
        assert!(pick_conflict(&conflicts, &original, Some(3)).is_err());
    }

    #[test]
    fn test_pick_named_conflict() {
        let conflicts = conflicts();
        let named = TreeFile::new("notes.sync-conflict-20230710-123718-ABCDE.md");
        let picked = pick_conflict(&conflicts, &named, None).unwrap();
        assert_eq!(picked.file, named);
    }
}
