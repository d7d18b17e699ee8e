//! Read-only views of the vault's conflicts: `list`, `show` and `diff`.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDateTime};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use synconflict_core::conflict::marker;
use synconflict_core::conflict::merge_view::unified_diff;
use synconflict_core::conflict::{
    all_groups, group_for_file, ConflictEntry, ConflictGroup, ConflictTimestamp,
};
use synconflict_core::tree::{FileTree, TreeFile};

use crate::style;

/// List every conflict group.
pub fn run_list<T: FileTree + ?Sized>(tree: &T, json: bool) -> Result<()> {
    let index = all_groups(tree);

    if json {
        let out = serde_json::to_string_pretty(&index).context("failed to serialize groups")?;
        println!("{}", out);
        return Ok(());
    }

    if index.is_empty() {
        println!();
        println!("{}", style::success("No conflicts found"));
        println!();
        return Ok(());
    }

    let total: usize = index.values().map(ConflictGroup::len).sum();
    println!();
    println!(
        "{}",
        style::header(&format!(
            "Conflicts ({} file(s), {} conflict(s))",
            index.len(),
            total
        ))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["File", "Conflicts", "Oldest", "Newest"]);

    for group in index.values() {
        let name = if group.original.is_some() {
            group.original_path.clone()
        } else {
            format!("{} {}", group.original_path, style::dim("(missing)"))
        };
        let when = |entry: Option<&ConflictEntry>| {
            entry
                .map(|e| e.marker.timestamp.to_string())
                .unwrap_or_else(|| "—".to_string())
        };
        table.add_row(vec![
            Cell::new(name),
            Cell::new(group.len()),
            Cell::new(when(group.oldest())),
            Cell::new(when(group.newest())),
        ]);
    }

    println!("{}", table);
    println!();
    Ok(())
}

/// Show the group one file belongs to.
pub fn run_show<T: FileTree + ?Sized>(tree: &T, file: &TreeFile, json: bool) -> Result<()> {
    if !tree.exists(file.path()) {
        anyhow::bail!("'{}' does not exist in the vault", file);
    }
    let group = group_for_file(tree, file);

    if json {
        let out = serde_json::to_string_pretty(&group).context("failed to serialize group")?;
        println!("{}", out);
        return Ok(());
    }

    println!();
    println!(
        "{}  {}",
        style::header(&group.original_path),
        style::conflict_badge(group.len())
    );
    if group.original.is_none() {
        println!("{}", style::warn("The original file no longer exists"));
    }
    println!();

    if group.is_empty() {
        return Ok(());
    }

    let now = Local::now().naive_local();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["#", "Conflict file", "Device", "Written"]);

    for (i, entry) in group.conflicts.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(entry.file.name()),
            Cell::new(&entry.marker.device_id),
            Cell::new(describe_timestamp(&entry.marker.timestamp, now)),
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{}",
        style::dim("Merge one with: synconflict merge <file> --index <#>")
    );
    println!();
    Ok(())
}

/// Unified diff of a conflict against its original.
pub async fn run_diff<T: FileTree + ?Sized>(tree: &T, conflict: &TreeFile) -> Result<()> {
    let marker = marker::parse(conflict)
        .ok_or_else(|| anyhow::anyhow!("'{}' is not a conflict file", conflict))?;
    let original_path = marker::original_path(conflict, &marker);

    let theirs = tree
        .read(conflict.path())
        .await
        .with_context(|| format!("failed to read {}", conflict))?;
    let mine = if tree.file(&original_path).is_some() {
        tree.read(&original_path)
            .await
            .with_context(|| format!("failed to read {}", original_path))?
    } else {
        println!("{}", style::warn("The original file no longer exists"));
        String::new()
    };

    let diff = unified_diff(&original_path, conflict.path(), &mine, &theirs);
    if diff.is_empty() {
        println!("{}", style::success("The conflict is identical to the original"));
        return Ok(());
    }
    for line in diff.lines() {
        println!("{}", style::diff_line(line));
    }
    Ok(())
}

/// `yyyy-MM-dd HH:mm:ss (N units ago)`.
pub fn describe_timestamp(timestamp: &ConflictTimestamp, now: NaiveDateTime) -> String {
    match timestamp.known() {
        Some(at) => format!("{} ({})", timestamp, relative_age(at, now)),
        None => style::dim(&timestamp.to_string()),
    }
}

/// Human-friendly distance between `at` and `now`.
pub fn relative_age(at: NaiveDateTime, now: NaiveDateTime) -> String {
    let secs = (now - at).num_seconds();
    if secs < 0 {
        return "in the future".to_string();
    }

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {} ago", unit)
        } else {
            format!("{} {}s ago", n, unit)
        }
    };

    match secs {
        0..=44 => "a few seconds ago".to_string(),
        45..=3_599 => plural((secs / 60).max(1), "minute"),
        3_600..=86_399 => plural(secs / 3_600, "hour"),
        86_400..=2_591_999 => plural(secs / 86_400, "day"),
        2_592_000..=31_535_999 => plural(secs / 2_592_000, "month"),
        _ => plural(secs / 31_536_000, "year"),
    }
}
