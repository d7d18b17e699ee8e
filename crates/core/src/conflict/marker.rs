//! Conflict filename parsing.
//!
//! Syncthing keeps the losing side of a concurrent edit next to the original
//! under a name of the form
//!
//! ```text
//! <stem>.sync-conflict-<YYYYMMDD>-<HHMMSS>-<device><.ext>
//! ```
//!
//! The pattern is matched against the file's basename (extension already
//! stripped). Parsing is pure and never fails: a name that does not match is
//! simply not a conflict.

use std::fmt;
use std::sync::OnceLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex_lite::Regex;
use serde::Serialize;

use crate::tree::{join, TreeFile};

fn conflict_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<stem>.*)\.sync-conflict-(?P<date>\d{8})-(?P<time>\d{6})-(?P<device>.+)$",
        )
        .expect("conflict filename pattern is valid")
    })
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// When the conflicting version was written, as encoded in its name.
///
/// The sync agent writes local time without a zone. Digits that are present
/// but do not form a real calendar date (month 13, hour 25, ...) are kept as
/// [`ConflictTimestamp::Unknown`] instead of being replaced by the current
/// time, so they cannot silently reorder a group.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
pub enum ConflictTimestamp {
    Known(NaiveDateTime),
    Unknown { raw: String },
}

impl ConflictTimestamp {
    fn from_digits(date: &str, time: &str) -> Self {
        match parse_digits(date, time) {
            Some(at) => Self::Known(at),
            None => Self::Unknown {
                raw: format!("{}-{}", date, time),
            },
        }
    }

    pub fn known(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Known(at) => Some(*at),
            Self::Unknown { .. } => None,
        }
    }

    /// Sort key: known timestamps ascending, unknown ones after all of them.
    pub(crate) fn sort_key(&self) -> (bool, Option<NaiveDateTime>) {
        (self.known().is_none(), self.known())
    }
}

/// `YYYYMMDD` + `HHMMSS` into a date-time, if the values are in range.
fn parse_digits(date: &str, time: &str) -> Option<NaiveDateTime> {
    let field = |s: &str, range: std::ops::Range<usize>| s.get(range)?.parse::<u32>().ok();
    let year = date.get(0..4)?.parse::<i32>().ok()?;
    NaiveDate::from_ymd_opt(year, field(date, 4..6)?, field(date, 6..8)?)?.and_hms_opt(
        field(time, 0..2)?,
        field(time, 2..4)?,
        field(time, 4..6)?,
    )
}

impl fmt::Display for ConflictTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            Self::Unknown { raw } => write!(f, "unknown time ({})", raw),
        }
    }
}

/// Structured form of a conflict filename.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictMarker {
    /// Name of the file this conflict belongs to, extension included.
    pub original_name: String,
    pub timestamp: ConflictTimestamp,
    /// Opaque identifier of the device that produced the conflict.
    pub device_id: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a basename/extension pair. Returns `None` when the name does not
/// carry a conflict marker.
///
/// The stem is matched greedily, so only the last `.sync-conflict-` suffix
/// is removed.
pub fn parse_name(basename: &str, extension: &str) -> Option<ConflictMarker> {
    let caps = conflict_regex().captures(basename)?;
    let stem = caps.name("stem").map_or("", |m| m.as_str());
    let date = caps.name("date").map_or("", |m| m.as_str());
    let time = caps.name("time").map_or("", |m| m.as_str());
    let device = caps.name("device").map_or("", |m| m.as_str());

    let original_name = if extension.is_empty() {
        stem.to_string()
    } else {
        format!("{}.{}", stem, extension)
    };

    Some(ConflictMarker {
        original_name,
        timestamp: ConflictTimestamp::from_digits(date, time),
        device_id: device.to_string(),
    })
}

/// Parse the name of a file in the tree.
///
/// A conflict copy of a file without an extension ends in the device token,
/// which the usual basename/extension split would mistake for an extension.
/// When the "extension" is itself a complete conflict suffix, the name is
/// parsed as a whole with an empty extension, so the last suffix is the one
/// removed.
pub fn parse(file: &TreeFile) -> Option<ConflictMarker> {
    let extension = file.extension();
    if extension.starts_with("sync-conflict-")
        && conflict_regex().is_match(&format!(".{}", extension))
    {
        return parse_name(file.name(), "");
    }
    parse_name(file.basename(), extension)
}

pub fn is_conflict(file: &TreeFile) -> bool {
    parse(file).is_some()
}

/// Path of the original a conflict belongs to: the conflict's own directory
/// joined with the reconstructed name.
pub fn original_path(file: &TreeFile, marker: &ConflictMarker) -> String {
    join(file.parent(), &marker.original_name)
}

/// Identity key of the conflict group `file` belongs to.
///
/// For a conflict file this is its original's path; every other file is its
/// own original.
pub fn latest_path(file: &TreeFile) -> String {
    match parse(file) {
        Some(marker) => original_path(file, &marker),
        None => file.path().to_string(),
    }
}
