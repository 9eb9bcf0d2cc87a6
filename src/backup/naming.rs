//! File naming for raw dumps and archives.
//!
//! Names are `{database}_{YYYY-MM-DD_HH-MM-SS}.{ext}`: filesystem-safe,
//! lexically sortable, and fully determined by the database name and the
//! second the cycle started. Two cycles started within the same second map to
//! the same name; the scheduler never runs two cycles at once.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// Extension of the transient, uncompressed dump.
pub const RAW_DUMP_EXTENSION: &str = "sql";

/// Extension of persisted archives. Retention only ever looks at these.
pub const ARCHIVE_EXTENSION: &str = "zip";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

pub fn backup_stem(database: &str, at: DateTime<Utc>) -> String {
    format!("{}_{}", database, at.format(TIMESTAMP_FORMAT))
}

pub fn raw_dump_path(directory: &Path, database: &str, at: DateTime<Utc>) -> PathBuf {
    directory.join(format!(
        "{}.{}",
        backup_stem(database, at),
        RAW_DUMP_EXTENSION
    ))
}

/// Archive destination for a raw dump: same base name, archive extension.
pub fn archive_path_for(source: &Path) -> PathBuf {
    source.with_extension(ARCHIVE_EXTENSION)
}

pub fn is_archive(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
        .unwrap_or(false)
}
