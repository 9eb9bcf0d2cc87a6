use chrono::{DateTime, Utc};
use std::fmt;
use std::path::{Path, PathBuf};

use super::errors::{BackupError, FileDeletionError};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// One compressed backup on persistent storage.
///
/// The creation timestamp is the file's modification time, it is never stored
/// separately.
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveFile {
    pub path: PathBuf,
    pub database: String,
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
}

impl ArchiveFile {
    /// Build an `ArchiveFile` from what the filesystem reports for `path`.
    pub async fn inspect(path: &Path, database: &str) -> std::io::Result<Self> {
        let metadata = tokio::fs::metadata(path).await?;
        Self::from_metadata(path, database, &metadata)
    }

    pub(crate) fn from_metadata(
        path: &Path,
        database: &str,
        metadata: &std::fs::Metadata,
    ) -> std::io::Result<Self> {
        Ok(Self {
            path: path.to_path_buf(),
            database: database.to_string(),
            created_at: DateTime::<Utc>::from(metadata.modified()?),
            size_bytes: metadata.len(),
        })
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Size in megabytes, rounded to two decimals, e.g. `"0.19"`.
    pub fn size_mb(&self) -> String {
        format!("{:.2}", self.size_bytes as f64 / BYTES_PER_MB)
    }

    /// Size in the most appropriate binary unit, for log lines.
    pub fn human_size(&self) -> String {
        let adjusted = byte_unit::Byte::from_u64(self.size_bytes)
            .get_appropriate_unit(byte_unit::UnitType::Binary);
        format!("{adjusted:.2}")
    }
}

/// Steps of a backup cycle, used to label log lines and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStage {
    Dump,
    Compress,
    Cleanup,
    Notify,
}

impl fmt::Display for BackupStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStage::Dump => write!(f, "dump"),
            BackupStage::Compress => write!(f, "compress"),
            BackupStage::Cleanup => write!(f, "cleanup"),
            BackupStage::Notify => write!(f, "notify"),
        }
    }
}

/// Outcome of one orchestrator run. Only used for logging and reporting.
#[derive(Debug)]
pub enum BackupCycleResult {
    /// The archive exists. `notified` is false when delivery failed, which
    /// makes the cycle a partial success rather than a failure.
    Success { archive: ArchiveFile, notified: bool },
    Failed { error: BackupError },
}

impl BackupCycleResult {
    pub fn is_success(&self) -> bool {
        matches!(self, BackupCycleResult::Success { .. })
    }

    pub fn archive(&self) -> Option<&ArchiveFile> {
        match self {
            BackupCycleResult::Success { archive, .. } => Some(archive),
            BackupCycleResult::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&BackupError> {
        match self {
            BackupCycleResult::Success { .. } => None,
            BackupCycleResult::Failed { error } => Some(error),
        }
    }

    /// Label used for metrics.
    pub fn status_label(&self) -> &'static str {
        match self {
            BackupCycleResult::Success { notified: true, .. } => "success",
            BackupCycleResult::Success { notified: false, .. } => "partial",
            BackupCycleResult::Failed { error } => match error.stage() {
                BackupStage::Dump => "dump_failed",
                _ => "compression_failed",
            },
        }
    }
}

/// Why an archive was removed by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionReason {
    RetentionExpired,
}

impl fmt::Display for DeletionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletionReason::RetentionExpired => write!(f, "retention expired"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeletedArchive {
    pub archive: ArchiveFile,
    pub reason: DeletionReason,
    pub notified: bool,
}

/// Archives removed during one sweep, plus the ones that could not be.
#[derive(Debug, Default)]
pub struct RetentionSweepResult {
    pub deleted: Vec<DeletedArchive>,
    pub failures: Vec<FileDeletionError>,
}

impl RetentionSweepResult {
    pub fn deleted_paths(&self) -> Vec<&Path> {
        self.deleted.iter().map(|d| d.archive.path.as_path()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty() && self.failures.is_empty()
    }
}
