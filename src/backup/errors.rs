use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::models::BackupStage;

/// Errors produced while running the external dump tool.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("Cannot create dump file {path:?}: {source}")]
    CreateOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn dump tool {tool:?}: {source}")]
    Spawn {
        tool: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for dump tool: {0}")]
    Wait(#[source] std::io::Error),

    #[error("Dump tool exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("Dump tool did not finish within {0:?}")]
    Timeout(Duration),
}

/// Errors produced while compressing a raw dump into an archive.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("Invalid dump file path: {0:?}")]
    InvalidSource(PathBuf),

    #[error("Cannot read dump file {path:?}: {source}")]
    SourceUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write archive {path:?}: {source}")]
    DestinationUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Compression stream error: {0}")]
    Stream(#[source] std::io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("Compression task failed: {0}")]
    TaskFailed(String),
}

/// Errors produced while delivering a notification.
///
/// These never abort a cycle or a sweep, see [`super::notify_best_effort`].
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Cannot open attachment {path:?}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook rejected the payload with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Failed to encode payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// The archive directory itself could not be listed.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("Cannot list archive directory {path:?}: {source}")]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single expired archive could not be inspected or removed. The sweep carries on.
#[derive(Debug, Error)]
#[error("Failed to delete {path:?}: {source}")]
pub struct FileDeletionError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// First error that aborted a backup cycle.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("Dump failed: {0}")]
    Dump(#[from] DumpError),

    #[error("Compression failed: {0}")]
    Compression(#[from] CompressionError),

    #[error("Cannot inspect archive {path:?}: {source}")]
    Inspect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BackupError {
    /// Stage of the cycle at which the error happened.
    pub fn stage(&self) -> BackupStage {
        match self {
            BackupError::Dump(_) => BackupStage::Dump,
            BackupError::Compression(_) | BackupError::Inspect { .. } => BackupStage::Compress,
        }
    }
}
