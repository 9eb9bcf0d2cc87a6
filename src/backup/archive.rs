//! Archive producer: compresses a raw dump into a single-member zip.

use async_trait::async_trait;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use super::errors::CompressionError;
use super::naming;

/// Deflate level used for archives.
pub const MAX_COMPRESSION_LEVEL: i64 = 9;

/// Suffix of an archive that is still being written.
const PARTIAL_SUFFIX: &str = "partial";

/// Compresses a raw dump file and returns the path of the finished archive.
///
/// Implementations only return `Ok` once the archive is fully written and
/// closed. The destination is derived from the source path, so a retry for
/// the same dump reuses the same name.
#[async_trait]
pub trait ArchiveProducer: Send + Sync {
    async fn compress(&self, source: &Path) -> Result<PathBuf, CompressionError>;
}

/// Zip/Deflate archive producer.
#[derive(Debug, Clone)]
pub struct ZipArchiveProducer {
    compression_level: i64,
}

impl Default for ZipArchiveProducer {
    fn default() -> Self {
        Self {
            compression_level: MAX_COMPRESSION_LEVEL,
        }
    }
}

#[async_trait]
impl ArchiveProducer for ZipArchiveProducer {
    async fn compress(&self, source: &Path) -> Result<PathBuf, CompressionError> {
        let source = source.to_path_buf();
        let destination = naming::archive_path_for(&source);
        let level = self.compression_level;

        let task_destination = destination.clone();
        tokio::task::spawn_blocking(move || {
            compress_to_zip(&source, &task_destination, level)
        })
        .await
        .map_err(|e| CompressionError::TaskFailed(e.to_string()))??;

        Ok(destination)
    }
}

/// Writes `source` into `<destination>.partial`, syncs it, then renames it onto
/// `destination`. The partial file is removed on any error.
fn compress_to_zip(source: &Path, destination: &Path, level: i64) -> Result<(), CompressionError> {
    let member_name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CompressionError::InvalidSource(source.to_path_buf()))?;

    let mut input = File::open(source).map_err(|e| CompressionError::SourceUnreadable {
        path: source.to_path_buf(),
        source: e,
    })?;

    let partial = partial_path(destination);
    let result = write_zip(&mut input, member_name, &partial, level).and_then(|()| {
        std::fs::rename(&partial, destination).map_err(|e| {
            CompressionError::DestinationUnwritable {
                path: destination.to_path_buf(),
                source: e,
            }
        })
    });

    if result.is_err() {
        let _ = std::fs::remove_file(&partial);
    }
    result
}

fn write_zip(
    input: &mut File,
    member_name: &str,
    partial: &Path,
    level: i64,
) -> Result<(), CompressionError> {
    let unwritable = |e: std::io::Error| CompressionError::DestinationUnwritable {
        path: partial.to_path_buf(),
        source: e,
    };

    let output = File::create(partial).map_err(unwritable)?;
    let mut zip = ZipWriter::new(BufWriter::new(output));

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level))
        .large_file(true);
    zip.start_file(member_name, options)?;
    std::io::copy(input, &mut zip).map_err(CompressionError::Stream)?;

    let mut writer = zip.finish()?;
    writer.flush().map_err(unwritable)?;
    let file = writer.into_inner().map_err(|e| unwritable(e.into_error()))?;
    file.sync_all().map_err(unwritable)?;
    Ok(())
}

fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
