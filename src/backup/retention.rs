//! Retention manager: deletes archives older than the retention window.

use async_trait::async_trait;
use chrono::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::errors::{FileDeletionError, SweepError};
use super::models::{ArchiveFile, DeletedArchive, DeletionReason, RetentionSweepResult};
use super::naming;
use super::notifier::{notify_best_effort, NotificationEvent, Notifier};
use crate::server::metrics;

/// Sweeps an archive directory and removes expired archives.
///
/// Only files with the archive extension are considered; anything else in
/// the directory (stray raw dumps, partial archives) is left alone. Each
/// deletion happens before its notification, so a failed notification can
/// never keep an expired archive on disk.
pub struct RetentionManager {
    database: String,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    remover: Arc<dyn ArchiveRemover>,
}

/// Removes one expired archive from storage.
#[async_trait]
pub(crate) trait ArchiveRemover: Send + Sync {
    async fn remove(&self, path: &Path) -> std::io::Result<()>;
}

struct FsArchiveRemover;

#[async_trait]
impl ArchiveRemover for FsArchiveRemover {
    async fn remove(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::remove_file(path).await
    }
}

impl RetentionManager {
    pub fn new(database: String, notifier: Arc<dyn Notifier>, clock: Arc<dyn Clock>) -> Self {
        Self {
            database,
            notifier,
            clock,
            remover: Arc::new(FsArchiveRemover),
        }
    }

    #[cfg(test)]
    pub(crate) fn with_remover(mut self, remover: Arc<dyn ArchiveRemover>) -> Self {
        self.remover = remover;
        self
    }

    fn record_failure(result: &mut RetentionSweepResult, path: PathBuf, source: std::io::Error) {
        metrics::record_retention_delete_error();
        result.failures.push(FileDeletionError { path, source });
    }

    /// Delete every archive in `directory` last modified strictly before
    /// `now - window`.
    ///
    /// Fails only when the directory itself cannot be listed. A file that
    /// cannot be deleted is recorded in the result and the sweep moves on.
    pub async fn sweep(
        &self,
        directory: &Path,
        window: Duration,
    ) -> Result<RetentionSweepResult, SweepError> {
        let cutoff = self.clock.now() - window;
        let candidates = match list_archives(directory).await {
            Ok(candidates) => candidates,
            Err(source) => {
                metrics::record_retention_sweep("failed");
                return Err(SweepError::ListDirectory {
                    path: directory.to_path_buf(),
                    source,
                });
            }
        };

        debug!(
            "Retention sweep of {:?}: {} archives, cutoff {}",
            directory,
            candidates.len(),
            cutoff
        );

        let mut result = RetentionSweepResult::default();
        for path in candidates {
            let metadata = match tokio::fs::metadata(&path).await {
                Ok(m) if m.is_file() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Failed to read metadata for {:?}: {}", path, e);
                    Self::record_failure(&mut result, path, e);
                    continue;
                }
            };

            let archive = match ArchiveFile::from_metadata(&path, &self.database, &metadata) {
                Ok(archive) => archive,
                Err(e) => {
                    warn!("Failed to get modified time for {:?}: {}", path, e);
                    Self::record_failure(&mut result, path, e);
                    continue;
                }
            };

            if archive.created_at >= cutoff {
                continue;
            }

            if let Err(source) = self.remover.remove(&path).await {
                warn!("Failed to delete expired backup {:?}: {}", path, source);
                Self::record_failure(&mut result, path, source);
                continue;
            }

            info!(
                "Deleted old backup {} (modified {}, {})",
                archive.file_name(),
                archive.created_at,
                DeletionReason::RetentionExpired
            );
            metrics::record_retention_deleted();

            let notified = notify_best_effort(
                self.notifier.as_ref(),
                &archive,
                NotificationEvent::RetentionExpired,
            )
            .await;

            result.deleted.push(DeletedArchive {
                archive,
                reason: DeletionReason::RetentionExpired,
                notified,
            });
        }

        if result.is_empty() {
            info!("No backups past the retention window in {:?}", directory);
        } else {
            info!(
                "Retention sweep complete: deleted={}, errors={}",
                result.deleted.len(),
                result.failures.len()
            );
        }
        metrics::record_retention_sweep("success");

        Ok(result)
    }
}

/// Archive-typed entries of `directory`. Listing errors abort the sweep.
async fn list_archives(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(directory).await?;
    let mut archives = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if naming::is_archive(&path) {
            archives.push(path);
        }
    }
    Ok(archives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::clock::FixedClock;
    use crate::backup::errors::NotificationError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use std::time::SystemTime;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        events: Mutex<Vec<(String, NotificationEvent, bool)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            archive: &ArchiveFile,
            event: NotificationEvent,
        ) -> Result<(), NotificationError> {
            self.events.lock().unwrap().push((
                archive.file_name(),
                event,
                archive.path.exists(),
            ));
            if self.fail {
                Err(NotificationError::Rejected {
                    status: 503,
                    body: "unavailable".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn touch(dir: &Path, name: &str, age: Duration) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"archive bytes").unwrap();
        let modified = SystemTime::now() - age.to_std().unwrap();
        std::fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(modified)
            .unwrap();
        path
    }

    fn manager(notifier: Arc<RecordingNotifier>) -> RetentionManager {
        RetentionManager::new(
            "shop".to_string(),
            notifier,
            Arc::new(FixedClock::new(Utc::now())),
        )
    }

    #[tokio::test]
    async fn test_deletes_only_archives_past_window() {
        let temp_dir = TempDir::new().unwrap();
        let old = touch(temp_dir.path(), "shop_old.zip", Duration::days(5));
        let young = touch(temp_dir.path(), "shop_young.zip", Duration::days(1));
        let notifier = Arc::new(RecordingNotifier::default());

        let result = manager(notifier.clone())
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert_eq!(result.deleted_paths(), vec![old.as_path()]);
        assert_eq!(result.deleted[0].reason, DeletionReason::RetentionExpired);
        assert!(result.deleted[0].notified);
        assert!(!old.exists());
        assert!(young.exists());

        // Deleted first, then reported.
        let events = notifier.events.lock().unwrap();
        assert_eq!(
            *events,
            vec![(
                "shop_old.zip".to_string(),
                NotificationEvent::RetentionExpired,
                false
            )]
        );
    }

    #[tokio::test]
    async fn test_ignores_non_archive_files() {
        let temp_dir = TempDir::new().unwrap();
        let stray_dump = touch(temp_dir.path(), "shop_old.sql", Duration::days(30));
        let partial = touch(temp_dir.path(), "shop_old.zip.partial", Duration::days(30));
        let notifier = Arc::new(RecordingNotifier::default());

        let result = manager(notifier.clone())
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert!(result.is_empty());
        assert!(stray_dump.exists());
        assert!(partial.exists());
        assert!(notifier.events.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "a.zip", Duration::days(10));
        touch(temp_dir.path(), "b.zip", Duration::days(6));
        let manager = manager(Arc::new(RecordingNotifier::default()));

        let first = manager
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();
        let second = manager
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert_eq!(first.deleted.len(), 2);
        assert!(second.deleted.is_empty());
    }

    #[tokio::test]
    async fn test_notifier_failure_does_not_change_outcome() {
        let temp_dir = TempDir::new().unwrap();
        let old = touch(temp_dir.path(), "shop_old.zip", Duration::days(5));
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });

        let result = manager(notifier.clone())
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert_eq!(result.deleted.len(), 1);
        assert!(!result.deleted[0].notified);
        assert!(!old.exists());
        assert_eq!(notifier.events.lock().unwrap().len(), 1);
    }

    /// Refuses to remove one file name and deletes everything else.
    struct RefusingRemover {
        refused: &'static str,
    }

    #[async_trait]
    impl ArchiveRemover for RefusingRemover {
        async fn remove(&self, path: &Path) -> std::io::Result<()> {
            if path.file_name().is_some_and(|n| n == self.refused) {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "read-only mount",
                ));
            }
            tokio::fs::remove_file(path).await
        }
    }

    #[tokio::test]
    async fn test_failed_deletion_is_recorded_and_sweep_continues() {
        let temp_dir = TempDir::new().unwrap();
        let stuck = touch(temp_dir.path(), "shop_stuck.zip", Duration::days(9));
        let removable = touch(temp_dir.path(), "shop_removable.zip", Duration::days(8));
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = manager(notifier.clone()).with_remover(Arc::new(RefusingRemover {
            refused: "shop_stuck.zip",
        }));

        let result = manager
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, stuck);
        assert_eq!(
            result.failures[0].source.kind(),
            std::io::ErrorKind::PermissionDenied
        );
        assert_eq!(result.deleted_paths(), vec![removable.as_path()]);
        assert!(stuck.exists());
        assert!(!removable.exists());

        // Only the archive that is really gone gets reported.
        let events = notifier.events.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "shop_removable.zip");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreadable_metadata_is_recorded() {
        let temp_dir = TempDir::new().unwrap();
        let dangling = temp_dir.path().join("shop_dangling.zip");
        std::os::unix::fs::symlink(temp_dir.path().join("missing-target"), &dangling).unwrap();
        let old = touch(temp_dir.path(), "shop_old.zip", Duration::days(5));

        let result = manager(Arc::new(RecordingNotifier::default()))
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();

        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].path, dangling);
        assert_eq!(result.deleted_paths(), vec![old.as_path()]);
    }

    #[tokio::test]
    async fn test_missing_directory_is_sweep_error() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");

        let err = manager(Arc::new(RecordingNotifier::default()))
            .sweep(&missing, Duration::days(4))
            .await
            .unwrap_err();

        assert!(matches!(err, SweepError::ListDirectory { .. }));
    }

    #[tokio::test]
    async fn test_uses_injected_clock() {
        let temp_dir = TempDir::new().unwrap();
        let archive = touch(temp_dir.path(), "shop.zip", Duration::days(1));
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let manager = RetentionManager::new(
            "shop".to_string(),
            Arc::new(RecordingNotifier::default()),
            clock.clone(),
        );

        let result = manager
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();
        assert!(result.deleted.is_empty());

        clock.advance(Duration::days(4));
        let result = manager
            .sweep(temp_dir.path(), Duration::days(4))
            .await
            .unwrap();
        assert_eq!(result.deleted_paths(), vec![archive.as_path()]);
    }
}
