//! Backup orchestrator: runs one dump -> compress -> cleanup -> notify cycle.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use super::archive::ArchiveProducer;
use super::clock::Clock;
use super::dump::DumpProducer;
use super::errors::BackupError;
use super::models::{ArchiveFile, BackupCycleResult, BackupStage};
use super::naming;
use super::notifier::{notify_best_effort, NotificationEvent, Notifier};
use crate::config::BackupJobConfig;
use crate::server::metrics;

/// Sequences a single backup cycle.
///
/// The orchestrator owns the raw dump for the whole cycle and removes it on
/// every exit path; only the archive outlives a cycle. Nothing is retried: a
/// failed cycle waits for the next trigger.
pub struct BackupOrchestrator {
    config: Arc<BackupJobConfig>,
    dump_producer: Arc<dyn DumpProducer>,
    archive_producer: Arc<dyn ArchiveProducer>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl BackupOrchestrator {
    pub fn new(
        config: Arc<BackupJobConfig>,
        dump_producer: Arc<dyn DumpProducer>,
        archive_producer: Arc<dyn ArchiveProducer>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            dump_producer,
            archive_producer,
            notifier,
            clock,
        }
    }

    pub fn config(&self) -> &BackupJobConfig {
        &self.config
    }

    /// Run one full cycle and report its outcome.
    pub async fn run_cycle(&self) -> BackupCycleResult {
        let start_time = Instant::now();
        let database = &self.config.database.name;
        let raw_dump = naming::raw_dump_path(&self.config.backup_dir, database, self.clock.now());

        info!("Starting backup of database {} into {:?}", database, raw_dump);

        let produced = self.produce_archive(&raw_dump).await;
        self.discard_raw_dump(&raw_dump).await;

        let result = match produced {
            Ok(archive) => {
                let notified = notify_best_effort(
                    self.notifier.as_ref(),
                    &archive,
                    NotificationEvent::BackupCreated,
                )
                .await;

                if notified {
                    info!(
                        "Backup created and sent: {} ({})",
                        archive.file_name(),
                        archive.human_size()
                    );
                } else {
                    warn!(
                        "Backup created but not delivered: {} ({}), stage={}",
                        archive.file_name(),
                        archive.human_size(),
                        BackupStage::Notify
                    );
                }
                metrics::set_last_archive_size(archive.size_bytes);
                BackupCycleResult::Success { archive, notified }
            }
            Err(error) => {
                error!(
                    "Backup of database {} failed at stage {} ({:?}): {}",
                    database,
                    error.stage(),
                    raw_dump.file_name().unwrap_or_default(),
                    error
                );
                BackupCycleResult::Failed { error }
            }
        };

        metrics::record_backup_cycle(result.status_label(), start_time.elapsed());
        result
    }

    async fn produce_archive(&self, raw_dump: &Path) -> Result<ArchiveFile, BackupError> {
        self.dump_producer
            .dump(&self.config.database, raw_dump)
            .await?;
        debug!("Dump written to {:?}", raw_dump);

        let archive_path = self.archive_producer.compress(raw_dump).await?;

        ArchiveFile::inspect(&archive_path, &self.config.database.name)
            .await
            .map_err(|source| BackupError::Inspect {
                path: archive_path,
                source,
            })
    }

    /// Best-effort removal of the raw dump. A dump that was never created is
    /// not an error.
    async fn discard_raw_dump(&self, raw_dump: &Path) {
        match tokio::fs::remove_file(raw_dump).await {
            Ok(()) => debug!("Removed raw dump {:?}", raw_dump),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to remove raw dump {:?}, stage={}: {}",
                raw_dump,
                BackupStage::Cleanup,
                e
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::archive::ZipArchiveProducer;
    use crate::backup::clock::FixedClock;
    use crate::backup::errors::{CompressionError, DumpError, NotificationError};
    use crate::config::{DatabaseSettings, NotificationSettings};
    use crate::background_jobs::CronSchedule;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Writes roughly `size` bytes of SQL, optionally failing afterwards.
    struct FakeDumpProducer {
        size: usize,
        fail: bool,
    }

    #[async_trait]
    impl DumpProducer for FakeDumpProducer {
        async fn dump(
            &self,
            database: &DatabaseSettings,
            destination: &Path,
        ) -> Result<(), DumpError> {
            let line = format!("INSERT INTO `{}` VALUES (1,'abc');\n", database.name);
            let content = line.repeat(self.size / line.len() + 1);
            std::fs::write(destination, content).unwrap();
            if self.fail {
                Err(DumpError::NonZeroExit {
                    status: "exit status: 2".to_string(),
                    stderr: "Access denied".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    struct FailingArchiveProducer;

    #[async_trait]
    impl ArchiveProducer for FailingArchiveProducer {
        async fn compress(&self, source: &Path) -> Result<PathBuf, CompressionError> {
            Err(CompressionError::Stream(std::io::Error::other(format!(
                "disk full while compressing {:?}",
                source
            ))))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        calls: AtomicUsize,
        seen: Mutex<Vec<(ArchiveFile, NotificationEvent)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            archive: &ArchiveFile,
            event: NotificationEvent,
        ) -> Result<(), NotificationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push((archive.clone(), event));
            if self.fail {
                Err(NotificationError::Rejected {
                    status: 429,
                    body: "rate limited".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn job_config(dir: &Path) -> Arc<BackupJobConfig> {
        Arc::new(BackupJobConfig {
            database: DatabaseSettings {
                user: "backup".to_string(),
                password: "secret".to_string(),
                name: "shop".to_string(),
                dump_path: PathBuf::from("/usr/bin/mysqldump"),
            },
            backup_dir: dir.to_path_buf(),
            retention_days: 4,
            notification: NotificationSettings {
                webhook_url: "http://127.0.0.1:9/webhook".to_string(),
                bot_name: "bot".to_string(),
            },
            schedule: "0 */3 * * *".parse::<CronSchedule>().unwrap(),
        })
    }

    fn orchestrator(
        dir: &Path,
        dump: FakeDumpProducer,
        archive: Arc<dyn ArchiveProducer>,
        notifier: Arc<RecordingNotifier>,
    ) -> BackupOrchestrator {
        BackupOrchestrator::new(
            job_config(dir),
            Arc::new(dump),
            archive,
            notifier,
            Arc::new(FixedClock::new(
                Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap(),
            )),
        )
    }

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_successful_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(
            temp_dir.path(),
            FakeDumpProducer {
                size: 200 * 1024,
                fail: false,
            },
            Arc::new(ZipArchiveProducer::default()),
            notifier.clone(),
        );

        let result = orchestrator.run_cycle().await;

        let archive = result.archive().expect("cycle should succeed").clone();
        assert!(matches!(result, BackupCycleResult::Success { notified: true, .. }));
        assert_eq!(archive.file_name(), "shop_2024-05-01_10-00-00.zip");
        assert_eq!(archive.database, "shop");
        assert!(archive.size_bytes > 0);
        assert!(archive.size_bytes < 200 * 1024);
        assert_eq!(dir_entries(temp_dir.path()), vec!["shop_2024-05-01_10-00-00.zip"]);

        let seen = notifier.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, archive);
        assert_eq!(seen[0].1, NotificationEvent::BackupCreated);
    }

    #[tokio::test]
    async fn test_dump_failure_aborts_cycle() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(
            temp_dir.path(),
            FakeDumpProducer {
                size: 1024,
                fail: true,
            },
            Arc::new(ZipArchiveProducer::default()),
            notifier.clone(),
        );

        let result = orchestrator.run_cycle().await;

        assert!(matches!(
            result.error(),
            Some(BackupError::Dump(DumpError::NonZeroExit { .. }))
        ));
        assert!(dir_entries(temp_dir.path()).is_empty());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_compression_failure_still_removes_raw_dump() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let orchestrator = orchestrator(
            temp_dir.path(),
            FakeDumpProducer {
                size: 1024,
                fail: false,
            },
            Arc::new(FailingArchiveProducer),
            notifier.clone(),
        );

        let result = orchestrator.run_cycle().await;

        let error = result.error().expect("cycle should fail");
        assert_eq!(error.stage(), BackupStage::Compress);
        assert!(dir_entries(temp_dir.path()).is_empty());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_notifier_failure_is_partial_success() {
        let temp_dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..Default::default()
        });
        let orchestrator = orchestrator(
            temp_dir.path(),
            FakeDumpProducer {
                size: 4096,
                fail: false,
            },
            Arc::new(ZipArchiveProducer::default()),
            notifier.clone(),
        );

        let result = orchestrator.run_cycle().await;

        assert!(result.is_success());
        assert!(matches!(result, BackupCycleResult::Success { notified: false, .. }));
        assert_eq!(result.status_label(), "partial");
        assert!(result.archive().unwrap().path.exists());
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
    }
}
