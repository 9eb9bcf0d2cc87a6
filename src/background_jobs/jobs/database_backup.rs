//! Database backup background job.
//!
//! One run produces a new archive and then prunes expired ones. The sweep
//! runs even when the backup cycle failed.

use crate::background_jobs::{
    BackgroundJob, HookEvent, JobContext, JobError, JobSchedule, ShutdownBehavior,
};
use crate::backup::{BackupCycleResult, BackupOrchestrator, RetentionManager};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

pub struct DatabaseBackupJob {
    orchestrator: Arc<BackupOrchestrator>,
    retention: Arc<RetentionManager>,
    run_on_startup: bool,
}

impl DatabaseBackupJob {
    pub fn new(
        orchestrator: Arc<BackupOrchestrator>,
        retention: Arc<RetentionManager>,
        run_on_startup: bool,
    ) -> Self {
        Self {
            orchestrator,
            retention,
            run_on_startup,
        }
    }
}

#[async_trait]
impl BackgroundJob for DatabaseBackupJob {
    fn id(&self) -> &'static str {
        "database_backup"
    }

    fn name(&self) -> &'static str {
        "Database Backup"
    }

    fn description(&self) -> &'static str {
        "Dump, compress and deliver the database, then delete expired archives"
    }

    fn schedule(&self) -> JobSchedule {
        let hooks = if self.run_on_startup {
            vec![HookEvent::OnStartup]
        } else {
            Vec::new()
        };
        JobSchedule::Combined {
            cron: Some(self.orchestrator.config().schedule.clone()),
            hooks,
        }
    }

    fn shutdown_behavior(&self) -> ShutdownBehavior {
        // A killed dump or compression leaves nothing useful behind.
        ShutdownBehavior::WaitForCompletion
    }

    async fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cycle = self.orchestrator.run_cycle().await;

        let config = self.orchestrator.config();
        info!(
            "Applying {}-day retention to {:?}",
            config.retention_days, config.backup_dir
        );
        let sweep = self
            .retention
            .sweep(&config.backup_dir, config.retention_window())
            .await;

        if let Err(e) = &sweep {
            error!("Retention sweep failed: {}", e);
        }

        match (cycle, sweep) {
            (BackupCycleResult::Failed { error }, _) => {
                Err(JobError::ExecutionFailed(format!("backup failed: {}", error)))
            }
            (BackupCycleResult::Success { .. }, Err(e)) => Err(JobError::ExecutionFailed(format!(
                "retention sweep failed: {}",
                e
            ))),
            (BackupCycleResult::Success { .. }, Ok(_)) => Ok(()),
        }
    }
}
