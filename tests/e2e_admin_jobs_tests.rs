//! Admin API driving the real backup job through the scheduler.

mod common;

use common::{dir_entries, job_config, FakeDumpProducer, WebhookServer};
use pezzottify_backup::background_jobs::jobs::DatabaseBackupJob;
use pezzottify_backup::background_jobs::{create_scheduler, SchedulerHandle};
use pezzottify_backup::backup::{
    BackupOrchestrator, Clock, DiscordWebhookNotifier, Notifier, RetentionManager, SystemClock,
    ZipArchiveProducer,
};
use pezzottify_backup::server::make_app;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

struct TestEnv {
    base_url: String,
    handle: SchedulerHandle,
    shutdown_token: CancellationToken,
}

impl Drop for TestEnv {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

async fn start(backup_dir: &Path, webhook: &WebhookServer, run_on_startup: bool) -> TestEnv {
    let config = job_config(backup_dir, &webhook.url, "mysqldump");
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn Notifier> = Arc::new(
        DiscordWebhookNotifier::new(
            webhook.url.clone(),
            "Backup Bot".to_string(),
            Duration::from_secs(10),
        )
        .unwrap(),
    );
    let orchestrator = Arc::new(BackupOrchestrator::new(
        config,
        Arc::new(FakeDumpProducer { size: 8 * 1024 }),
        Arc::new(ZipArchiveProducer::default()),
        notifier.clone(),
        clock.clone(),
    ));
    let retention = Arc::new(RetentionManager::new("shop".to_string(), notifier, clock));

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, handle) = create_scheduler(shutdown_token.clone());
    scheduler
        .register_job(Arc::new(DatabaseBackupJob::new(
            orchestrator,
            retention,
            run_on_startup,
        )))
        .await;
    tokio::spawn(async move { scheduler.run().await });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = make_app(handle.clone());
    let token = shutdown_token.clone();
    tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
            .unwrap();
    });

    TestEnv {
        base_url: format!("http://{}", addr),
        handle,
        shutdown_token,
    }
}

async fn wait_for_completed_run(handle: &SchedulerHandle) {
    for _ in 0..200 {
        if let Some(info) = handle.get_job("database_backup").await {
            if !info.is_running && info.last_run.is_some() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("database_backup did not finish in time");
}

#[tokio::test]
async fn test_manual_trigger_runs_backup() {
    let webhook = WebhookServer::spawn().await;
    let temp_dir = TempDir::new().unwrap();
    let env = start(temp_dir.path(), &webhook, false).await;
    let client = reqwest::Client::new();

    let jobs: serde_json::Value = client
        .get(format!("{}/v1/jobs", env.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(jobs[0]["id"], "database_backup");
    assert_eq!(jobs[0]["schedule"]["cron"], "0 */3 * * *");
    assert!(jobs[0]["last_run"].is_null());

    let response = client
        .post(format!("{}/v1/jobs/database_backup/trigger", env.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);

    wait_for_completed_run(&env.handle).await;

    let job: serde_json::Value = client
        .get(format!("{}/v1/jobs/database_backup", env.base_url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(job["last_run"]["status"], "completed");
    assert_eq!(job["last_run"]["triggered_by"], "manual");

    let entries = dir_entries(temp_dir.path());
    assert_eq!(entries.len(), 1);
    assert!(entries[0].ends_with(".zip"));
    let messages = webhook.wait_for_messages(1).await;
    assert_eq!(messages[0].file_name.as_deref(), Some(entries[0].as_str()));
}

#[tokio::test]
async fn test_startup_run_and_unknown_job() {
    let webhook = WebhookServer::spawn().await;
    let temp_dir = TempDir::new().unwrap();
    let env = start(temp_dir.path(), &webhook, true).await;

    wait_for_completed_run(&env.handle).await;

    let info = env.handle.get_job("database_backup").await.unwrap();
    let last_run = info.last_run.unwrap();
    assert_eq!(last_run.status, "completed");
    assert_eq!(last_run.triggered_by, "hook:OnStartup");
    assert_eq!(dir_entries(temp_dir.path()).len(), 1);

    let response = reqwest::Client::new()
        .post(format!("{}/v1/jobs/nightly_vacuum/trigger", env.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
}
