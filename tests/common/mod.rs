//! Shared helpers for integration tests: a local webhook receiver that records
//! multipart uploads, a fake dump tool and config builders.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    routing::post,
    Router,
};
use pezzottify_backup::background_jobs::CronSchedule;
use pezzottify_backup::backup::{DumpError, DumpProducer};
use pezzottify_backup::config::{BackupJobConfig, DatabaseSettings, NotificationSettings};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

/// One request received by the [`WebhookServer`].
#[derive(Debug, Clone, Default)]
pub struct CapturedMessage {
    pub payload: serde_json::Value,
    pub file_name: Option<String>,
    pub file_bytes: Option<Vec<u8>>,
}

#[derive(Clone)]
struct CaptureState {
    messages: Arc<Mutex<Vec<CapturedMessage>>>,
    status: Arc<AtomicU16>,
}

async fn capture(State(state): State<CaptureState>, mut multipart: Multipart) -> StatusCode {
    let mut message = CapturedMessage::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let data = field.bytes().await.unwrap_or_default();
        match name.as_str() {
            "file" => {
                message.file_name = file_name;
                message.file_bytes = Some(data.to_vec());
            }
            "payload_json" => {
                message.payload = serde_json::from_slice(&data).unwrap_or_default();
            }
            _ => {}
        }
    }
    state.messages.lock().unwrap().push(message);
    StatusCode::from_u16(state.status.load(Ordering::SeqCst)).unwrap_or(StatusCode::OK)
}

/// Local stand-in for a Discord webhook.
pub struct WebhookServer {
    pub url: String,
    state: CaptureState,
    shutdown: CancellationToken,
}

impl WebhookServer {
    pub async fn spawn() -> Self {
        let state = CaptureState {
            messages: Arc::new(Mutex::new(Vec::new())),
            status: Arc::new(AtomicU16::new(204)),
        };
        let app = Router::new()
            .route("/webhook", post(capture))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            url: format!("http://{}/webhook", addr),
            state,
            shutdown,
        }
    }

    /// Status code returned for subsequent requests.
    pub fn respond_with(&self, status: u16) {
        self.state.status.store(status, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<CapturedMessage> {
        self.state.messages.lock().unwrap().clone()
    }

    /// Poll until `count` messages arrived or two seconds passed.
    pub async fn wait_for_messages(&self, count: usize) -> Vec<CapturedMessage> {
        for _ in 0..100 {
            let messages = self.messages();
            if messages.len() >= count {
                return messages;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.messages()
    }
}

impl Drop for WebhookServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Writes roughly `size` bytes of SQL instead of running a real dump tool.
pub struct FakeDumpProducer {
    pub size: usize,
}

#[async_trait]
impl DumpProducer for FakeDumpProducer {
    async fn dump(&self, database: &DatabaseSettings, destination: &Path) -> Result<(), DumpError> {
        let mut content = format!("-- Dump of `{}`\n", database.name);
        let mut row = 0;
        while content.len() < self.size {
            content.push_str(&format!(
                "INSERT INTO `orders` VALUES ({row},'customer-{}',{}.50);\n",
                row % 113,
                row % 700
            ));
            row += 1;
        }
        tokio::fs::write(destination, content)
            .await
            .map_err(|source| DumpError::CreateOutput {
                path: destination.to_path_buf(),
                source,
            })
    }
}

pub fn job_config(backup_dir: &Path, webhook_url: &str, dump_path: &str) -> Arc<BackupJobConfig> {
    Arc::new(BackupJobConfig {
        database: DatabaseSettings {
            user: "backup".to_string(),
            password: "secret".to_string(),
            name: "shop".to_string(),
            dump_path: PathBuf::from(dump_path),
        },
        backup_dir: backup_dir.to_path_buf(),
        retention_days: 4,
        notification: NotificationSettings {
            webhook_url: webhook_url.to_string(),
            bot_name: "Backup Bot".to_string(),
        },
        schedule: "0 */3 * * *".parse::<CronSchedule>().unwrap(),
    })
}

/// Create an archive-looking file whose mtime is `age_days` in the past.
pub fn backdated_archive(dir: &Path, name: &str, age_days: u64) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"PK old archive").unwrap();
    let modified = SystemTime::now() - Duration::from_secs(age_days * 24 * 60 * 60);
    std::fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(modified)
        .unwrap();
    path
}

pub fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
