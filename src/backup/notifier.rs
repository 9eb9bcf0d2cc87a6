//! Delivery of backup events to a Discord-compatible webhook.
//!
//! Notifications are best-effort: by the time one is sent the archive has been
//! written (or deleted) and that is the source of truth. Callers go through
//! [`notify_best_effort`], which logs delivery failures and drops them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::{error, info};

use super::errors::NotificationError;
use super::models::ArchiveFile;
use crate::server::metrics;

const EMBED_COLOR: u32 = 0x5865F2;
const EMBED_FOOTER: &str = "Automated Database Backup System";
const RETENTION_MESSAGE: &str = "Old backup file deleted due to retention policy";

/// What happened to the archive being reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    /// A new archive was produced; it is attached to the message.
    BackupCreated,
    /// An archive was removed by the retention policy. The file no longer
    /// exists, only its metadata is sent.
    RetentionExpired,
}

impl NotificationEvent {
    pub fn title(&self) -> &'static str {
        match self {
            NotificationEvent::BackupCreated => "Database Backup Created",
            NotificationEvent::RetentionExpired => "Database Backup Deleted",
        }
    }

    /// Free-text message shown above the embed.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            NotificationEvent::BackupCreated => None,
            NotificationEvent::RetentionExpired => Some(RETENTION_MESSAGE),
        }
    }

    pub fn attaches_file(&self) -> bool {
        matches!(self, NotificationEvent::BackupCreated)
    }

    fn label(&self) -> &'static str {
        match self {
            NotificationEvent::BackupCreated => "backup_created",
            NotificationEvent::RetentionExpired => "retention_expired",
        }
    }
}

/// Delivers a file plus structured metadata to an external channel.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        archive: &ArchiveFile,
        event: NotificationEvent,
    ) -> Result<(), NotificationError>;
}

/// Sends a notification and swallows any failure after logging it.
///
/// Returns whether the notification was delivered. The error is discarded on
/// purpose: a failed delivery must never undo or fail the backup or deletion
/// that triggered it.
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    archive: &ArchiveFile,
    event: NotificationEvent,
) -> bool {
    match notifier.notify(archive, event).await {
        Ok(()) => {
            info!(
                "Notification sent for {} ({})",
                archive.file_name(),
                event.label()
            );
            metrics::record_notification(event.label(), "delivered");
            true
        }
        Err(e) => {
            error!(
                "Failed to send notification for {} of database {} ({}): {}",
                archive.file_name(),
                archive.database,
                event.label(),
                e
            );
            metrics::record_notification(event.label(), "failed");
            false
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookPayload {
    pub content: Option<String>,
    pub embeds: Vec<Embed>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Embed {
    pub title: String,
    pub description: String,
    pub color: u32,
    pub footer: EmbedFooter,
    pub author: EmbedAuthor,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmbedFooter {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct EmbedAuthor {
    pub name: String,
}

/// Posts multipart messages to a Discord webhook.
///
/// The archive is streamed from disk into the request body, so arbitrarily
/// large files are never held in memory.
pub struct DiscordWebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
    bot_name: String,
}

impl DiscordWebhookNotifier {
    pub fn new(
        webhook_url: String,
        bot_name: String,
        timeout: Duration,
    ) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook_url,
            bot_name,
        })
    }

    pub(crate) fn build_payload(
        &self,
        archive: &ArchiveFile,
        event: NotificationEvent,
        sent_at: DateTime<Utc>,
    ) -> WebhookPayload {
        let description = [
            format!("**Database:** `{}`", archive.database),
            format!("**File:** `{}`", archive.file_name()),
            format!("**Size:** `{} MB`", archive.size_mb()),
            format!("**Date:** <t:{}:f>", sent_at.timestamp()),
        ]
        .join("\n");

        WebhookPayload {
            content: event.message().map(str::to_string),
            embeds: vec![Embed {
                title: event.title().to_string(),
                description,
                color: EMBED_COLOR,
                footer: EmbedFooter {
                    text: EMBED_FOOTER.to_string(),
                },
                author: EmbedAuthor {
                    name: self.bot_name.clone(),
                },
                timestamp: sent_at.to_rfc3339(),
            }],
        }
    }

    async fn attachment(&self, archive: &ArchiveFile) -> Result<Part, NotificationError> {
        let attachment_error = |source| NotificationError::Attachment {
            path: archive.path.clone(),
            source,
        };
        let file = tokio::fs::File::open(&archive.path)
            .await
            .map_err(attachment_error)?;
        let length = file.metadata().await.map_err(attachment_error)?.len();

        let body = reqwest::Body::wrap_stream(ReaderStream::new(file));
        Ok(Part::stream_with_length(body, length)
            .file_name(archive.file_name())
            .mime_str("application/zip")?)
    }
}

#[async_trait]
impl Notifier for DiscordWebhookNotifier {
    async fn notify(
        &self,
        archive: &ArchiveFile,
        event: NotificationEvent,
    ) -> Result<(), NotificationError> {
        let payload = self.build_payload(archive, event, Utc::now());

        let mut form = Form::new();
        if event.attaches_file() {
            form = form.part("file", self.attachment(archive).await?);
        }
        form = form.text("payload_json", serde_json::to_string(&payload)?);

        let response = self
            .client
            .post(&self.webhook_url)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotificationError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }
}
