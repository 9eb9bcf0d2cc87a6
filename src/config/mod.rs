mod file_config;

pub use file_config::{BackupConfig, DatabaseConfig, DiscordConfig, FileConfig};

use crate::background_jobs::{CronParseError, CronSchedule};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Cron expression used when none is configured: every three hours.
pub const DEFAULT_SCHEDULE: &str = "0 */3 * * *";

/// Webhook request timeout, generous enough to upload large archives.
pub const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 300;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    pub db_name: Option<String>,
    pub dump_path: Option<PathBuf>,
    pub dump_timeout_secs: Option<u64>,
    pub backup_dir: Option<PathBuf>,
    pub retention_days: Option<u32>,
    pub webhook_url: Option<String>,
    pub bot_name: Option<String>,
    pub notify_timeout_secs: Option<u64>,
    pub schedule: Option<String>,
    pub metrics_port: u16,
    pub skip_startup_run: bool,
}

/// Startup configuration problems. Any of these stops the process before the
/// first cycle is scheduled.
#[derive(Debug, Error)]
pub enum ConfigValidationError {
    #[error("missing required configuration fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("invalid schedule {expression:?}: {source}")]
    InvalidSchedule {
        expression: String,
        #[source]
        source: CronParseError,
    },
}

/// Identity and credentials of the database to dump.
#[derive(Clone)]
pub struct DatabaseSettings {
    pub user: String,
    pub password: String,
    pub name: String,
    pub dump_path: PathBuf,
}

impl fmt::Debug for DatabaseSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseSettings")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("dump_path", &self.dump_path)
            .finish()
    }
}

#[derive(Clone)]
pub struct NotificationSettings {
    pub webhook_url: String,
    pub bot_name: String,
}

impl fmt::Debug for NotificationSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Webhook URLs embed their own access token.
        f.debug_struct("NotificationSettings")
            .field("webhook_url", &"<redacted>")
            .field("bot_name", &self.bot_name)
            .finish()
    }
}

/// Everything one backup cycle and sweep needs. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct BackupJobConfig {
    pub database: DatabaseSettings,
    pub backup_dir: PathBuf,
    pub retention_days: u32,
    pub notification: NotificationSettings,
    pub schedule: CronSchedule,
}

impl BackupJobConfig {
    pub fn retention_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.retention_days))
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub job: BackupJobConfig,
    pub metrics_port: u16,
    pub dump_timeout: Option<Duration>,
    pub notify_timeout: Duration,
    pub run_on_startup: bool,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    ///
    /// Every missing or empty required field is reported at once.
    pub fn resolve(
        cli: &CliConfig,
        file_config: Option<FileConfig>,
    ) -> Result<Self, ConfigValidationError> {
        let file = file_config.unwrap_or_default();
        let db_file = file.database.unwrap_or_default();
        let backup_file = file.backup.unwrap_or_default();
        let discord_file = file.discord.unwrap_or_default();

        let mut missing = Vec::new();

        // TOML overrides CLI for each field
        let user = require(
            db_file.user.or_else(|| cli.db_user.clone()),
            "database.user",
            &mut missing,
        );
        let password = require(
            db_file.password.or_else(|| cli.db_password.clone()),
            "database.password",
            &mut missing,
        );
        let name = require(
            db_file.name.or_else(|| cli.db_name.clone()),
            "database.name",
            &mut missing,
        );
        let dump_path = require(
            db_file
                .dump_path
                .or_else(|| path_string(cli.dump_path.as_ref())),
            "database.dump_path",
            &mut missing,
        );
        let backup_dir = require(
            backup_file
                .directory
                .or_else(|| path_string(cli.backup_dir.as_ref())),
            "backup.directory",
            &mut missing,
        );

        let retention_days = backup_file
            .retention_days
            .or(cli.retention_days)
            .filter(|days| *days > 0);
        if retention_days.is_none() {
            missing.push("backup.retention_days");
        }

        let webhook_url = require(
            discord_file.webhook_url.or_else(|| cli.webhook_url.clone()),
            "discord.webhook_url",
            &mut missing,
        );
        let bot_name = require(
            discord_file.bot_name.or_else(|| cli.bot_name.clone()),
            "discord.bot_name",
            &mut missing,
        );
        let schedule = require(
            file.schedule
                .or_else(|| cli.schedule.clone())
                .or_else(|| Some(DEFAULT_SCHEDULE.to_string())),
            "schedule",
            &mut missing,
        );

        if !missing.is_empty() {
            return Err(ConfigValidationError::MissingFields(missing));
        }

        let schedule = schedule
            .parse::<CronSchedule>()
            .map_err(|source| ConfigValidationError::InvalidSchedule {
                expression: schedule.clone(),
                source,
            })?;

        let dump_timeout = db_file
            .dump_timeout_secs
            .or(cli.dump_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let notify_timeout = Duration::from_secs(
            discord_file
                .timeout_secs
                .or(cli.notify_timeout_secs)
                .unwrap_or(DEFAULT_NOTIFY_TIMEOUT_SECS),
        );

        Ok(Self {
            job: BackupJobConfig {
                database: DatabaseSettings {
                    user,
                    password,
                    name,
                    dump_path: PathBuf::from(dump_path),
                },
                backup_dir: PathBuf::from(backup_dir),
                retention_days: retention_days.unwrap_or_default(),
                notification: NotificationSettings {
                    webhook_url,
                    bot_name,
                },
                schedule,
            },
            metrics_port: file.metrics_port.unwrap_or(cli.metrics_port),
            dump_timeout,
            notify_timeout,
            run_on_startup: file.run_on_startup.unwrap_or(!cli.skip_startup_run),
        })
    }
}

/// Returns the trimmed value, or records `field` as missing and returns an
/// empty placeholder.
fn require(value: Option<String>, field: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(field);
            String::new()
        }
    }
}

fn path_string(path: Option<&PathBuf>) -> Option<String> {
    path.map(|p| p.to_string_lossy().into_owned())
}
