use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Top-level settings (can override CLI)
    pub schedule: Option<String>,
    pub metrics_port: Option<u16>,
    pub run_on_startup: Option<bool>,

    // Sections
    pub database: Option<DatabaseConfig>,
    pub backup: Option<BackupConfig>,
    pub discord: Option<DiscordConfig>,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub user: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    pub dump_path: Option<String>,
    /// Kill the dump tool after this many seconds
    pub dump_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: Option<String>,
    pub retention_days: Option<u32>,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct DiscordConfig {
    pub webhook_url: Option<String>,
    pub bot_name: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Shows whether a secret is set without printing it.
fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "<redacted>")
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("user", &self.user)
            .field("password", &redacted(&self.password))
            .field("name", &self.name)
            .field("dump_path", &self.dump_path)
            .field("dump_timeout_secs", &self.dump_timeout_secs)
            .finish()
    }
}

impl fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("webhook_url", &redacted(&self.webhook_url))
            .field("bot_name", &self.bot_name)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
