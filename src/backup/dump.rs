//! Dump producer: the external tool that writes a textual database dump.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tracing::debug;

use super::errors::DumpError;
use crate::config::DatabaseSettings;

/// Longest stderr excerpt kept in a [`DumpError::NonZeroExit`].
const MAX_STDERR_CHARS: usize = 2048;

/// Produces a complete dump of a database into `destination`.
///
/// `Ok(())` means `destination` now holds a complete dump. Any error means no
/// usable output was produced; the caller owns cleaning up `destination`.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn dump(&self, database: &DatabaseSettings, destination: &Path)
        -> Result<(), DumpError>;
}

/// Runs a `mysqldump`-compatible executable with its stdout redirected into
/// the destination file.
///
/// The tool is invoked as `{dump_path} -u{user} -p{password} {name}`, without
/// a shell in between.
#[derive(Debug, Default, Clone)]
pub struct MysqlDumpProducer {
    timeout: Option<Duration>,
}

impl MysqlDumpProducer {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DumpProducer for MysqlDumpProducer {
    async fn dump(
        &self,
        database: &DatabaseSettings,
        destination: &Path,
    ) -> Result<(), DumpError> {
        let output_file =
            std::fs::File::create(destination).map_err(|source| DumpError::CreateOutput {
                path: destination.to_path_buf(),
                source,
            })?;

        debug!(
            "Running {:?} for database {} into {:?}",
            database.dump_path, database.name, destination
        );

        let child = tokio::process::Command::new(&database.dump_path)
            .arg(format!("-u{}", database.user))
            .arg(format!("-p{}", database.password))
            .arg(&database.name)
            .stdin(Stdio::null())
            .stdout(Stdio::from(output_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DumpError::Spawn {
                tool: database.dump_path.clone(),
                source,
            })?;

        let wait = child.wait_with_output();
        let output = match self.timeout {
            // Dropping the future drops the child, which kills it.
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| DumpError::Timeout(limit))?,
            None => wait.await,
        }
        .map_err(DumpError::Wait)?;

        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(DumpError::NonZeroExit {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            })
        }
    }
}
