use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pezzottify_backup::background_jobs::jobs::DatabaseBackupJob;
use pezzottify_backup::background_jobs::create_scheduler;
use pezzottify_backup::backup::{
    BackupOrchestrator, Clock, DiscordWebhookNotifier, MysqlDumpProducer, Notifier,
    RetentionManager, SystemClock, ZipArchiveProducer,
};
use pezzottify_backup::config::{self, ConfigValidationError};
use pezzottify_backup::server::{metrics, run_admin_server};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
#[clap(about = "Periodic database backups delivered to a Discord webhook")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Database user passed to the dump tool.
    #[clap(long, env = "DB_BACKUP_USER")]
    pub db_user: Option<String>,

    /// Database password passed to the dump tool.
    #[clap(long, env = "DB_BACKUP_PASSWORD", hide_env_values = true)]
    pub db_password: Option<String>,

    /// Name of the database to back up.
    #[clap(long, env = "DB_BACKUP_NAME")]
    pub db_name: Option<String>,

    /// Path to the mysqldump-compatible executable.
    #[clap(long)]
    pub dump_path: Option<PathBuf>,

    /// Kill the dump tool if it runs longer than this many seconds.
    #[clap(long)]
    pub dump_timeout_secs: Option<u64>,

    /// Directory where archives are written. Created if missing.
    #[clap(long, value_parser = parse_path)]
    pub backup_dir: Option<PathBuf>,

    /// Archives older than this many days are deleted.
    #[clap(long)]
    pub retention_days: Option<u32>,

    /// Discord webhook receiving archives and deletion reports.
    #[clap(long, env = "DB_BACKUP_WEBHOOK_URL", hide_env_values = true)]
    pub webhook_url: Option<String>,

    /// Author name shown on webhook messages.
    #[clap(long)]
    pub bot_name: Option<String>,

    /// Timeout in seconds for webhook uploads.
    #[clap(long)]
    pub notify_timeout_secs: Option<u64>,

    /// Five-field cron expression, evaluated in local time. Defaults to every three hours.
    #[clap(long)]
    pub schedule: Option<String>,

    /// The port for the admin/metrics server. 0 disables it.
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// Do not run a backup immediately at startup.
    #[clap(long)]
    pub skip_startup_run: bool,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_user: args.db_user.clone(),
            db_password: args.db_password.clone(),
            db_name: args.db_name.clone(),
            dump_path: args.dump_path.clone(),
            dump_timeout_secs: args.dump_timeout_secs,
            backup_dir: args.backup_dir.clone(),
            retention_days: args.retention_days,
            webhook_url: args.webhook_url.clone(),
            bot_name: args.bot_name.clone(),
            notify_timeout_secs: args.notify_timeout_secs,
            schedule: args.schedule.clone(),
            metrics_port: args.metrics_port,
            skip_startup_run: args.skip_startup_run,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = match config::AppConfig::resolve(&cli_config, file_config) {
        Ok(app_config) => app_config,
        Err(ConfigValidationError::MissingFields(fields)) => {
            error!("Missing required configuration fields:");
            for field in fields {
                error!("  - {}", field);
            }
            error!("Please provide all required configuration values.");
            std::process::exit(1);
        }
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let job_config = Arc::new(app_config.job.clone());
    info!("Configuration loaded:");
    info!("  database: {}", job_config.database.name);
    info!("  dump tool: {:?}", job_config.database.dump_path);
    info!("  backup_dir: {:?}", job_config.backup_dir);
    info!("  retention: {} days", job_config.retention_days);
    info!("  schedule: {}", job_config.schedule);

    tokio::fs::create_dir_all(&job_config.backup_dir)
        .await
        .with_context(|| format!("Failed to create backup directory {:?}", job_config.backup_dir))?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let notifier: Arc<dyn Notifier> = Arc::new(DiscordWebhookNotifier::new(
        job_config.notification.webhook_url.clone(),
        job_config.notification.bot_name.clone(),
        app_config.notify_timeout,
    )?);

    let orchestrator = Arc::new(BackupOrchestrator::new(
        job_config.clone(),
        Arc::new(MysqlDumpProducer::new(app_config.dump_timeout)),
        Arc::new(ZipArchiveProducer::default()),
        notifier.clone(),
        clock.clone(),
    ));
    let retention = Arc::new(RetentionManager::new(
        job_config.database.name.clone(),
        notifier,
        clock,
    ));

    let shutdown_token = CancellationToken::new();
    let (mut scheduler, scheduler_handle) = create_scheduler(shutdown_token.clone());
    scheduler
        .register_job(Arc::new(DatabaseBackupJob::new(
            orchestrator,
            retention,
            app_config.run_on_startup,
        )))
        .await;

    let scheduler_task = tokio::spawn(async move { scheduler.run().await });
    let admin_task = tokio::spawn(run_admin_server(
        scheduler_handle,
        app_config.metrics_port,
        shutdown_token.clone(),
    ));

    // Only a signal ends the service; the admin server failing does not.
    shutdown_signal().await;

    info!("Initiating graceful shutdown");
    shutdown_token.cancel();
    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }
    if let Err(e) = admin_task.await {
        error!("Admin server task failed: {}", e);
    }

    info!("Backup service stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
