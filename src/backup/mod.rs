//! Backup lifecycle: dump, compress, deliver and retain.
//!
//! The [`BackupOrchestrator`] sequences a single cycle, the
//! [`RetentionManager`] prunes expired archives. Both talk to the outside world
//! only through the collaborator traits defined here ([`DumpProducer`],
//! [`ArchiveProducer`], [`Notifier`], [`Clock`]) so they can be exercised
//! without a database or a webhook.

pub mod archive;
pub mod clock;
pub mod dump;
mod errors;
mod models;
pub mod naming;
pub mod notifier;
mod orchestrator;
mod retention;

pub use archive::{ArchiveProducer, ZipArchiveProducer};
pub use clock::{Clock, FixedClock, SystemClock};
pub use dump::{DumpProducer, MysqlDumpProducer};
pub use errors::{
    BackupError, CompressionError, DumpError, FileDeletionError, NotificationError, SweepError,
};
pub use models::{
    ArchiveFile, BackupCycleResult, BackupStage, DeletedArchive, DeletionReason,
    RetentionSweepResult,
};
pub use notifier::{notify_best_effort, DiscordWebhookNotifier, NotificationEvent, Notifier};
pub use orchestrator::BackupOrchestrator;
pub use retention::RetentionManager;
