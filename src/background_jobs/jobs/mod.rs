//! Specific background job implementations.

pub mod database_backup;

pub use database_backup::DatabaseBackupJob;
