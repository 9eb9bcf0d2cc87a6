//! Unattended database backups: dump, compress, deliver to a webhook and
//! prune expired archives on a cron schedule.

pub mod background_jobs;
pub mod backup;
pub mod config;
pub mod server;
