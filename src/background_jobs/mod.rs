//! Background job scheduling and execution system.
//!
//! Jobs run on startup hooks and cron expressions, one run per job at a
//! time. The [`SchedulerHandle`] exposes job state and manual triggers to the
//! admin server.

mod context;
mod cron;
mod handle;
mod history;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use cron::{CronParseError, CronSchedule};
pub use handle::{JobInfo, JobRunInfo, JobScheduleInfo, SchedulerHandle};
pub use history::{JobRun, JobRunStatus};
pub use job::{BackgroundJob, HookEvent, JobError, JobSchedule, ShutdownBehavior};
pub use scheduler::{create_scheduler, JobScheduler};
