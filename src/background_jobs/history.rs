use chrono::{DateTime, Utc};

/// Status of a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "running",
            JobRunStatus::Completed => "completed",
            JobRunStatus::Failed => "failed",
        }
    }
}

/// In-memory record of the most recent run of a job. Lost on restart.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub triggered_by: String,
}

impl JobRun {
    pub fn started(triggered_by: &str) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            status: JobRunStatus::Running,
            error_message: None,
            triggered_by: triggered_by.to_string(),
        }
    }

    pub fn finish(&mut self, status: JobRunStatus, error_message: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.status = status;
        self.error_message = error_message;
    }
}
