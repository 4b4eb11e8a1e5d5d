//! Job model and its owned link/error records.
//!
//! A job is created by the request layer and mutated exclusively by the
//! update handler and the job completer. Terminal states are absorbing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Accepted,
    Previewing,
    Running,
    RunningWithErrors,
    Paused,
    CompleteWithErrors,
    Successful,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Previewing => "previewing",
            Self::Running => "running",
            Self::RunningWithErrors => "running_with_errors",
            Self::Paused => "paused",
            Self::CompleteWithErrors => "complete_with_errors",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "previewing" => Some(Self::Previewing),
            "running" => Some(Self::Running),
            "running_with_errors" => Some(Self::RunningWithErrors),
            "paused" => Some(Self::Paused),
            "complete_with_errors" => Some(Self::CompleteWithErrors),
            "successful" => Some(Self::Successful),
            "failed" => Some(Self::Failed),
            "canceled" => Some(Self::Canceled),
            _ => None,
        }
    }

    /// Terminal states are absorbing: no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Successful | Self::CompleteWithErrors | Self::Failed | Self::Canceled
        )
    }

    /// States in which the dispatcher may hand out work for this job.
    pub fn accepts_work(&self) -> bool {
        matches!(
            self,
            Self::Accepted | Self::Previewing | Self::Running | Self::RunningWithErrors
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A data-transformation job: one user request driving one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// UUID assigned at submission.
    #[serde(rename = "jobID")]
    pub id: String,
    pub username: String,
    pub status: JobStatus,
    pub message: String,
    /// 0..100; reaches 100 only on terminal non-failed status.
    pub progress: i32,
    /// Expected granule count; may shrink when the query step reports fewer hits.
    pub num_input_granules: i32,
    /// Continue past accepted work-item failures instead of failing the job.
    pub ignore_errors: bool,
    pub is_async: bool,
    /// Completed-batch counter backing progress reporting.
    pub batches_completed: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a new job in the `accepted` state.
    pub fn new(username: String, num_input_granules: i32) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username,
            status: JobStatus::Accepted,
            message: String::new(),
            progress: 0,
            num_input_granules,
            ignore_errors: false,
            is_async: true,
            batches_completed: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_terminated(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A result link attached to a job, derived from a STAC asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLink {
    pub href: String,
    pub rel: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temporal_end: Option<DateTime<Utc>>,
}

impl JobLink {
    /// A plain data link with no spatial or temporal extent.
    pub fn data(href: String) -> Self {
        Self {
            href,
            rel: "data".to_string(),
            mime_type: None,
            title: None,
            bbox: None,
            temporal_start: None,
            temporal_end: None,
        }
    }
}

/// An accepted work-item failure recorded against a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobError {
    pub url: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for status in [
            JobStatus::Accepted,
            JobStatus::Previewing,
            JobStatus::Running,
            JobStatus::RunningWithErrors,
            JobStatus::Paused,
            JobStatus::CompleteWithErrors,
            JobStatus::Successful,
            JobStatus::Failed,
            JobStatus::Canceled,
        ] {
            assert_eq!(JobStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::from_str("bogus"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::CompleteWithErrors.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Canceled.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());
        assert!(!JobStatus::Previewing.is_terminal());
    }

    #[test]
    fn test_paused_jobs_do_not_accept_work() {
        assert!(!JobStatus::Paused.accepts_work());
        assert!(!JobStatus::Canceled.accepts_work());
        assert!(JobStatus::Running.accepts_work());
        assert!(JobStatus::Previewing.accepts_work());
    }

    #[test]
    fn test_new_job_is_accepted() {
        let job = Job::new("alice".to_string(), 10);
        assert_eq!(job.status, JobStatus::Accepted);
        assert_eq!(job.progress, 0);
        assert_eq!(job.num_input_granules, 10);
        assert!(!job.has_terminated());
    }
}
