//! Job domain types shared by the worker and the ingestion producer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::HarvestError;

// ============================================================================
// Job Status
// ============================================================================

/// Lifecycle state of a job row.
///
/// The only legal path is `Pending -> Cooking -> {Completed, Failed}`.
/// `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Cooking,
    Failed,
    Completed,
}

impl JobStatus {
    /// Every status, in lifecycle order
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Cooking,
        JobStatus::Failed,
        JobStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Cooking => "cooking",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the lifecycle graph
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Cooking)
                | (JobStatus::Cooking, JobStatus::Completed)
                | (JobStatus::Cooking, JobStatus::Failed)
        )
    }

    /// The single status a row must be in to move into `self`.
    ///
    /// `None` for `Pending`, which is only ever an insertion state.
    pub fn predecessor(self) -> Option<JobStatus> {
        match self {
            JobStatus::Pending => None,
            JobStatus::Cooking => Some(JobStatus::Pending),
            JobStatus::Completed | JobStatus::Failed => Some(JobStatus::Cooking),
        }
    }
}

impl FromStr for JobStatus {
    type Err = HarvestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "cooking" => Ok(JobStatus::Cooking),
            "failed" => Ok(JobStatus::Failed),
            "completed" => Ok(JobStatus::Completed),
            other => Err(HarvestError::InvalidStatus(other.to_string())),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Job Records
// ============================================================================

/// A persisted job (maps to the `videos` table)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Externally supplied identifier (the video id)
    pub id: String,
    pub title: String,
    /// Source locator handed to the downloader
    pub url: String,
    pub duration_secs: Option<i64>,
    /// Grouping tag; becomes the object key prefix on upload
    pub prefix: String,
    /// Variant tag that changes output naming (`v1` -> `_v2` suffix)
    pub version: Option<String>,
    pub status: JobStatus,
    /// Set on `Pending -> Cooking`
    pub start_at: Option<DateTime<Utc>>,
    /// Set on entering a terminal state
    pub end_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A candidate job produced by ingestion, inserted as `Pending`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewJob {
    pub id: String,
    pub title: String,
    pub url: String,
    pub duration_secs: Option<i64>,
    pub prefix: String,
    pub version: Option<String>,
}

impl NewJob {
    pub fn new(id: impl Into<String>, url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: String::new(),
            url: url.into(),
            duration_secs: None,
            prefix: prefix.into(),
            version: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_duration(mut self, secs: i64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_version(mut self, version: Option<String>) -> Self {
        self.version = version;
        self
    }
}

/// Number of rows per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: i64,
    pub cooking: i64,
    pub failed: i64,
    pub completed: i64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> i64 {
        match status {
            JobStatus::Pending => self.pending,
            JobStatus::Cooking => self.cooking,
            JobStatus::Failed => self.failed,
            JobStatus::Completed => self.completed,
        }
    }

    pub fn set(&mut self, status: JobStatus, count: i64) {
        match status {
            JobStatus::Pending => self.pending = count,
            JobStatus::Cooking => self.cooking = count,
            JobStatus::Failed => self.failed = count,
            JobStatus::Completed => self.completed = count,
        }
    }

    pub fn total(&self) -> i64 {
        self.pending + self.cooking + self.failed + self.completed
    }
}
