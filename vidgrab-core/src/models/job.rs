use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, FailureKind, PipelineError, Result};
use crate::models::media::{AudioCodec, DownloadRequest, MediaKind};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `name` has the shape of a generated id: 32 lowercase hex digits.
    pub fn is_generated(name: &str) -> bool {
        name.len() == 32
            && name
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Downloading)
                | (Downloading, Processing)
                | (Downloading, Completed)
                | (Processing, Completed)
                | (Queued, Failed)
                | (Downloading, Failed)
                | (Processing, Failed)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultArtifact {
    #[serde(skip)]
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
    pub size_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&PipelineError> for JobError {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

/// Everything the store needs to register a new job.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub request: DownloadRequest,
    pub title: String,
    pub work_root: PathBuf,
    pub timeout: std::time::Duration,
}

/// The only mutations a pipeline may apply to its job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobMutation {
    Start,
    Progress {
        percent: f64,
        speed_bytes_per_sec: f64,
        eta_seconds: Option<f64>,
    },
    Processing,
    Complete(ResultArtifact),
    Fail(JobError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub source_url: String,
    pub media_kind: MediaKind,
    pub requested_quality: String,
    pub convert_to: Option<AudioCodec>,
    pub title: String,
    pub work_dir: PathBuf,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    pub result_artifact: Option<ResultArtifact>,
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub deadline_at: DateTime<Utc>,
    pub transitions: Vec<StatusChange>,
}

impl Job {
    pub fn new(spec: JobSpec) -> Self {
        let id = JobId::generate();
        let now = Utc::now();
        let timeout = chrono::Duration::from_std(spec.timeout)
            .unwrap_or_else(|_| chrono::Duration::hours(24));
        Self {
            work_dir: spec.work_root.join(id.as_str()),
            id,
            source_url: spec.request.url,
            media_kind: spec.request.media_kind,
            requested_quality: spec.request.quality,
            convert_to: spec.request.convert_to,
            title: spec.title,
            status: JobStatus::Queued,
            progress_percent: 0.0,
            speed_bytes_per_sec: 0.0,
            eta_seconds: None,
            result_artifact: None,
            error: None,
            created_at: now,
            started_at: None,
            last_updated_at: now,
            finished_at: None,
            deadline_at: now + timeout,
            transitions: vec![StatusChange {
                status: JobStatus::Queued,
                at: now,
            }],
        }
    }

    /// Applies `mutation` entirely or not at all.
    pub fn apply(&mut self, mutation: JobMutation) -> Result<()> {
        let now = Utc::now();
        match mutation {
            JobMutation::Start => {
                self.transition(JobStatus::Downloading, now)?;
                self.started_at = Some(now);
            }
            JobMutation::Progress {
                percent,
                speed_bytes_per_sec,
                eta_seconds,
            } => {
                if self.status != JobStatus::Downloading {
                    return Err(Error::InvalidTransition {
                        from: self.status,
                        to: JobStatus::Downloading,
                    });
                }
                let percent = if percent.is_finite() {
                    percent.clamp(0.0, 100.0)
                } else {
                    self.progress_percent
                };
                self.progress_percent = self.progress_percent.max(percent);
                self.speed_bytes_per_sec = speed_bytes_per_sec.max(0.0);
                self.eta_seconds = eta_seconds.filter(|e| e.is_finite() && *e >= 0.0);
            }
            JobMutation::Processing => {
                self.transition(JobStatus::Processing, now)?;
                self.progress_percent = 100.0;
                self.speed_bytes_per_sec = 0.0;
                self.eta_seconds = None;
            }
            JobMutation::Complete(artifact) => {
                self.transition(JobStatus::Completed, now)?;
                self.progress_percent = 100.0;
                self.speed_bytes_per_sec = 0.0;
                self.eta_seconds = None;
                self.result_artifact = Some(artifact);
                self.finished_at = Some(now);
            }
            JobMutation::Fail(error) => {
                self.transition(JobStatus::Failed, now)?;
                self.speed_bytes_per_sec = 0.0;
                self.eta_seconds = None;
                self.error = Some(error);
                self.finished_at = Some(now);
            }
        }
        self.last_updated_at = self.last_updated_at.max(now);
        Ok(())
    }

    fn transition(&mut self, next: JobStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.transitions.push(StatusChange { status: next, at });
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            id: self.id.clone(),
            title: self.title.clone(),
            media_kind: self.media_kind,
            status: self.status,
            progress_percent: self.progress_percent,
            speed_bytes_per_sec: self.speed_bytes_per_sec,
            eta_seconds: self.eta_seconds,
            result_artifact: self.result_artifact.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Read-only view served to pollers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSnapshot {
    pub id: JobId,
    pub title: String,
    pub media_kind: MediaKind,
    pub status: JobStatus,
    pub progress_percent: f64,
    pub speed_bytes_per_sec: f64,
    pub eta_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_artifact: Option<ResultArtifact>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}
