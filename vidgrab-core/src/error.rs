use serde::Serialize;
use thiserror::Error;

use crate::models::job::JobStatus;

/// Errors returned synchronously to callers of the core.
///
/// Metadata and admission failures never create a job. Failures that happen
/// after a job was accepted are recorded on the job as a [`PipelineError`].
#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported source: {0}")]
    InvalidSource(String),

    #[error("metadata extraction failed: {0}")]
    ResolutionFailed(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("quality {0:?} is not available for this source")]
    InvalidQuality(String),

    #[error("a download for this request is already running (job {0})")]
    AlreadyRunning(String),

    #[error("download capacity exceeded ({0} jobs pending)")]
    CapacityExceeded(usize),

    #[error("job {0} not found")]
    NotFound(String),

    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline-phase failure kinds, stored on a failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    FetchFailed,
    MergeFailed,
    TimedOut,
    StorageFailed,
    Cancelled,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("fetch failed: {0}")]
    FetchFailed(String),

    #[error("merge failed: {0}")]
    MergeFailed(String),

    #[error("timed out")]
    TimedOut,

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::FetchFailed(_) => FailureKind::FetchFailed,
            Self::MergeFailed(_) => FailureKind::MergeFailed,
            Self::TimedOut => FailureKind::TimedOut,
            Self::StorageFailed(_) => FailureKind::StorageFailed,
            Self::Cancelled => FailureKind::Cancelled,
        }
    }

    pub(crate) fn storage(err: impl std::fmt::Display) -> Self {
        Self::StorageFailed(err.to_string())
    }
}

/// Keeps diagnostics short enough for a progress payload.
pub(crate) fn short_message(message: &str) -> String {
    const MAX_CHARS: usize = 200;
    let trimmed = message.trim();
    let last_line = trimmed
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or(trimmed)
        .trim();
    if last_line.chars().count() > MAX_CHARS {
        last_line.chars().take(MAX_CHARS).collect()
    } else {
        last_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_out_message_is_plain() {
        assert_eq!(PipelineError::TimedOut.to_string(), "timed out");
        assert_eq!(PipelineError::TimedOut.kind(), FailureKind::TimedOut);
    }

    #[test]
    fn short_message_keeps_last_line() {
        let stderr = "WARNING: something\nERROR: [youtube] abc: HTTP Error 403: Forbidden\n\n";
        assert_eq!(
            short_message(stderr),
            "ERROR: [youtube] abc: HTTP Error 403: Forbidden"
        );
    }

    #[test]
    fn short_message_truncates() {
        let long = "x".repeat(500);
        assert_eq!(short_message(&long).chars().count(), 200);
    }
}
