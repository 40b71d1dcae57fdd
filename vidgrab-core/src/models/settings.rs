use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which requests count as "the same download" for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupKey {
    /// One active job per source URL.
    Url,
    /// One active job per URL, media kind and quality.
    UrlAndQuality,
    /// One active job overall.
    Global,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSettings {
    pub work_dir: PathBuf,
    pub max_concurrent_downloads: usize,
    /// Upper bound on non-terminal jobs, running ones included.
    pub max_pending_jobs: usize,
    pub job_timeout_secs: u64,
    pub resolve_timeout_secs: u64,
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
    pub dedup_key: DedupKey,
    pub merge_container: String,
    pub default_audio_bitrate: u32,
}

impl OrchestratorSettings {
    /// Job directories live here, never directly in `work_dir`.
    pub fn jobs_dir(&self) -> PathBuf {
        self.work_dir.join("jobs")
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            work_dir: crate::fs_paths::default_work_dir(),
            max_concurrent_downloads: 3,
            max_pending_jobs: 16,
            job_timeout_secs: 30 * 60,
            resolve_timeout_secs: 60,
            retention_secs: 10 * 60,
            sweep_interval_secs: 60,
            dedup_key: DedupKey::UrlAndQuality,
            merge_container: "mp4".into(),
            default_audio_bitrate: 192,
        }
    }
}
