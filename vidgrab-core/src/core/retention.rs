use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::orchestrator::remove_job_dir;
use crate::core::store::JobStore;
use crate::models::job::JobId;

/// Drops terminal jobs whose retention window has passed, along with their
/// directories. Returns how many were removed.
pub async fn sweep_expired(store: &dyn JobStore, retention: Duration) -> usize {
    let retention =
        chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
    let now = Utc::now();
    let mut removed = 0;

    for job in store.list().await {
        let expired = match job.finished_at {
            Some(finished) if job.is_terminal() => {
                finished
                    .checked_add_signed(retention)
                    .is_some_and(|until| until <= now)
            }
            _ => false,
        };
        if !expired {
            continue;
        }
        if store.delete(&job.id).await.is_ok() {
            remove_job_dir(&job.work_dir).await;
            removed += 1;
        }
    }

    if removed > 0 {
        tracing::info!("Retention sweep removed {} job(s)", removed);
    }
    removed
}

pub fn spawn_sweeper(
    store: Arc<dyn JobStore>,
    retention: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_expired(store.as_ref(), retention).await;
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("Retention sweeper stopped");
                    break;
                }
            }
        }
    })
}

/// Removes job directories left behind by a previous run. Only directories
/// named like a generated job id are touched.
pub async fn cleanup_stale_dirs(jobs_dir: &Path) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(jobs_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let is_job_dir = entry
            .file_name()
            .to_str()
            .is_some_and(JobId::is_generated);
        if !is_job_dir {
            tracing::debug!("Leaving {:?} alone", entry.path());
            continue;
        }
        if entry.file_type().await?.is_dir() {
            remove_job_dir(&entry.path()).await;
            removed += 1;
        }
    }
    if removed > 0 {
        tracing::info!("Removed {} stale job directories from {:?}", removed, jobs_dir);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::InMemoryJobStore;
    use crate::error::PipelineError;
    use crate::models::job::{JobError, JobMutation, JobSpec};
    use crate::models::media::{DownloadRequest, MediaKind};

    async fn failed_job(store: &InMemoryJobStore, root: &Path) -> crate::models::job::Job {
        let job = store
            .create(JobSpec {
                request: DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    media_kind: MediaKind::Audio,
                    quality: "140".into(),
                    convert_to: None,
                },
                title: "clip".into(),
                work_root: root.to_path_buf(),
                timeout: Duration::from_secs(60),
            })
            .await;
        std::fs::create_dir_all(&job.work_dir).unwrap();
        std::fs::write(job.work_dir.join("clip.m4a"), b"x").unwrap();
        store
            .update(&job.id, JobMutation::Fail(JobError::from(&PipelineError::Cancelled)))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_terminal_jobs() {
        let root = tempfile::tempdir().unwrap();
        let store = InMemoryJobStore::new();
        let done = failed_job(&store, root.path()).await;
        let running = store
            .create(JobSpec {
                request: DownloadRequest {
                    url: "https://youtu.be/def".into(),
                    media_kind: MediaKind::Video,
                    quality: "720".into(),
                    convert_to: None,
                },
                title: "other".into(),
                work_root: root.path().to_path_buf(),
                timeout: Duration::from_secs(60),
            })
            .await;

        assert_eq!(sweep_expired(&store, Duration::from_secs(3600)).await, 0);
        assert_eq!(store.len().await, 2);

        assert_eq!(sweep_expired(&store, Duration::ZERO).await, 1);
        assert!(store.get(&done.id).await.is_err());
        assert!(store.get(&running.id).await.is_ok());
        assert!(!done.work_dir.exists());
    }

    #[tokio::test]
    async fn stale_dirs_are_removed() {
        let root = tempfile::tempdir().unwrap();
        let first = root.path().join(JobId::generate().as_str());
        std::fs::create_dir_all(&first).unwrap();
        std::fs::write(first.join("partial.part"), b"x").unwrap();
        std::fs::create_dir_all(root.path().join(JobId::generate().as_str())).unwrap();

        assert_eq!(cleanup_stale_dirs(root.path()).await.unwrap(), 2);
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
        assert_eq!(
            cleanup_stale_dirs(&root.path().join("missing")).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn foreign_entries_survive_cleanup() {
        let root = tempfile::tempdir().unwrap();
        let photos = root.path().join("Holiday Photos");
        std::fs::create_dir_all(&photos).unwrap();
        std::fs::write(photos.join("img.jpg"), b"jpeg").unwrap();
        let upper = root.path().join("A".repeat(32));
        std::fs::create_dir_all(&upper).unwrap();
        let note = root.path().join("0123456789abcdef0123456789abcdef");
        std::fs::write(&note, b"a file, not a job dir").unwrap();
        let stale = root.path().join(JobId::generate().as_str());
        std::fs::create_dir_all(&stale).unwrap();

        assert_eq!(cleanup_stale_dirs(root.path()).await.unwrap(), 1);
        assert!(photos.join("img.jpg").exists());
        assert!(upper.exists());
        assert!(note.exists());
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new());
        let shutdown = CancellationToken::new();
        let handle = spawn_sweeper(
            store,
            Duration::from_secs(60),
            Duration::from_millis(10),
            shutdown.clone(),
        );
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
