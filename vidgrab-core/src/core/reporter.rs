use std::sync::Arc;

use tokio::sync::watch;

use crate::core::store::JobStore;
use crate::error::{Error, Result};
use crate::models::job::{Job, JobId, JobSnapshot, JobStatus, ResultArtifact};

/// Read-only access to job state for pollers and file handlers.
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn poll(&self, id: &JobId) -> Result<JobSnapshot> {
        Ok(self.store.get(id).await?.snapshot())
    }

    /// Receiver that changes whenever the job does.
    pub async fn watch(&self, id: &JobId) -> Result<watch::Receiver<Job>> {
        self.store.subscribe(id).await
    }

    /// The produced file of a completed job.
    pub async fn artifact(&self, id: &JobId) -> Result<ResultArtifact> {
        let job = self.store.get(id).await?;
        match (job.status, job.result_artifact) {
            (JobStatus::Completed, Some(artifact)) => Ok(artifact),
            _ => Err(Error::NotFound(id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::core::store::InMemoryJobStore;
    use crate::models::job::{JobMutation, JobSpec};
    use crate::models::media::{DownloadRequest, MediaKind};

    async fn setup() -> (Arc<InMemoryJobStore>, ProgressReporter, JobId) {
        let store = Arc::new(InMemoryJobStore::new());
        let job = store
            .create(JobSpec {
                request: DownloadRequest {
                    url: "https://youtu.be/abc".into(),
                    media_kind: MediaKind::Video,
                    quality: "720".into(),
                    convert_to: None,
                },
                title: "clip".into(),
                work_root: PathBuf::from("/tmp/vidgrab-test"),
                timeout: Duration::from_secs(60),
            })
            .await;
        let reporter = ProgressReporter::new(store.clone());
        (store, reporter, job.id)
    }

    #[tokio::test]
    async fn poll_reflects_store() {
        let (store, reporter, id) = setup().await;
        assert_eq!(reporter.poll(&id).await.unwrap().status, JobStatus::Queued);

        store.update(&id, JobMutation::Start).await.unwrap();
        let snapshot = reporter.poll(&id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Downloading);
        assert_eq!(snapshot.title, "clip");

        assert!(matches!(
            reporter.poll(&JobId::from("missing")).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn artifact_only_for_completed_jobs() {
        let (store, reporter, id) = setup().await;
        assert!(matches!(reporter.artifact(&id).await, Err(Error::NotFound(_))));

        store.update(&id, JobMutation::Start).await.unwrap();
        store
            .update(
                &id,
                JobMutation::Complete(ResultArtifact {
                    path: PathBuf::from("/tmp/vidgrab-test/clip.mp4"),
                    filename: "clip.mp4".into(),
                    size_bytes: 3,
                    size_label: "3.0 B".into(),
                }),
            )
            .await
            .unwrap();
        assert_eq!(reporter.artifact(&id).await.unwrap().filename, "clip.mp4");
    }

    #[tokio::test]
    async fn watch_sees_updates() {
        let (store, reporter, id) = setup().await;
        let mut rx = reporter.watch(&id).await.unwrap();
        store.update(&id, JobMutation::Start).await.unwrap();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, JobStatus::Downloading);
    }
}
