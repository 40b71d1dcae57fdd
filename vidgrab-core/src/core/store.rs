use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::{watch, RwLock};

use crate::error::{Error, Result};
use crate::models::job::{Job, JobId, JobMutation, JobSpec};

/// Registry of jobs shared by the pipelines (writers) and pollers (readers).
///
/// Implementations must apply each mutation atomically: a reader sees a job
/// either before or after a mutation, never in between.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create(&self, spec: JobSpec) -> Job;
    async fn get(&self, id: &JobId) -> Result<Job>;
    async fn update(&self, id: &JobId, mutation: JobMutation) -> Result<Job>;
    async fn delete(&self, id: &JobId) -> Result<Job>;
    /// Receiver that observes every committed state of the job.
    async fn subscribe(&self, id: &JobId) -> Result<watch::Receiver<Job>>;
    async fn list(&self) -> Vec<Job>;
    async fn len(&self) -> usize;
}

/// Each job lives in its own `watch` channel: the channel's lock serializes
/// writers and hands readers whole snapshots. The outer map lock is only held
/// for lookups.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, watch::Sender<Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, spec: JobSpec) -> Job {
        let job = Job::new(spec);
        let (tx, _rx) = watch::channel(job.clone());
        self.jobs.write().await.insert(job.id.clone(), tx);
        tracing::debug!("Job {} created", job.id);
        job
    }

    async fn get(&self, id: &JobId) -> Result<Job> {
        let jobs = self.jobs.read().await;
        let tx = jobs.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        let job = tx.borrow().clone();
        Ok(job)
    }

    async fn update(&self, id: &JobId, mutation: JobMutation) -> Result<Job> {
        let jobs = self.jobs.read().await;
        let tx = jobs.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;

        let mut outcome = None;
        tx.send_if_modified(|job| match job.apply(mutation) {
            Ok(()) => {
                outcome = Some(Ok(job.clone()));
                true
            }
            Err(e) => {
                outcome = Some(Err(e));
                false
            }
        });
        outcome.unwrap_or_else(|| Err(Error::NotFound(id.to_string())))
    }

    async fn delete(&self, id: &JobId) -> Result<Job> {
        let tx = self
            .jobs
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        let job = tx.borrow().clone();
        tracing::debug!("Job {} deleted", id);
        Ok(job)
    }

    async fn subscribe(&self, id: &JobId) -> Result<watch::Receiver<Job>> {
        let jobs = self.jobs.read().await;
        let tx = jobs.get(id).ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(tx.subscribe())
    }

    async fn list(&self) -> Vec<Job> {
        let jobs = self.jobs.read().await;
        let mut all: Vec<Job> = jobs.values().map(|tx| tx.borrow().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }
}
