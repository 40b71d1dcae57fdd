use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::core::catalog;
use crate::core::filename::{format_filesize, sanitize_path_component};
use crate::core::pipeline::MediaPipeline;
use crate::core::progress::{FetchProgress, ProgressThrottle, StreamSlot};
use crate::core::reporter::ProgressReporter;
use crate::core::resolver::{validate_source, MetadataResolver, ResolvedMedia};
use crate::core::store::JobStore;
use crate::error::{Error, PipelineError, Result};
use crate::models::job::{Job, JobError, JobId, JobMutation, JobSpec, ResultArtifact};
use crate::models::media::{
    DownloadPlan, DownloadRequest, FormatCatalog, MediaKind, StreamSelection, VideoMetadata,
};
use crate::models::settings::{DedupKey, OrchestratorSettings};

/// How long a cancelled pipeline may take to stop its child processes.
const CANCEL_GRACE: Duration = Duration::from_secs(10);
const PROGRESS_INTERVAL_MS: u64 = 250;

/// Accepts download requests and drives each accepted job to a terminal state.
///
/// Cloning is cheap; all clones share the same store, permits and admission
/// table.
#[derive(Clone)]
pub struct Orchestrator {
    resolver: Arc<dyn MetadataResolver>,
    pipeline: Arc<dyn MediaPipeline>,
    store: Arc<dyn JobStore>,
    settings: Arc<OrchestratorSettings>,
    permits: Arc<Semaphore>,
    /// Admission key to the job holding it. `None` while metadata resolves.
    admissions: Arc<Mutex<HashMap<String, Option<JobId>>>>,
    cancel_tokens: Arc<Mutex<HashMap<JobId, CancellationToken>>>,
}

impl Orchestrator {
    pub fn new(
        resolver: Arc<dyn MetadataResolver>,
        pipeline: Arc<dyn MediaPipeline>,
        store: Arc<dyn JobStore>,
        settings: OrchestratorSettings,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_downloads.max(1)));
        Self {
            resolver,
            pipeline,
            store,
            settings: Arc::new(settings),
            permits,
            admissions: Arc::new(Mutex::new(HashMap::new())),
            cancel_tokens: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn reporter(&self) -> ProgressReporter {
        ProgressReporter::new(self.store.clone())
    }

    /// Looks up a video and returns its metadata with the normalized catalog.
    pub async fn resolve_metadata(&self, url: &str) -> Result<(VideoMetadata, FormatCatalog)> {
        let source_url = validate_source(url)?;
        let resolved = self.resolve(&source_url).await?;
        let catalog = catalog::normalize(&resolved.formats);
        Ok((resolved.metadata, catalog))
    }

    /// Admits a download and returns its job id. The job runs in the
    /// background; no job exists when this returns an error.
    pub async fn start_download(&self, request: DownloadRequest) -> Result<JobId> {
        let source_url = validate_source(&request.url)?;
        if request.media_kind == MediaKind::Video {
            parse_height(&request.quality)?;
        }

        let key = self.admission_key(&source_url, &request);
        self.reserve(&key).await?;

        match self.admit(source_url, request, &key).await {
            Ok(id) => Ok(id),
            Err(e) => {
                self.admissions.lock().await.remove(&key);
                Err(e)
            }
        }
    }

    /// Stops a queued or running job. It ends up `failed` with a
    /// cancellation error.
    pub async fn cancel(&self, id: &JobId) -> Result<()> {
        let job = self.store.get(id).await?;
        if job.is_terminal() {
            return Err(Error::NotFound(id.to_string()));
        }
        let token = self
            .cancel_tokens
            .lock()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        tracing::info!("Cancelling job {}", id);
        token.cancel();
        Ok(())
    }

    fn admission_key(&self, source_url: &str, request: &DownloadRequest) -> String {
        match self.settings.dedup_key {
            DedupKey::Url => source_url.to_string(),
            DedupKey::UrlAndQuality => format!(
                "{}|{}|{}",
                source_url,
                request.media_kind,
                request.quality.trim()
            ),
            DedupKey::Global => "*".to_string(),
        }
    }

    async fn reserve(&self, key: &str) -> Result<()> {
        let mut admissions = self.admissions.lock().await;
        if let Some(holder) = admissions.get(key) {
            let holder = holder
                .as_ref()
                .map(|id| id.to_string())
                .unwrap_or_else(|| "pending".to_string());
            return Err(Error::AlreadyRunning(holder));
        }
        let limit = self.settings.max_pending_jobs.max(1);
        if admissions.len() >= limit {
            tracing::warn!("Rejecting download: {} jobs pending", admissions.len());
            return Err(Error::CapacityExceeded(admissions.len()));
        }
        admissions.insert(key.to_string(), None);
        Ok(())
    }

    async fn resolve(&self, source_url: &str) -> Result<ResolvedMedia> {
        let timeout = self.settings.resolve_timeout();
        tokio::time::timeout(timeout, self.resolver.resolve(source_url))
            .await
            .map_err(|_| Error::Unavailable(format!("metadata lookup exceeded {:?}", timeout)))?
    }

    async fn admit(&self, source_url: String, request: DownloadRequest, key: &str) -> Result<JobId> {
        let resolved = self.resolve(&source_url).await?;
        let catalog = catalog::normalize(&resolved.formats);
        let plan = plan_download(
            &request,
            &source_url,
            &resolved.metadata.title,
            &catalog,
            &self.settings,
        )?;

        let job = self
            .store
            .create(JobSpec {
                request: DownloadRequest {
                    url: source_url,
                    ..request
                },
                title: resolved.metadata.title,
                work_root: self.settings.jobs_dir(),
                timeout: self.settings.job_timeout(),
            })
            .await;

        let cancel = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .await
            .insert(job.id.clone(), cancel.clone());
        self.admissions
            .lock()
            .await
            .insert(key.to_string(), Some(job.id.clone()));

        tracing::info!(
            "Accepted job {} for {} ({} {}, merge: {}, convert: {:?})",
            job.id,
            job.source_url,
            job.media_kind,
            job.requested_quality,
            plan.merge_audio.is_some(),
            plan.convert_audio.map(|(codec, _)| codec)
        );

        let id = job.id.clone();
        let this = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            this.run_job(job, plan, cancel, key).await;
        });
        Ok(id)
    }

    async fn run_job(self, job: Job, plan: DownloadPlan, cancel: CancellationToken, key: String) {
        let remaining = (job.deadline_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);
        let deadline = tokio::time::Instant::now() + remaining;

        let outcome = {
            let work = self.execute(&job, &plan, cancel.clone());
            tokio::pin!(work);
            tokio::select! {
                result = &mut work => result,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!("Job {} passed its deadline, stopping it", job.id);
                    cancel.cancel();
                    if tokio::time::timeout(CANCEL_GRACE, &mut work).await.is_err() {
                        tracing::warn!("Job {} did not stop within {:?}", job.id, CANCEL_GRACE);
                    }
                    Err(PipelineError::TimedOut)
                }
            }
        };

        self.finish(&job, outcome, &key).await;
    }

    async fn execute(
        &self,
        job: &Job,
        plan: &DownloadPlan,
        cancel: CancellationToken,
    ) -> std::result::Result<ResultArtifact, PipelineError> {
        let _permit = tokio::select! {
            permit = self.permits.acquire() => permit.map_err(|_| PipelineError::Cancelled)?,
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
        };

        self.store
            .update(&job.id, JobMutation::Start)
            .await
            .map_err(PipelineError::storage)?;
        tokio::fs::create_dir_all(&job.work_dir)
            .await
            .map_err(PipelineError::storage)?;
        tracing::info!("Job {} downloading", job.id);

        let streams: Vec<(&str, &StreamSelection)> = match &plan.merge_audio {
            Some(audio) => vec![("video", &plan.primary), ("audio", audio)],
            None => vec![("source", &plan.primary)],
        };
        let total = streams.len();

        let mut fetched = Vec::with_capacity(total);
        for (index, (stem, stream)) in streams.into_iter().enumerate() {
            let (tx, rx) = mpsc::channel(64);
            let forwarder = tokio::spawn(forward_progress(
                self.store.clone(),
                job.id.clone(),
                StreamSlot { index, total },
                rx,
            ));
            let result = self
                .pipeline
                .fetch(&plan.source_url, stream, &job.work_dir, stem, tx, cancel.clone())
                .await;
            let _ = forwarder.await;
            fetched.push(result?);
        }

        let mut current = fetched
            .first()
            .cloned()
            .ok_or_else(|| PipelineError::FetchFailed("nothing was downloaded".into()))?;

        if plan.needs_processing() {
            self.store
                .update(&job.id, JobMutation::Processing)
                .await
                .map_err(PipelineError::storage)?;
            tracing::info!("Job {} processing", job.id);
        }

        if let Some(audio) = fetched.get(1) {
            let merged = job.work_dir.join(format!("merged.{}", plan.output_ext));
            self.pipeline
                .merge(&current, audio, &merged, cancel.clone())
                .await?;
            current = merged;
        }

        if let Some((codec, bitrate)) = plan.convert_audio {
            let converted = job.work_dir.join(format!("converted.{}", codec.extension()));
            self.pipeline
                .convert_audio(&current, &converted, codec, bitrate, cancel.clone())
                .await?;
            current = converted;
        }

        finalize(&job.work_dir, &job.title, &current).await
    }

    /// Records the terminal state. The admission key is released under the
    /// same lock, so anyone who sees the terminal state can resubmit.
    async fn finish(
        &self,
        job: &Job,
        outcome: std::result::Result<ResultArtifact, PipelineError>,
        key: &str,
    ) {
        let mutation = match outcome {
            Ok(artifact) => {
                tracing::info!(
                    "Job {} completed: {} ({})",
                    job.id,
                    artifact.filename,
                    artifact.size_label
                );
                JobMutation::Complete(artifact)
            }
            Err(err) => {
                match err {
                    PipelineError::Cancelled => tracing::info!("Job {} cancelled", job.id),
                    ref other => tracing::warn!("Job {} failed: {}", job.id, other),
                }
                remove_job_dir(&job.work_dir).await;
                JobMutation::Fail(JobError::from(&err))
            }
        };

        self.cancel_tokens.lock().await.remove(&job.id);
        let mut admissions = self.admissions.lock().await;
        if let Err(e) = self.store.update(&job.id, mutation).await {
            tracing::error!("Could not record the outcome of job {}: {}", job.id, e);
        }
        admissions.remove(key);
    }
}

/// Applies one stream's progress to the job, in the order it was reported.
async fn forward_progress(
    store: Arc<dyn JobStore>,
    id: JobId,
    slot: StreamSlot,
    mut rx: mpsc::Receiver<FetchProgress>,
) {
    let mut throttle = ProgressThrottle::new(PROGRESS_INTERVAL_MS);
    while let Some(update) = rx.recv().await {
        if update.percent < 100.0 && !throttle.should_emit() {
            continue;
        }
        let mutation = JobMutation::Progress {
            percent: slot.overall(update.percent),
            speed_bytes_per_sec: update.speed_bytes_per_sec,
            eta_seconds: update.eta_seconds,
        };
        if let Err(e) = store.update(&id, mutation).await {
            tracing::debug!("Dropping progress for job {}: {}", id, e);
            break;
        }
    }
}

/// Renames the produced file to `<title>.<ext>` and drops everything else
/// in the job directory.
async fn finalize(
    work_dir: &Path,
    title: &str,
    produced: &Path,
) -> std::result::Result<ResultArtifact, PipelineError> {
    let ext = produced
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_string();
    let filename = format!("{}.{}", sanitize_path_component(title), ext);
    let target = work_dir.join(&filename);

    if produced != target {
        tokio::fs::rename(produced, &target)
            .await
            .map_err(PipelineError::storage)?;
    }

    let mut entries = tokio::fs::read_dir(work_dir)
        .await
        .map_err(PipelineError::storage)?;
    while let Some(entry) = entries.next_entry().await.map_err(PipelineError::storage)? {
        let path = entry.path();
        if path != target {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                tracing::debug!("Could not remove intermediate {:?}: {}", path, e);
            }
        }
    }

    let size_bytes = tokio::fs::metadata(&target)
        .await
        .map_err(PipelineError::storage)?
        .len();
    Ok(ResultArtifact {
        path: target,
        filename,
        size_bytes,
        size_label: format_filesize(Some(size_bytes)).unwrap_or_else(|| "0 B".to_string()),
    })
}

pub(crate) async fn remove_job_dir(dir: &Path) {
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => tracing::debug!("Removed {:?}", dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", dir, e),
    }
}

fn parse_height(quality: &str) -> Result<u32> {
    quality
        .trim()
        .trim_end_matches('p')
        .parse::<u32>()
        .map_err(|_| Error::InvalidQuality(quality.to_string()))
}

/// Picks the exact streams for `request` out of a freshly resolved catalog.
fn plan_download(
    request: &DownloadRequest,
    source_url: &str,
    title: &str,
    catalog: &FormatCatalog,
    settings: &OrchestratorSettings,
) -> Result<DownloadPlan> {
    match request.media_kind {
        MediaKind::Video => {
            if request.convert_to.is_some() {
                return Err(Error::InvalidQuality(
                    "audio conversion applies to audio downloads only".into(),
                ));
            }
            let height = parse_height(&request.quality)?;
            let variant = catalog
                .video_by_height(height)
                .ok_or_else(|| Error::InvalidQuality(request.quality.clone()))?;
            let primary = StreamSelection {
                format_id: variant.format_id.clone(),
                ext: variant.ext.clone(),
            };

            let merge_audio = if variant.has_audio {
                None
            } else {
                catalog.best_audio().map(|a| StreamSelection {
                    format_id: a.format_id.clone(),
                    ext: a.ext.clone(),
                })
            };
            let output_ext = if merge_audio.is_some() {
                settings.merge_container.clone()
            } else {
                variant.ext.clone()
            };

            Ok(DownloadPlan {
                source_url: source_url.to_string(),
                title: title.to_string(),
                primary,
                merge_audio,
                convert_audio: None,
                output_ext,
            })
        }
        MediaKind::Audio => {
            let variant = catalog
                .audio_by_id(request.quality.trim())
                .ok_or_else(|| Error::InvalidQuality(request.quality.clone()))?;
            let convert_audio = request.convert_to.map(|codec| {
                let bitrate = if variant.abr_rounded > 0 {
                    variant.abr_rounded
                } else {
                    settings.default_audio_bitrate
                };
                (codec, bitrate)
            });
            let output_ext = match convert_audio {
                Some((codec, _)) => codec.extension().to_string(),
                None => variant.ext.clone(),
            };

            Ok(DownloadPlan {
                source_url: source_url.to_string(),
                title: title.to_string(),
                primary: StreamSelection {
                    format_id: variant.format_id.clone(),
                    ext: variant.ext.clone(),
                },
                merge_audio: None,
                convert_audio,
                output_ext,
            })
        }
    }
}
