//! In-process fakes for the resolver and the pipeline.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::pipeline::MediaPipeline;
use crate::core::progress::FetchProgress;
use crate::core::resolver::{MetadataResolver, ResolvedMedia};
use crate::error::{Error, PipelineError, Result};
use crate::models::media::{AudioCodec, RawFormat, StreamSelection, VideoMetadata};

fn metadata(title: &str) -> VideoMetadata {
    VideoMetadata {
        id: "dQw4w9WgXcQ".into(),
        title: title.into(),
        channel: "Channel".into(),
        duration_seconds: Some(212.0),
        duration_label: "3:32".into(),
        thumbnail_url: None,
        view_count: Some(42),
    }
}

fn muxed(id: &str, height: u32) -> RawFormat {
    RawFormat {
        format_id: id.into(),
        ext: "mp4".into(),
        height: Some(height),
        width: Some(height * 16 / 9),
        vcodec: Some("avc1.640028".into()),
        acodec: Some("mp4a.40.2".into()),
        filesize: Some(50_000_000),
        ..Default::default()
    }
}

fn video_only(id: &str, height: u32) -> RawFormat {
    RawFormat {
        format_id: id.into(),
        ext: "webm".into(),
        height: Some(height),
        width: Some(height * 16 / 9),
        vcodec: Some("vp9".into()),
        acodec: Some("none".into()),
        filesize: Some(200_000_000),
        ..Default::default()
    }
}

fn audio_only(id: &str, abr: f64) -> RawFormat {
    RawFormat {
        format_id: id.into(),
        ext: "webm".into(),
        vcodec: Some("none".into()),
        acodec: Some("opus".into()),
        abr: Some(abr),
        filesize: Some(4_000_000),
        ..Default::default()
    }
}

/// 1080p muxed, 1080p video-only and one ~360 kbps audio stream.
pub fn muxed_1080_media() -> ResolvedMedia {
    ResolvedMedia {
        metadata: metadata("Never Gonna Give You Up"),
        formats: vec![muxed("22", 1080), video_only("137", 1080), audio_only("251", 360.0)],
    }
}

/// Only a video-only 720p stream, so a video download needs a merge.
pub fn video_only_720_media() -> ResolvedMedia {
    ResolvedMedia {
        metadata: metadata("Split Streams"),
        formats: vec![video_only("247", 720), audio_only("251", 160.0), audio_only("140", 129.0)],
    }
}

pub struct FakeResolver {
    media: Option<ResolvedMedia>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeResolver {
    pub fn new(media: ResolvedMedia) -> Self {
        Self {
            media: Some(media),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every lookup fails with `ResolutionFailed`.
    pub fn failing() -> Self {
        Self {
            media: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.media
            .clone()
            .ok_or_else(|| Error::ResolutionFailed(format!("ERROR: {}: Video unavailable", url)))
    }
}

/// How [`FakePipeline::fetch`] behaves.
#[derive(Debug, Clone)]
pub enum FetchBehavior {
    /// Reports the given percentages, then writes the file.
    Succeed(Vec<f64>),
    /// Writes a partial file, reports some progress, then fails.
    Fail(String),
    /// Blocks until cancelled.
    WaitForCancel,
    /// Runs `sleep 30` as a child process until cancelled.
    #[cfg(unix)]
    SpawnAndWaitForCancel,
}

pub struct FakePipeline {
    behavior: FetchBehavior,
    fetches: Mutex<Vec<String>>,
    merges: AtomicUsize,
    conversions: Mutex<Vec<(AudioCodec, u32)>>,
    child_pid: Mutex<Option<u32>>,
}

impl FakePipeline {
    pub fn new(behavior: FetchBehavior) -> Self {
        Self {
            behavior,
            fetches: Mutex::new(Vec::new()),
            merges: AtomicUsize::new(0),
            conversions: Mutex::new(Vec::new()),
            child_pid: Mutex::new(None),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(FetchBehavior::Succeed(vec![10.0, 55.5, 100.0]))
    }

    /// Format ids fetched so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetches.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn merges(&self) -> usize {
        self.merges.load(Ordering::SeqCst)
    }

    pub fn conversions(&self) -> Vec<(AudioCodec, u32)> {
        self.conversions.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child_pid.lock().ok().and_then(|p| *p)
    }

    fn record_fetch(&self, format_id: &str) {
        if let Ok(mut f) = self.fetches.lock() {
            f.push(format_id.to_string());
        }
    }
}

async fn write_file(path: &Path, contents: &[u8]) -> std::result::Result<(), PipelineError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(PipelineError::storage)?;
    }
    tokio::fs::write(path, contents)
        .await
        .map_err(PipelineError::storage)
}

#[async_trait]
impl MediaPipeline for FakePipeline {
    async fn fetch(
        &self,
        _source_url: &str,
        stream: &StreamSelection,
        dir: &Path,
        stem: &str,
        progress: mpsc::Sender<FetchProgress>,
        cancel: CancellationToken,
    ) -> std::result::Result<PathBuf, PipelineError> {
        self.record_fetch(&stream.format_id);
        let output = dir.join(format!("{}.{}", stem, stream.ext));
        let report = |percent: f64| FetchProgress {
            percent,
            speed_bytes_per_sec: 1024.0,
            eta_seconds: Some((100.0 - percent) / 10.0),
        };

        match &self.behavior {
            FetchBehavior::Succeed(steps) => {
                for step in steps {
                    let _ = progress.send(report(*step)).await;
                }
                write_file(&output, format!("media:{}", stream.format_id).as_bytes()).await?;
                Ok(output)
            }
            FetchBehavior::Fail(message) => {
                write_file(&dir.join(format!("{}.{}.part", stem, stream.ext)), b"partial").await?;
                let _ = progress.send(report(12.5)).await;
                Err(PipelineError::FetchFailed(message.clone()))
            }
            FetchBehavior::WaitForCancel => {
                let _ = progress.send(report(1.0)).await;
                cancel.cancelled().await;
                Err(PipelineError::Cancelled)
            }
            #[cfg(unix)]
            FetchBehavior::SpawnAndWaitForCancel => {
                write_file(&dir.join(format!("{}.{}.part", stem, stream.ext)), b"partial").await?;
                let mut child = crate::core::process::command("sleep")
                    .arg("30")
                    .spawn()
                    .map_err(|e| PipelineError::FetchFailed(e.to_string()))?;
                if let Ok(mut pid) = self.child_pid.lock() {
                    *pid = child.id();
                }
                tokio::select! {
                    _ = child.wait() => Err(PipelineError::FetchFailed("sleep exited".into())),
                    _ = cancel.cancelled() => {
                        crate::core::process::terminate(&mut child, "sleep").await;
                        Err(PipelineError::Cancelled)
                    }
                }
            }
        }
    }

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        _cancel: CancellationToken,
    ) -> std::result::Result<(), PipelineError> {
        self.merges.fetch_add(1, Ordering::SeqCst);
        let mut contents = tokio::fs::read(video)
            .await
            .map_err(|e| PipelineError::MergeFailed(e.to_string()))?;
        let audio = tokio::fs::read(audio)
            .await
            .map_err(|e| PipelineError::MergeFailed(e.to_string()))?;
        contents.extend_from_slice(&audio);
        write_file(output, &contents).await
    }

    async fn convert_audio(
        &self,
        input: &Path,
        output: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
        _cancel: CancellationToken,
    ) -> std::result::Result<(), PipelineError> {
        if let Ok(mut c) = self.conversions.lock() {
            c.push((codec, bitrate_kbps));
        }
        let contents = tokio::fs::read(input)
            .await
            .map_err(|e| PipelineError::MergeFailed(e.to_string()))?;
        write_file(output, &contents).await
    }
}
