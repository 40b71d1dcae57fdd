use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::progress::FetchProgress;
use crate::core::{ffmpeg, ytdlp};
use crate::error::{short_message, PipelineError};
use crate::models::media::{AudioCodec, StreamSelection};

/// The external work a job performs. Implementations must stop their child
/// processes before returning once `cancel` fires.
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Downloads one stream to `<dir>/<stem>.<ext>` and returns the file path.
    async fn fetch(
        &self,
        source_url: &str,
        stream: &StreamSelection,
        dir: &Path,
        stem: &str,
        progress: mpsc::Sender<FetchProgress>,
        cancel: CancellationToken,
    ) -> Result<PathBuf, PipelineError>;

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError>;

    async fn convert_audio(
        &self,
        input: &Path,
        output: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError>;
}

/// Fetches with yt-dlp and post-processes with ffmpeg.
#[derive(Debug, Default, Clone)]
pub struct YtdlpPipeline;

impl YtdlpPipeline {
    pub fn new() -> Self {
        Self
    }
}

fn classify(
    err: anyhow::Error,
    cancel: &CancellationToken,
    wrap: fn(String) -> PipelineError,
) -> PipelineError {
    if cancel.is_cancelled() {
        PipelineError::Cancelled
    } else {
        wrap(short_message(&err.to_string()))
    }
}

#[async_trait]
impl MediaPipeline for YtdlpPipeline {
    async fn fetch(
        &self,
        source_url: &str,
        stream: &StreamSelection,
        dir: &Path,
        stem: &str,
        progress: mpsc::Sender<FetchProgress>,
        cancel: CancellationToken,
    ) -> Result<PathBuf, PipelineError> {
        let ytdlp = ytdlp::find_ytdlp()
            .await
            .ok_or_else(|| PipelineError::FetchFailed("yt-dlp is not installed".into()))?;

        tracing::debug!("Fetching format {} of {}", stream.format_id, source_url);
        ytdlp::download_format(
            &ytdlp,
            source_url,
            &stream.format_id,
            dir,
            stem,
            progress,
            cancel.clone(),
        )
        .await
        .map_err(|e| classify(e, &cancel, PipelineError::FetchFailed))
    }

    async fn merge(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        if !ffmpeg::is_ffmpeg_available().await {
            return Err(PipelineError::MergeFailed("ffmpeg is not installed".into()));
        }
        ffmpeg::mux_video_audio(video, audio, output, cancel.clone())
            .await
            .map_err(|e| classify(e, &cancel, PipelineError::MergeFailed))
    }

    async fn convert_audio(
        &self,
        input: &Path,
        output: &Path,
        codec: AudioCodec,
        bitrate_kbps: u32,
        cancel: CancellationToken,
    ) -> Result<(), PipelineError> {
        if !ffmpeg::is_ffmpeg_available().await {
            return Err(PipelineError::MergeFailed("ffmpeg is not installed".into()));
        }
        ffmpeg::convert_audio(input, output, codec, bitrate_kbps, cancel.clone())
            .await
            .map_err(|e| classify(e, &cancel, PipelineError::MergeFailed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_after_cancel_are_cancellations() {
        let cancel = CancellationToken::new();
        let err = classify(anyhow::anyhow!("yt-dlp cancelled"), &cancel, PipelineError::FetchFailed);
        assert!(matches!(err, PipelineError::FetchFailed(_)));

        cancel.cancel();
        let err = classify(anyhow::anyhow!("yt-dlp cancelled"), &cancel, PipelineError::FetchFailed);
        assert_eq!(err, PipelineError::Cancelled);
    }

    #[test]
    fn merge_errors_keep_last_line() {
        let cancel = CancellationToken::new();
        let err = classify(
            anyhow::anyhow!("ffmpeg exited with 1\nInvalid data found"),
            &cancel,
            PipelineError::MergeFailed,
        );
        assert_eq!(err, PipelineError::MergeFailed("Invalid data found".into()));
    }
}
