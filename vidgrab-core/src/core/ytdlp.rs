use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::anyhow;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::dependencies;
use crate::core::filename::format_duration;
use crate::core::process;
use crate::core::progress::FetchProgress;
use crate::models::media::{RawFormat, VideoMetadata};

const PROGRESS_TEMPLATE: &str =
    "download:%(progress._percent_str)s|%(progress.speed)s|%(progress.eta)s";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("yt-dlp not found")]
    ToolMissing,
    #[error("failed to run yt-dlp: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("yt-dlp did not answer within {0:?}")]
    Timeout(Duration),
    #[error("yt-dlp failed: {0}")]
    Failed(String),
    #[error("yt-dlp returned invalid JSON: {0}")]
    InvalidJson(String),
}

pub async fn find_ytdlp() -> Option<PathBuf> {
    dependencies::find_tool("yt-dlp").await
}

pub async fn get_video_info(
    ytdlp: &Path,
    url: &str,
    timeout: Duration,
) -> Result<serde_json::Value, ExtractError> {
    let run = process::command(ytdlp)
        .args(["--dump-json", "--no-warnings", "--no-playlist", url])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output();

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| ExtractError::Timeout(timeout))??;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ExtractError::Failed(stderr.trim().to_string()));
    }

    serde_json::from_slice(&output.stdout).map_err(|e| ExtractError::InvalidJson(e.to_string()))
}

pub fn parse_metadata(json: &serde_json::Value) -> VideoMetadata {
    let str_field = |key: &str| json.get(key).and_then(|v| v.as_str()).map(|s| s.to_string());
    let duration = json.get("duration").and_then(|v| v.as_f64());

    VideoMetadata {
        id: str_field("id").unwrap_or_default(),
        title: str_field("title").unwrap_or_else(|| "video".to_string()),
        channel: str_field("channel")
            .or_else(|| str_field("uploader"))
            .unwrap_or_else(|| "unknown".to_string()),
        duration_seconds: duration,
        duration_label: format_duration(duration),
        thumbnail_url: str_field("thumbnail"),
        view_count: json.get("view_count").and_then(|v| v.as_u64()),
    }
}

pub fn is_live(json: &serde_json::Value) -> bool {
    json.get("is_live").and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn parse_formats(json: &serde_json::Value) -> Vec<RawFormat> {
    let formats = match json.get("formats").and_then(|v| v.as_array()) {
        Some(f) => f,
        None => return Vec::new(),
    };

    let mut result = Vec::new();
    for f in formats {
        let format_id = match f.get("format_id").and_then(|v| v.as_str()) {
            Some(id) => id.to_string(),
            None => continue,
        };

        let ext = f.get("ext").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let width = f.get("width").and_then(|v| v.as_u64()).map(|v| v as u32);
        let height = f.get("height").and_then(|v| v.as_u64()).map(|v| v as u32);
        let fps = f.get("fps").and_then(|v| v.as_f64());
        let vcodec = f.get("vcodec").and_then(|v| v.as_str()).map(|s| s.to_string());
        let acodec = f.get("acodec").and_then(|v| v.as_str()).map(|s| s.to_string());
        let filesize = f
            .get("filesize")
            .and_then(|v| v.as_u64())
            .or_else(|| f.get("filesize_approx").and_then(|v| v.as_u64()));
        let tbr = f.get("tbr").and_then(|v| v.as_f64());
        let abr = f.get("abr").and_then(|v| v.as_f64());

        result.push(RawFormat {
            format_id,
            ext,
            width,
            height,
            fps,
            vcodec,
            acodec,
            filesize,
            tbr,
            abr,
        });
    }

    result
}

/// Downloads exactly one format of `url` into `output_dir/<stem>.<ext>`.
///
/// Progress is reported in emission order on `progress`. When `cancel`
/// fires the child process is killed before this returns.
pub async fn download_format(
    ytdlp: &Path,
    url: &str,
    format_id: &str,
    output_dir: &Path,
    stem: &str,
    progress: mpsc::Sender<FetchProgress>,
    cancel: CancellationToken,
) -> anyhow::Result<PathBuf> {
    tokio::fs::create_dir_all(output_dir).await?;
    let output_template = output_dir
        .join(format!("{}.%(ext)s", stem))
        .to_string_lossy()
        .to_string();

    let mut child = process::command(ytdlp)
        .args([
            "-f",
            format_id,
            "--no-playlist",
            "--no-part",
            "--newline",
            "--progress-template",
            PROGRESS_TEMPLATE,
            "-o",
            output_template.as_str(),
            url,
        ])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| anyhow!("Failed to start yt-dlp: {}", e))?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("yt-dlp has no stdout"))?;
    let mut stderr = child.stderr.take().ok_or_else(|| anyhow!("yt-dlp has no stderr"))?;

    let line_reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if let Some(update) = parse_progress_line(&line) {
                if progress.send(update).await.is_err() {
                    break;
                }
            }
        }
    });
    let stderr_reader = tokio::spawn(async move {
        let mut buf = String::new();
        let _ = stderr.read_to_string(&mut buf).await;
        buf
    });

    let status = tokio::select! {
        status = child.wait() => status.map_err(|e| anyhow!("yt-dlp process failed: {}", e))?,
        _ = cancel.cancelled() => {
            process::terminate(&mut child, "yt-dlp").await;
            line_reader.abort();
            stderr_reader.abort();
            anyhow::bail!("yt-dlp cancelled");
        }
    };

    let _ = line_reader.await;
    let stderr = stderr_reader.await.unwrap_or_default();

    if !status.success() {
        let detail = crate::error::short_message(&stderr);
        if detail.is_empty() {
            anyhow::bail!("yt-dlp exited with {}", status);
        }
        anyhow::bail!("yt-dlp exited with {}: {}", status, detail);
    }

    find_output_file(output_dir, stem).await
}

/// Parses lines produced by [`PROGRESS_TEMPLATE`], e.g.
/// `download: 42.1%|1048576.0|12`.
pub fn parse_progress_line(line: &str) -> Option<FetchProgress> {
    let rest = line.trim().strip_prefix("download:")?;
    let mut parts = rest.split('|');
    let percent = parts
        .next()?
        .trim()
        .trim_end_matches('%')
        .trim()
        .parse::<f64>()
        .ok()?;
    let speed = parts
        .next()
        .and_then(|s| s.trim().parse::<f64>().ok())
        .unwrap_or(0.0);
    let eta = parts.next().and_then(|s| s.trim().parse::<f64>().ok());

    Some(FetchProgress {
        percent,
        speed_bytes_per_sec: speed,
        eta_seconds: eta,
    })
}

async fn find_output_file(output_dir: &Path, stem: &str) -> anyhow::Result<PathBuf> {
    let prefix = format!("{}.", stem);
    let mut entries = tokio::fs::read_dir(output_dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if !name.starts_with(&prefix) {
            continue;
        }
        if name.ends_with(".part") || name.ends_with(".ytdl") || name.ends_with(".json") {
            continue;
        }
        if entry.file_type().await?.is_file() {
            return Ok(path);
        }
    }
    Err(anyhow!("Downloaded file not found for {} in {:?}", stem, output_dir))
}
