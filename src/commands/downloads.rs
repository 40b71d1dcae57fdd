use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use vidgrab_core::models::job::{JobId, JobStatus};
use vidgrab_core::models::media::{AudioCodec, DownloadRequest, MediaKind};

use crate::commands::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InfoRequest {
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct DownloadBody {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_format_type")]
    pub format_type: MediaKind,
    #[serde(default)]
    pub quality: String,
    #[serde(default)]
    pub convert_to: Option<AudioCodec>,
}

fn default_format_type() -> MediaKind {
    MediaKind::Video
}

pub async fn get_info(
    State(state): State<AppState>,
    body: Result<Json<InfoRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body?;
    let (info, formats) = state.orchestrator.resolve_metadata(&body.url).await?;
    tracing::info!(
        "Info for {}: {} video / {} audio variants",
        info.id,
        formats.video.len(),
        formats.audio.len()
    );
    Ok(Json(json!({
        "success": true,
        "info": info,
        "formats": formats,
    })))
}

pub async fn start_download(
    State(state): State<AppState>,
    body: Result<Json<DownloadBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body?;
    let request = DownloadRequest {
        url: body.url,
        media_kind: body.format_type,
        quality: body.quality,
        convert_to: body.convert_to,
    };
    let id = state.orchestrator.start_download(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "success": true,
            "download_id": id,
        })),
    ))
}

pub async fn get_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let snapshot = state.reporter.poll(&JobId::from(id)).await?;
    let completed = snapshot.status == JobStatus::Completed;
    let mut body = serde_json::to_value(&snapshot)?;
    if completed {
        body["download_url"] = json!(format!("/api/file/{}", snapshot.id));
    }
    Ok(Json(body))
}

pub async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let artifact = state.reporter.artifact(&JobId::from(id)).await?;
    let file = match tokio::fs::File::open(&artifact.path).await {
        Ok(file) => file,
        Err(e) => {
            tracing::warn!("Artifact {:?} is gone: {}", artifact.path, e);
            return Err(ApiError::not_found());
        }
    };

    let headers = [
        (header::CONTENT_TYPE, content_type_for(&artifact.filename).to_string()),
        (header::CONTENT_DISPOSITION, content_disposition(&artifact.filename)),
        (header::CONTENT_LENGTH, artifact.size_bytes.to_string()),
    ];
    let body = Body::from_stream(ReaderStream::new(file));
    Ok((headers, body).into_response())
}

pub async fn cancel_download(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.cancel(&JobId::from(id)).await?;
    Ok(Json(json!({ "success": true })))
}

fn content_type_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// `attachment` with an ASCII fallback name plus the UTF-8 name.
fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        urlencoding::encode(filename)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_types_by_extension() {
        assert_eq!(content_type_for("clip.MP4"), "video/mp4");
        assert_eq!(content_type_for("song.mp3"), "audio/mpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }

    #[test]
    fn disposition_keeps_unicode_name() {
        let value = content_disposition("Café ｜ Live.mp4");
        assert!(value.starts_with("attachment; filename=\"Caf_ _ Live.mp4\""));
        assert!(value.ends_with("filename*=UTF-8''Caf%C3%A9%20%EF%BD%9C%20Live.mp4"));
    }

    #[test]
    fn download_body_defaults_to_video() {
        let body: DownloadBody =
            serde_json::from_str(r#"{"url": "https://youtu.be/abc", "quality": "720"}"#).unwrap();
        assert_eq!(body.format_type, MediaKind::Video);
        assert!(body.convert_to.is_none());
    }
}
