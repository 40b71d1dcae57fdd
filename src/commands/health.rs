use axum::Json;
use serde::Serialize;
use vidgrab_core::core::dependencies::{self, ToolStatus};

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub ffmpeg_available: bool,
    pub yt_dlp_version: Option<String>,
    pub dependencies: Vec<ToolStatus>,
}

pub async fn health() -> Json<HealthResponse> {
    let (ytdlp, ffmpeg) = tokio::join!(
        dependencies::check_tool("yt-dlp"),
        dependencies::check_tool("ffmpeg"),
    );

    Json(HealthResponse {
        status: "healthy",
        ffmpeg_available: ffmpeg.available,
        yt_dlp_version: ytdlp.version.clone(),
        dependencies: vec![ytdlp, ffmpeg],
    })
}
