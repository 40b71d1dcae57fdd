use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Mp3,
}

impl AudioCodec {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
        }
    }

    pub fn encoder(&self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub duration_seconds: Option<f64>,
    pub duration_label: String,
    pub thumbnail_url: Option<String>,
    pub view_count: Option<u64>,
}

/// One stream descriptor as reported by the extraction tool.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFormat {
    pub format_id: String,
    pub ext: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    pub filesize: Option<u64>,
    pub tbr: Option<f64>,
    pub abr: Option<f64>,
}

impl RawFormat {
    pub fn has_video(&self) -> bool {
        codec_present(self.vcodec.as_deref())
    }

    pub fn has_audio(&self) -> bool {
        codec_present(self.acodec.as_deref())
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    codec.map(|c| !c.is_empty() && c != "none").unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoVariant {
    pub format_id: String,
    pub height: u32,
    pub resolution: String,
    pub ext: String,
    pub filesize: Option<u64>,
    pub filesize_str: Option<String>,
    pub has_audio: bool,
    pub vcodec: String,
    pub acodec: String,
    pub fps: Option<f64>,
    pub tbr: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioVariant {
    pub format_id: String,
    pub ext: String,
    pub abr: f64,
    pub abr_rounded: u32,
    pub abr_str: String,
    pub filesize: Option<u64>,
    pub filesize_str: Option<String>,
    pub acodec: String,
}

/// Client-facing variants, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FormatCatalog {
    pub video: Vec<VideoVariant>,
    pub audio: Vec<AudioVariant>,
}

impl FormatCatalog {
    pub fn video_by_height(&self, height: u32) -> Option<&VideoVariant> {
        self.video.iter().find(|v| v.height == height)
    }

    pub fn audio_by_id(&self, format_id: &str) -> Option<&AudioVariant> {
        self.audio.iter().find(|a| a.format_id == format_id)
    }

    pub fn best_audio(&self) -> Option<&AudioVariant> {
        self.audio.first()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub media_kind: MediaKind,
    /// A height such as `"1080"` for video, a format id for audio.
    pub quality: String,
    #[serde(default)]
    pub convert_to: Option<AudioCodec>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamSelection {
    pub format_id: String,
    pub ext: String,
}

/// What the pipeline has to do for one job, decided at admission time.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadPlan {
    pub source_url: String,
    pub title: String,
    pub primary: StreamSelection,
    /// Separate audio stream to mux with a video-only primary.
    pub merge_audio: Option<StreamSelection>,
    pub convert_audio: Option<(AudioCodec, u32)>,
    pub output_ext: String,
}

impl DownloadPlan {
    pub fn needs_processing(&self) -> bool {
        self.merge_audio.is_some() || self.convert_audio.is_some()
    }
}
