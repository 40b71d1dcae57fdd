use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::core::ytdlp::{self, ExtractError};
use crate::error::{short_message, Error, Result};
use crate::models::media::{RawFormat, VideoMetadata};

static SOURCE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)^(https?://)?(www\.)?youtube\.com/watch\?v=[\w-]+",
        r"(?i)^(https?://)?(www\.)?youtube\.com/shorts/[\w-]+",
        r"(?i)^(https?://)?(www\.)?youtu\.be/[\w-]+",
        r"(?i)^(https?://)?(m\.)?youtube\.com/watch\?v=[\w-]+",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

const UNAVAILABLE_MARKERS: &[&str] = &[
    "timed out",
    "timeout",
    "unable to download webpage",
    "temporary failure in name resolution",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "http error 429",
    "http error 5",
];

/// Extraction failures with a message users can act on. Matched
/// case-insensitively against yt-dlp's stderr.
const FRIENDLY_FAILURES: &[(&str, &str)] = &[
    ("private video", "This video is private"),
    ("age-restricted", "Age-restricted video"),
    ("confirm your age", "Age-restricted video"),
];

#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub metadata: VideoMetadata,
    pub formats: Vec<RawFormat>,
}

/// Source of video metadata and raw stream descriptors.
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia>;
}

/// Checks that `url` points at a supported video and returns it with a scheme.
pub fn validate_source(url: &str) -> Result<String> {
    let url = url.trim();
    if url.is_empty() {
        return Err(Error::InvalidSource("URL is required".into()));
    }
    if !SOURCE_PATTERNS.iter().any(|re| re.is_match(url)) {
        return Err(Error::InvalidSource(url.to_string()));
    }
    let with_scheme = if url.contains("://") {
        url.to_string()
    } else {
        format!("https://{}", url)
    };
    url::Url::parse(&with_scheme).map_err(|_| Error::InvalidSource(url.to_string()))?;
    Ok(with_scheme)
}

pub struct YtdlpResolver {
    timeout: Duration,
}

impl YtdlpResolver {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl MetadataResolver for YtdlpResolver {
    async fn resolve(&self, url: &str) -> Result<ResolvedMedia> {
        let url = validate_source(url)?;
        let ytdlp = ytdlp::find_ytdlp()
            .await
            .ok_or_else(|| classify(ExtractError::ToolMissing))?;

        let json = ytdlp::get_video_info(&ytdlp, &url, self.timeout)
            .await
            .map_err(classify)?;

        if ytdlp::is_live(&json) {
            return Err(Error::ResolutionFailed("livestreams are not supported".into()));
        }

        let metadata = ytdlp::parse_metadata(&json);
        let formats = ytdlp::parse_formats(&json);
        tracing::info!(
            "Resolved '{}' ({}): {} raw formats",
            metadata.title,
            metadata.id,
            formats.len()
        );
        Ok(ResolvedMedia { metadata, formats })
    }
}

fn classify(err: ExtractError) -> Error {
    match err {
        ExtractError::ToolMissing => Error::Unavailable("yt-dlp is not installed".into()),
        ExtractError::Spawn(e) => Error::Unavailable(e.to_string()),
        ExtractError::Timeout(d) => Error::Unavailable(format!("no answer within {:?}", d)),
        ExtractError::InvalidJson(msg) => Error::ResolutionFailed(msg),
        ExtractError::Failed(stderr) => {
            let lower = stderr.to_lowercase();
            let message = short_message(&stderr);
            if let Some((_, friendly)) = FRIENDLY_FAILURES
                .iter()
                .find(|(marker, _)| lower.contains(marker))
            {
                tracing::debug!("yt-dlp refused: {}", message);
                Error::ResolutionFailed((*friendly).to_string())
            } else if lower.contains("unsupported url") {
                Error::InvalidSource(message)
            } else if UNAVAILABLE_MARKERS.iter().any(|m| lower.contains(m)) {
                Error::Unavailable(message)
            } else {
                Error::ResolutionFailed(message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_supported_shapes() {
        for url in [
            "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            "http://youtube.com/watch?v=dQw4w9WgXcQ&t=10",
            "youtube.com/shorts/abc_DEF-1",
            "https://youtu.be/dQw4w9WgXcQ",
            "https://m.youtube.com/watch?v=dQw4w9WgXcQ",
        ] {
            assert!(validate_source(url).is_ok(), "{} should be accepted", url);
        }
    }

    #[test]
    fn adds_missing_scheme() {
        assert_eq!(
            validate_source("  youtu.be/abc ").unwrap(),
            "https://youtu.be/abc"
        );
    }

    #[test]
    fn rejects_other_sources() {
        for url in ["", "https://vimeo.com/123", "https://www.youtube.com/", "not a url"] {
            assert!(matches!(validate_source(url), Err(Error::InvalidSource(_))));
        }
    }

    #[test]
    fn network_failures_are_unavailable() {
        let err = classify(ExtractError::Failed(
            "ERROR: Unable to download webpage: <urlopen error timed out>".into(),
        ));
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(matches!(
            classify(ExtractError::Timeout(Duration::from_secs(1))),
            Error::Unavailable(_)
        ));
        assert!(matches!(classify(ExtractError::ToolMissing), Error::Unavailable(_)));
    }

    #[test]
    fn extraction_failures_are_resolution_errors() {
        let err = classify(ExtractError::Failed(
            "ERROR: [youtube] abc: Requested format is not available".into(),
        ));
        assert!(matches!(err, Error::ResolutionFailed(ref m) if m.contains("not available")));
        assert!(matches!(
            classify(ExtractError::InvalidJson("eof".into())),
            Error::ResolutionFailed(_)
        ));
        assert!(matches!(
            classify(ExtractError::Failed("ERROR: Unsupported URL: x".into())),
            Error::InvalidSource(_)
        ));
    }

    #[test]
    fn private_and_age_gated_videos_get_readable_messages() {
        let err = classify(ExtractError::Failed(
            "ERROR: [youtube] abc: Private video. Sign in if you've been granted access".into(),
        ));
        assert!(matches!(err, Error::ResolutionFailed(ref m) if m == "This video is private"));

        for stderr in [
            "ERROR: [youtube] abc: This video is Age-Restricted and requires sign in",
            "ERROR: [youtube] abc: Sign in to confirm your age. This video may be inappropriate",
        ] {
            let err = classify(ExtractError::Failed(stderr.into()));
            assert!(matches!(err, Error::ResolutionFailed(ref m) if m == "Age-restricted video"));
        }
    }
}
