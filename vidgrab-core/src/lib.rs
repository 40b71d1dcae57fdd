//! Download job orchestration for a yt-dlp/ffmpeg based video and audio
//! downloader: metadata lookup, format catalogs, admission, job tracking and
//! the fetch/merge/convert pipeline.

pub mod core;
pub mod error;
pub mod fs_paths;
pub mod models;

pub use crate::core::orchestrator::Orchestrator;
pub use crate::core::pipeline::{MediaPipeline, YtdlpPipeline};
pub use crate::core::reporter::ProgressReporter;
pub use crate::core::resolver::{MetadataResolver, ResolvedMedia, YtdlpResolver};
pub use crate::core::store::{InMemoryJobStore, JobStore};
pub use error::{Error, FailureKind, PipelineError, Result};
