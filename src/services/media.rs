pub mod ffmpeg;
pub mod ladder;
pub mod manifest;

use crate::models::media::{RenditionOutput, RenditionProfile, SourceProbe};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum MediaEngineError {
    #[error("probe failed: {0}")]
    ProbeFailed(String),
    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),
    #[error("transcode failed for {rendition}: {msg}")]
    TranscodeFailed { rendition: String, msg: String },
    #[error("thumbnail extraction failed: {0}")]
    ThumbnailFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl MediaEngineError {
    /// Only plain I/O faults are worth re-driving; a decoder that rejected
    /// the input will reject it again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MediaEngineError::Io(_))
    }

    /// Error code recorded on the session when the failure is terminal.
    pub fn error_code(&self) -> &'static str {
        match self {
            MediaEngineError::ProbeFailed(_) => "probe_failed",
            MediaEngineError::UnsupportedCodec(_) => "unsupported_codec",
            MediaEngineError::TranscodeFailed { .. } => "transcode_failed",
            MediaEngineError::ThumbnailFailed(_) => "thumbnail_failed",
            MediaEngineError::Io(_) => "io_failed",
        }
    }
}

/// Probing, transcoding and thumbnail extraction. The production engine
/// shells out to ffmpeg/ffprobe; orchestrator tests script this trait.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn probe(&self, input: &Path) -> Result<SourceProbe, MediaEngineError>;

    /// Produce one rendition as an HLS sub-manifest plus segments next to
    /// `manifest_path`. Existing outputs are overwritten.
    async fn transcode(
        &self,
        input: &Path,
        profile: &RenditionProfile,
        manifest_path: &Path,
    ) -> Result<RenditionOutput, MediaEngineError>;

    /// Extract `count` equally spaced 320x240 JPEG frames into `out_dir`.
    async fn thumbnails(
        &self,
        input: &Path,
        duration_secs: f64,
        count: u32,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, MediaEngineError>;
}
