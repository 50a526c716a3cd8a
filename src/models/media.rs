use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One rung of the encoding ladder. `bitrate` keeps the human-readable
/// `400k` / `2m` form; the manifest writer normalizes it to bits per second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenditionProfile {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub bitrate: String,
    pub fps: u32,
}

impl RenditionProfile {
    pub fn new(name: &str, width: u32, height: u32, bitrate: &str, fps: u32) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            bitrate: bitrate.to_string(),
            fps,
        }
    }
}

pub fn default_ladder() -> Vec<RenditionProfile> {
    vec![
        RenditionProfile::new("240p", 426, 240, "400k", 30),
        RenditionProfile::new("360p", 640, 360, "800k", 30),
        RenditionProfile::new("720p", 1280, 720, "2m", 30),
        RenditionProfile::new("1080p", 1920, 1080, "5m", 30),
        RenditionProfile::new("2160p", 3840, 2160, "15m", 30),
    ]
}

/// What `ffprobe` told us about the source.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceProbe {
    pub container: String,
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub has_audio: bool,
}

/// One produced rendition: its sub-manifest plus the segments it references.
#[derive(Debug, Clone)]
pub struct RenditionOutput {
    pub profile: RenditionProfile,
    pub manifest_path: PathBuf,
    pub segment_paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinRecord {
    pub content_address: String,
    pub size: u64,
    pub verified_at: Option<i64>,
}
