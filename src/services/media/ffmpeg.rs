use crate::models::media::{RenditionOutput, RenditionProfile, SourceProbe};
use crate::services::media::manifest::{parse_bitrate, segment_pattern};
use crate::services::media::{MediaEngine, MediaEngineError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Codecs the transcoder is prepared to decode; anything else fails the
/// session with `unsupported_codec`.
const SUPPORTED_VIDEO_CODECS: &[&str] = &[
    "h264",
    "hevc",
    "vp8",
    "vp9",
    "av1",
    "mpeg2video",
    "mpeg4",
    "prores",
    "theora",
    "mjpeg",
];

pub struct FfmpegEngine {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegEngine {
    pub fn new(ffmpeg: impl Into<String>, ffprobe: impl Into<String>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    avg_frame_rate: Option<String>,
}

/// `avg_frame_rate` comes as a fraction like `30000/1001`.
fn parse_fraction(raw: &str) -> Option<f64> {
    match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den != 0.0).then(|| num / den)
        }
        None => raw.parse().ok(),
    }
}

fn parse_probe_output(raw: &[u8]) -> Result<SourceProbe, MediaEngineError> {
    let parsed: FfprobeOutput = serde_json::from_slice(raw)
        .map_err(|e| MediaEngineError::ProbeFailed(format!("unreadable probe output: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or_else(|| MediaEngineError::ProbeFailed("no video stream".to_string()))?;
    if let Some(codec) = video.codec_name.as_deref()
        && !SUPPORTED_VIDEO_CODECS.contains(&codec)
    {
        return Err(MediaEngineError::UnsupportedCodec(codec.to_string()));
    }
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(MediaEngineError::ProbeFailed(
            "video stream has no dimensions".to_string(),
        ));
    };
    let duration_secs = parsed
        .format
        .duration
        .as_deref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);
    Ok(SourceProbe {
        container: parsed.format.format_name,
        duration_secs,
        width,
        height,
        fps: video
            .avg_frame_rate
            .as_deref()
            .and_then(parse_fraction)
            .unwrap_or(0.0),
        has_audio: parsed.streams.iter().any(|s| s.codec_type == "audio"),
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let trimmed = text.trim();
    match trimmed.char_indices().nth_back(499) {
        Some((idx, _)) => trimmed[idx..].to_string(),
        None => trimmed.to_string(),
    }
}

#[async_trait]
impl MediaEngine for FfmpegEngine {
    async fn probe(&self, input: &Path) -> Result<SourceProbe, MediaEngineError> {
        let out = Command::new(&self.ffprobe)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_format")
            .arg("-show_streams")
            .arg(input)
            .output()
            .await?;
        if !out.status.success() {
            return Err(MediaEngineError::ProbeFailed(stderr_tail(&out.stderr)));
        }
        parse_probe_output(&out.stdout)
    }

    async fn transcode(
        &self,
        input: &Path,
        profile: &RenditionProfile,
        manifest_path: &Path,
    ) -> Result<RenditionOutput, MediaEngineError> {
        if let Some(parent) = manifest_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bits = parse_bitrate(&profile.bitrate).ok_or_else(|| {
            MediaEngineError::TranscodeFailed {
                rendition: profile.name.clone(),
                msg: format!("unparseable bitrate {:?}", profile.bitrate),
            }
        })?;
        let pattern = segment_pattern(manifest_path);
        let out = Command::new(&self.ffmpeg)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .arg("-vf")
            .arg(format!("scale={}:{}", profile.width, profile.height))
            .arg("-r")
            .arg(profile.fps.to_string())
            .arg("-c:v")
            .arg("libx264")
            .arg("-preset")
            .arg("veryfast")
            .arg("-b:v")
            .arg(bits.to_string())
            .arg("-maxrate")
            .arg(bits.to_string())
            .arg("-bufsize")
            .arg((bits * 2).to_string())
            .arg("-c:a")
            .arg("aac")
            .arg("-b:a")
            .arg("128k")
            .arg("-f")
            .arg("hls")
            .arg("-hls_time")
            .arg("6")
            .arg("-hls_playlist_type")
            .arg("vod")
            .arg("-hls_segment_filename")
            .arg(&pattern)
            .arg(manifest_path)
            .output()
            .await?;
        if !out.status.success() {
            return Err(MediaEngineError::TranscodeFailed {
                rendition: profile.name.clone(),
                msg: stderr_tail(&out.stderr),
            });
        }
        let segment_paths = collect_segments(manifest_path, &profile.name).await?;
        Ok(RenditionOutput {
            profile: profile.clone(),
            manifest_path: manifest_path.to_path_buf(),
            segment_paths,
        })
    }

    async fn thumbnails(
        &self,
        input: &Path,
        duration_secs: f64,
        count: u32,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>, MediaEngineError> {
        tokio::fs::create_dir_all(out_dir).await?;
        let mut paths = Vec::with_capacity(count as usize);
        for i in 0..count {
            // interior spacing: a 10s clip with 5 thumbs samples at
            // 1.67s, 3.3s, 5s, 6.7s and 8.3s, never the black first frame
            let at = duration_secs * (i + 1) as f64 / (count + 1) as f64;
            let path = out_dir.join(format!("thumb_{i:02}.jpg"));
            let out = Command::new(&self.ffmpeg)
                .arg("-y")
                .arg("-ss")
                .arg(format!("{at:.3}"))
                .arg("-i")
                .arg(input)
                .arg("-frames:v")
                .arg("1")
                .arg("-vf")
                .arg("scale=320:240")
                .arg(&path)
                .output()
                .await?;
            if !out.status.success() {
                return Err(MediaEngineError::ThumbnailFailed(stderr_tail(&out.stderr)));
            }
            paths.push(path);
        }
        Ok(paths)
    }
}

/// Segments produced for a rendition: `<name>_NNN.ts` files next to the
/// sub-manifest, in sequence order.
async fn collect_segments(
    manifest_path: &Path,
    rendition: &str,
) -> Result<Vec<PathBuf>, MediaEngineError> {
    let Some(parent) = manifest_path.parent() else {
        return Ok(Vec::new());
    };
    let prefix = format!("{rendition}_");
    let mut segments = Vec::new();
    let mut entries = tokio::fs::read_dir(parent).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.starts_with(&prefix) && name.ends_with(".ts") {
            segments.push(entry.path());
        }
    }
    segments.sort();
    Ok(segments)
}
