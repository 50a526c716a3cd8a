use crate::models::media::RenditionOutput;
use std::path::{Path, PathBuf};

/// Normalize a human-readable bitrate to bits per second:
/// `k` multiplies by 1 000, `m` by 1 000 000, bare digits pass through.
pub fn parse_bitrate(raw: &str) -> Option<u64> {
    let t = raw.trim().to_ascii_lowercase();
    if let Some(v) = t.strip_suffix('k') {
        return Some((v.parse::<f64>().ok()? * 1_000.0) as u64);
    }
    if let Some(v) = t.strip_suffix('m') {
        return Some((v.parse::<f64>().ok()? * 1_000_000.0) as u64);
    }
    t.parse().ok()
}

/// Segment path for `seq` next to a sub-manifest: `720p.m3u8` → `720p_007.ts`.
pub fn segment_path(manifest_path: &Path, seq: u32) -> PathBuf {
    let stem = manifest_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    manifest_path.with_file_name(format!("{stem}_{seq:03}.ts"))
}

/// ffmpeg-style pattern matching [`segment_path`] naming.
pub fn segment_pattern(manifest_path: &Path) -> PathBuf {
    let stem = manifest_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    manifest_path.with_file_name(format!("{stem}_%03d.ts"))
}

/// Top-level adaptive manifest referencing exactly the renditions that
/// produced output, each with its normalized bandwidth and resolution.
pub fn master_manifest(renditions: &[RenditionOutput]) -> String {
    let mut out = String::from("#EXTM3U\n#EXT-X-VERSION:3\n");
    for r in renditions {
        let bandwidth = parse_bitrate(&r.profile.bitrate).unwrap_or(0);
        let uri = r
            .manifest_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        out.push_str(&format!(
            "#EXT-X-STREAM-INF:BANDWIDTH={bandwidth},RESOLUTION={}x{}\n{uri}\n",
            r.profile.width, r.profile.height
        ));
    }
    out
}
