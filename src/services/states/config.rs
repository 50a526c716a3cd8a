use crate::models::media::{RenditionProfile, default_ladder};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};

const CHUNK_ALIGN: u64 = 256 * 1024;
const CHUNK_MIN: u64 = 256 * 1024;
const CHUNK_MAX: u64 = 64 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct CommonConfig {
    pub host: Cow<'static, str>,
    pub port: usize,
    pub log_level: Cow<'static, str>,
    pub concurrency_limit: usize,
}

impl Default for CommonConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 18600,
            log_level: "info,spool=debug".into(),
            concurrency_limit: 256,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DataBaseConfig {
    pub db_url: Cow<'static, str>,
    pub sqlite_connection_nums: u32,
}

impl Default for DataBaseConfig {
    fn default() -> Self {
        Self {
            db_url: "sqlite://data/spool.db".into(),
            sqlite_connection_nums: 10,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadConfig {
    pub max_file_size_bytes: u64,
    pub chunk_size_bytes: u64,
    pub accepted_mime_types: Vec<Cow<'static, str>>,
    pub append_deadline_secs: u64,
    pub session_retention_days: u32,
    pub blob_root: PathBuf,
    pub public_media_base: Cow<'static, str>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 20 * 1024 * 1024 * 1024,
            chunk_size_bytes: 8 * 1024 * 1024,
            accepted_mime_types: vec![
                "video/mp4".into(),
                "video/quicktime".into(),
                "video/x-matroska".into(),
            ],
            append_deadline_secs: 300,
            session_retention_days: 30,
            blob_root: "data/blobs".into(),
            public_media_base: "/media".into(),
        }
    }
}

impl UploadConfig {
    /// Server-chosen chunk size: the configured target clamped to
    /// [256 KiB, 64 MiB] and rounded down to a 256 KiB multiple.
    pub fn effective_chunk_size(&self) -> u64 {
        let clamped = self.chunk_size_bytes.clamp(CHUNK_MIN, CHUNK_MAX);
        (clamped / CHUNK_ALIGN) * CHUNK_ALIGN
    }

    pub fn mime_accepted(&self, mime: &str) -> bool {
        self.accepted_mime_types.iter().any(|m| m.as_ref() == mime)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub concurrency: usize,
    pub queue_depth: usize,
    pub poll_interval_ms: u64,
    pub stage_retry_max: u32,
    pub retry_base_secs: u64,
    pub retry_factor: u32,
    pub retry_cap_secs: u64,
    pub lease_secs: u64,
    pub thumbnail_count: u32,
    pub ladder: Vec<RenditionProfile>,
    pub media_root: PathBuf,
    pub work_root: PathBuf,
    pub ffmpeg_path: Cow<'static, str>,
    pub ffprobe_path: Cow<'static, str>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            queue_depth: 256,
            poll_interval_ms: 500,
            stage_retry_max: 3,
            retry_base_secs: 5,
            retry_factor: 2,
            retry_cap_secs: 600,
            lease_secs: 600,
            thumbnail_count: 5,
            ladder: default_ladder(),
            media_root: "data/media".into(),
            work_root: "data/work".into(),
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PinConfig {
    pub verify: bool,
    pub cas_root: PathBuf,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            verify: true,
            cas_root: "data/cas".into(),
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub common: CommonConfig,
    pub db: DataBaseConfig,
    pub upload: UploadConfig,
    pub pipeline: PipelineConfig,
    pub pin: PinConfig,
}

impl AppConfig {
    pub fn load(cfg_path: &str) -> Result<Self, Box<figment::Error>> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Env::prefixed("SPOOL_").split("__").global());
        if Path::new(cfg_path).exists() {
            figment = figment.merge(Toml::file(cfg_path));
        }
        figment.extract().map_err(Into::into)
    }
}
