use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::MotionConfig;
use crate::ingest::CameraConfig;
use crate::record::RecorderConfig;

const DEFAULT_IMAGE_DIR: &str = "sentry_media/images";
const DEFAULT_VIDEO_DIR: &str = "sentry_media/videos";
const DEFAULT_API_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_CAMERA_URL: &str = "stub://front_door";
const DEFAULT_FPS: u32 = 20;
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_PRE_RECORD_SECS: u32 = 3;
const DEFAULT_RECORD_SECS: u32 = 10;
const DEFAULT_COOLDOWN_SECS: u64 = 20;
const DEFAULT_PIXEL_THRESHOLD: usize = 1200;
const DEFAULT_MIN_RUN_FRAMES: u32 = 2;
const DEFAULT_MIN_FREE_BYTES: u64 = 1024 * 1024 * 1024;
const DEFAULT_JPEG_QUALITY: u8 = 80;
const DEFAULT_FFMPEG_BIN: &str = "ffmpeg";

#[derive(Debug, Deserialize, Default)]
struct SentrydConfigFile {
    image_dir: Option<PathBuf>,
    video_dir: Option<PathBuf>,
    api: Option<ApiConfigFile>,
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
    recording: Option<RecordingConfigFile>,
    storage: Option<StorageConfigFile>,
    notify: Option<NotifyConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    pixel_threshold: Option<usize>,
    min_run_frames: Option<u32>,
    cooldown_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RecordingConfigFile {
    pre_record_seconds: Option<u32>,
    record_seconds: Option<u32>,
    jpeg_quality: Option<u8>,
    ffmpeg_bin: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    min_free_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct NotifyConfigFile {
    webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SentrydConfig {
    pub image_dir: PathBuf,
    pub video_dir: PathBuf,
    pub api_addr: String,
    pub camera: CameraSettings,
    pub motion: MotionSettings,
    pub recording: RecordingSettings,
    pub min_free_bytes: u64,
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub url: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct MotionSettings {
    pub pixel_threshold: usize,
    pub min_run_frames: u32,
    pub cooldown: Duration,
}

#[derive(Debug, Clone)]
pub struct RecordingSettings {
    pub pre_record_secs: u32,
    pub record_secs: u32,
    pub jpeg_quality: u8,
    pub ffmpeg_bin: String,
}

impl SentrydConfig {
    /// Load configuration: optional JSON file (explicit path or
    /// `SENTRY_CONFIG`), then `SENTRY_*` environment overrides, then
    /// validation.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var("SENTRY_CONFIG").ok().map(PathBuf::from);
        let path = config_path.map(Path::to_path_buf).or(env_path);
        let file_cfg = match path.as_deref() {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentrydConfigFile) -> Self {
        let camera = CameraSettings {
            url: file
                .camera
                .as_ref()
                .and_then(|camera| camera.url.clone())
                .unwrap_or_else(|| DEFAULT_CAMERA_URL.to_string()),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_FPS),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
        };
        let motion = MotionSettings {
            pixel_threshold: file
                .motion
                .as_ref()
                .and_then(|motion| motion.pixel_threshold)
                .unwrap_or(DEFAULT_PIXEL_THRESHOLD),
            min_run_frames: file
                .motion
                .as_ref()
                .and_then(|motion| motion.min_run_frames)
                .unwrap_or(DEFAULT_MIN_RUN_FRAMES),
            cooldown: Duration::from_secs(
                file.motion
                    .as_ref()
                    .and_then(|motion| motion.cooldown_seconds)
                    .unwrap_or(DEFAULT_COOLDOWN_SECS),
            ),
        };
        let recording = RecordingSettings {
            pre_record_secs: file
                .recording
                .as_ref()
                .and_then(|rec| rec.pre_record_seconds)
                .unwrap_or(DEFAULT_PRE_RECORD_SECS),
            record_secs: file
                .recording
                .as_ref()
                .and_then(|rec| rec.record_seconds)
                .unwrap_or(DEFAULT_RECORD_SECS),
            jpeg_quality: file
                .recording
                .as_ref()
                .and_then(|rec| rec.jpeg_quality)
                .unwrap_or(DEFAULT_JPEG_QUALITY),
            ffmpeg_bin: file
                .recording
                .as_ref()
                .and_then(|rec| rec.ffmpeg_bin.clone())
                .unwrap_or_else(|| DEFAULT_FFMPEG_BIN.to_string()),
        };
        Self {
            image_dir: file
                .image_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
            video_dir: file
                .video_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIDEO_DIR)),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            camera,
            motion,
            recording,
            min_free_bytes: file
                .storage
                .and_then(|storage| storage.min_free_bytes)
                .unwrap_or(DEFAULT_MIN_FREE_BYTES),
            webhook_url: file.notify.and_then(|notify| notify.webhook_url),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("SENTRY_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(url) = std::env::var("SENTRY_CAMERA_URL") {
            if !url.trim().is_empty() {
                self.camera.url = url;
            }
        }
        if let Ok(dir) = std::env::var("SENTRY_IMAGE_DIR") {
            if !dir.trim().is_empty() {
                self.image_dir = PathBuf::from(dir);
            }
        }
        if let Ok(dir) = std::env::var("SENTRY_VIDEO_DIR") {
            if !dir.trim().is_empty() {
                self.video_dir = PathBuf::from(dir);
            }
        }
        if let Ok(url) = std::env::var("SENTRY_WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.webhook_url = Some(url);
            }
        }
        if let Ok(floor) = std::env::var("SENTRY_MIN_FREE_BYTES") {
            let bytes: u64 = floor
                .parse()
                .map_err(|_| anyhow!("SENTRY_MIN_FREE_BYTES must be an integer byte count"))?;
            self.min_free_bytes = bytes;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.recording.pre_record_secs == 0 {
            return Err(anyhow!("pre_record_seconds must be greater than zero"));
        }
        if self.recording.record_secs == 0 {
            return Err(anyhow!("record_seconds must be greater than zero"));
        }
        if !(1..=100).contains(&self.recording.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if self.motion.min_run_frames == 0 {
            return Err(anyhow!("min_run_frames must be greater than zero"));
        }
        Ok(())
    }

    /// Detector tuning derived from this configuration.
    pub fn motion_config(&self) -> MotionConfig {
        MotionConfig {
            pixel_threshold: self.motion.pixel_threshold,
            min_run_length: self.motion.min_run_frames,
            cooldown: self.motion.cooldown,
            ..MotionConfig::default()
        }
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            url: self.camera.url.clone(),
            target_fps: self.camera.target_fps,
            width: self.camera.width,
            height: self.camera.height,
        }
    }

    pub fn recorder_config(&self) -> RecorderConfig {
        RecorderConfig {
            fps: self.camera.target_fps,
            record_duration: Duration::from_secs(self.recording.record_secs as u64),
            video_dir: self.video_dir.clone(),
            jpeg_quality: self.recording.jpeg_quality,
            min_free_bytes: self.min_free_bytes,
        }
    }

    /// Pre-roll capacity in frames.
    pub fn pre_roll_capacity(&self) -> usize {
        self.recording.pre_record_secs as usize * self.camera.target_fps as usize
    }
}

fn read_config_file(path: &Path) -> Result<SentrydConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}
