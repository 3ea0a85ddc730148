//! sentryd - motion-triggered capture daemon
//!
//! This daemon:
//! 1. Pulls frames from the configured camera source
//! 2. Keeps the live slot and pre-roll ring current
//! 3. Runs motion detection with hysteresis and a trigger cooldown
//! 4. On a trigger, saves a snapshot and records a pre-roll + live clip
//! 5. Transcodes, delivers, and enforces the free-space floor per session
//! 6. Serves the live stream and snapshot browser over HTTP

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use sentry_node::api::{ApiConfig, ApiServer};
use sentry_node::notify::{NotificationSink, NullNotifier, WebhookNotifier};
use sentry_node::storage::VolumeProbe;
use sentry_node::{
    CameraSource, CapturePipeline, FfmpegTranscoder, LiveFrameSlot, MotionDetector,
    PipelineConfig, PreRollBuffer, SentrydConfig, SessionManager,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to a JSON configuration file.
    #[arg(long, env = "SENTRY_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = SentrydConfig::load(args.config.as_deref())?;

    std::fs::create_dir_all(&cfg.image_dir)
        .with_context(|| format!("create image store {}", cfg.image_dir.display()))?;
    std::fs::create_dir_all(&cfg.video_dir)
        .with_context(|| format!("create video store {}", cfg.video_dir.display()))?;

    let slot = Arc::new(LiveFrameSlot::new());

    let api_config = ApiConfig {
        addr: cfg.api_addr.clone(),
        stream_fps: cfg.camera.target_fps,
        jpeg_quality: cfg.recording.jpeg_quality,
    };
    let api_handle = ApiServer::new(api_config, Arc::clone(&slot), cfg.image_dir.clone()).spawn()?;
    log::info!("viewing surface listening on {}", api_handle.addr);

    let notifier: Arc<dyn NotificationSink> = match &cfg.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => {
            log::warn!("no webhook configured; notifications will be dropped");
            Arc::new(NullNotifier)
        }
    };

    let mut source = CameraSource::new(cfg.camera_config())?;
    source.connect()?;

    let sessions = SessionManager::new(
        cfg.recorder_config(),
        Arc::clone(&slot),
        Arc::new(FfmpegTranscoder::new(
            cfg.recording.ffmpeg_bin.clone(),
            cfg.camera.target_fps,
        )),
        Arc::clone(&notifier),
        Arc::new(VolumeProbe),
    );

    let mut pipeline = CapturePipeline::new(
        source,
        PreRollBuffer::new(cfg.pre_roll_capacity()),
        slot,
        MotionDetector::new(cfg.motion_config()),
        sessions,
        notifier,
        PipelineConfig {
            image_dir: cfg.image_dir.clone(),
            jpeg_quality: cfg.recording.jpeg_quality,
        },
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested");
        shutdown_flag.store(true, Ordering::SeqCst);
    })
    .context("install shutdown handler")?;

    log::info!(
        "sentryd running: camera={} fps={} pre-roll={} frames, cooldown={}s",
        cfg.camera.url,
        cfg.camera.target_fps,
        cfg.pre_roll_capacity(),
        cfg.motion.cooldown.as_secs()
    );

    let result = pipeline.run(&shutdown);

    if let Err(err) = api_handle.stop() {
        log::warn!("api server stop failed: {err:#}");
    }
    result
}
