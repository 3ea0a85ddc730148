//! The capture-and-detect loop.
//!
//! One continuous cycle at the camera rate: pull a frame, publish it to the
//! live slot, push it into the pre-roll ring, feed the detector. A trigger
//! saves the snapshot, delivers it, and hands the pre-roll snapshot to the
//! session manager; the session itself runs concurrently and never blocks
//! this loop.
//!
//! Camera failures propagate out of `run`; everything downstream of a
//! trigger is contained and logged.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::detect::{MotionDetector, MotionTrigger};
use crate::frame::{Frame, LiveFrameSlot, PreRollBuffer};
use crate::ingest::CameraSource;
use crate::notify::NotificationSink;
use crate::record::SessionManager;
use crate::storage;

#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub image_dir: PathBuf,
    pub jpeg_quality: u8,
}

pub struct CapturePipeline {
    source: CameraSource,
    buffer: PreRollBuffer,
    slot: Arc<LiveFrameSlot>,
    detector: MotionDetector,
    sessions: SessionManager,
    notifier: Arc<dyn NotificationSink>,
    config: PipelineConfig,
    active_session: Option<JoinHandle<()>>,
    triggers: u64,
}

impl CapturePipeline {
    pub fn new(
        source: CameraSource,
        buffer: PreRollBuffer,
        slot: Arc<LiveFrameSlot>,
        detector: MotionDetector,
        sessions: SessionManager,
        notifier: Arc<dyn NotificationSink>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            source,
            buffer,
            slot,
            detector,
            sessions,
            notifier,
            config,
            active_session: None,
            triggers: 0,
        }
    }

    /// Run until the shutdown flag is set. Source failures are fatal and
    /// propagate; an in-flight recording session is allowed to finish before
    /// returning.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<()> {
        let mut last_health_log = Instant::now();
        while !shutdown.load(Ordering::SeqCst) {
            self.tick()?;
            if last_health_log.elapsed() >= Duration::from_secs(30) {
                let stats = self.source.stats();
                log::info!(
                    "camera health={} frames={} source={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.source
                );
                last_health_log = Instant::now();
            }
        }
        self.wait_for_idle();
        Ok(())
    }

    /// One capture cycle.
    pub fn tick(&mut self) -> Result<()> {
        let frame = Arc::new(self.source.next_frame()?);
        self.slot.set(Arc::clone(&frame));
        self.buffer.push(Arc::clone(&frame));

        if let Some(trigger) = self
            .detector
            .observe(&frame, Instant::now(), self.sessions.gate())
        {
            self.handle_trigger(&frame, trigger);
        }
        Ok(())
    }

    /// Number of motion triggers since start.
    pub fn triggers(&self) -> u64 {
        self.triggers
    }

    /// Block until any in-flight recording session has finished.
    pub fn wait_for_idle(&mut self) {
        if let Some(session) = self.active_session.take() {
            if session.join().is_err() {
                log::error!("recording session thread panicked");
            }
        }
    }

    fn handle_trigger(&mut self, frame: &Arc<Frame>, trigger: MotionTrigger) {
        self.triggers += 1;
        log::info!(
            "motion detected: {} foreground px at t={}",
            trigger.foreground_pixels,
            trigger.epoch_s
        );

        // Snapshot first so the notification can carry it; neither failure
        // stops the recording.
        match storage::write_snapshot(
            &self.config.image_dir,
            frame,
            trigger.epoch_s,
            self.config.jpeg_quality,
        ) {
            Ok(path) => {
                if let Err(err) = self.notifier.deliver("Motion detected", Some(&path)) {
                    log::warn!("snapshot notification failed: {err:#}");
                }
            }
            Err(err) => log::warn!("snapshot write failed: {err:#}"),
        }

        // The gate is held; the previous session (if any) must already be
        // done, so reaping its handle cannot block.
        let preroll = self.buffer.snapshot();
        let handle = self.sessions.start(preroll, trigger.epoch_s);
        if let Some(previous) = self.active_session.replace(handle) {
            let _ = previous.join();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::MotionConfig;
    use crate::ingest::CameraConfig;
    use crate::notify::NullNotifier;
    use crate::record::{RecorderConfig, Transcoder};
    use crate::storage::FreeSpaceProbe;
    use std::path::Path;

    struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn transcode(&self, raw: &Path) -> Result<PathBuf> {
            let out = raw.with_extension("mp4");
            std::fs::copy(raw, &out)?;
            Ok(out)
        }
    }

    struct BottomlessVolume;

    impl FreeSpaceProbe for BottomlessVolume {
        fn free_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(u64::MAX)
        }
    }

    fn build_pipeline(
        image_dir: &Path,
        video_dir: &Path,
        motion: MotionConfig,
    ) -> CapturePipeline {
        let camera = CameraConfig {
            url: "stub://test".to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        };
        let mut source = CameraSource::new(camera).unwrap();
        source.connect().unwrap();

        let slot = Arc::new(LiveFrameSlot::new());
        let sessions = SessionManager::new(
            RecorderConfig {
                fps: 20,
                record_duration: Duration::from_millis(60),
                video_dir: video_dir.to_path_buf(),
                jpeg_quality: 80,
                min_free_bytes: 0,
            },
            Arc::clone(&slot),
            Arc::new(CopyTranscoder),
            Arc::new(NullNotifier),
            Arc::new(BottomlessVolume),
        );

        CapturePipeline::new(
            source,
            PreRollBuffer::new(16),
            slot,
            MotionDetector::new(motion),
            sessions,
            Arc::new(NullNotifier),
            PipelineConfig {
                image_dir: image_dir.to_path_buf(),
                jpeg_quality: 80,
            },
        )
    }

    #[test]
    fn quiet_pipeline_records_nothing() {
        let images = tempfile::tempdir().unwrap();
        let videos = tempfile::tempdir().unwrap();
        let motion = MotionConfig {
            pixel_threshold: usize::MAX,
            ..MotionConfig::default()
        };
        let mut pipeline = build_pipeline(images.path(), videos.path(), motion);

        for _ in 0..50 {
            pipeline.tick().unwrap();
        }
        assert_eq!(pipeline.triggers(), 0);
        assert!(pipeline.slot.latest().is_some());
        assert_eq!(pipeline.buffer.len(), 16);
        assert_eq!(std::fs::read_dir(images.path()).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(videos.path()).unwrap().count(), 0);
    }

    #[test]
    fn synthetic_motion_triggers_one_full_capture() {
        let images = tempfile::tempdir().unwrap();
        let videos = tempfile::tempdir().unwrap();
        // Analysis at capture size with a tight threshold so the synthetic
        // walking block is guaranteed to register.
        let motion = MotionConfig {
            pixel_threshold: 20,
            min_run_length: 2,
            cooldown: Duration::from_secs(300),
            diff_threshold: 20,
            blur_radius: 1,
            analysis_width: 64,
            analysis_height: 48,
        };
        let mut pipeline = build_pipeline(images.path(), videos.path(), motion);

        for _ in 0..60 {
            pipeline.tick().unwrap();
        }
        pipeline.wait_for_idle();

        // One episode within the cooldown window: exactly one trigger, one
        // snapshot, one finished clip with the raw intermediate gone.
        assert_eq!(pipeline.triggers(), 1);
        let snapshots: Vec<_> = std::fs::read_dir(images.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert!(snapshots[0].starts_with("capture_"));

        let clips: Vec<_> = std::fs::read_dir(videos.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(clips.len(), 1);
        assert!(clips[0].starts_with("video_"));
        assert!(clips[0].ends_with(".mp4"));
    }

    #[test]
    fn disconnected_camera_is_fatal_to_the_loop() {
        let images = tempfile::tempdir().unwrap();
        let videos = tempfile::tempdir().unwrap();
        let camera = CameraConfig {
            url: "http://127.0.0.1:9/stream".to_string(),
            target_fps: 0,
            width: 64,
            height: 48,
        };
        // No connect(): the first pull must fail, and tick must propagate it.
        let source = CameraSource::new(camera).unwrap();
        let slot = Arc::new(LiveFrameSlot::new());
        let sessions = SessionManager::new(
            RecorderConfig {
                fps: 20,
                record_duration: Duration::from_millis(10),
                video_dir: videos.path().to_path_buf(),
                jpeg_quality: 80,
                min_free_bytes: 0,
            },
            Arc::clone(&slot),
            Arc::new(CopyTranscoder),
            Arc::new(NullNotifier),
            Arc::new(BottomlessVolume),
        );
        let mut pipeline = CapturePipeline::new(
            source,
            PreRollBuffer::new(4),
            slot,
            MotionDetector::new(MotionConfig::default()),
            sessions,
            Arc::new(NullNotifier),
            PipelineConfig {
                image_dir: images.path().to_path_buf(),
                jpeg_quality: 80,
            },
        );
        assert!(pipeline.tick().is_err());
    }
}
