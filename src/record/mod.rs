//! Recording sessions.
//!
//! A motion trigger hands the pre-roll snapshot to `SessionManager::start`,
//! which runs the session on its own thread so the capture loop never
//! blocks. The session writes pre-roll plus a fixed window of live frames to
//! a raw MJPEG intermediate, transcodes it to the final container, delivers
//! it, enforces the free-space floor, and releases the shared gate.
//!
//! `SessionGate` is the one piece of state shared between the capture loop
//! and the recording task: an atomic flag claimed with compare-and-swap at
//! trigger time and released when the session fully completes. At most one
//! session is ever active.

mod transcode;
mod writer;

pub use transcode::{FfmpegTranscoder, Transcoder};
pub use writer::ClipWriter;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::Result;

use crate::frame::{Frame, LiveFrameSlot};
use crate::notify::NotificationSink;
use crate::storage::{self, FreeSpaceProbe};

// ----------------------------------------------------------------------------
// SessionGate
// ----------------------------------------------------------------------------

/// At-most-one-session guard shared by the detector and the recording task.
#[derive(Clone, Default)]
pub struct SessionGate {
    active: Arc<AtomicBool>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the gate. Returns false if a session is already active.
    /// The compare-and-swap leaves no window where two claimants both read
    /// "inactive".
    pub fn try_acquire(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn release(&self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

/// Releases the gate when dropped, so every session exit path clears it.
struct GateRelease(SessionGate);

impl Drop for GateRelease {
    fn drop(&mut self) {
        self.0.release();
    }
}

// ----------------------------------------------------------------------------
// SessionManager
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RecorderConfig {
    pub fps: u32,
    /// Live-frame window appended after the pre-roll.
    pub record_duration: Duration,
    pub video_dir: PathBuf,
    pub jpeg_quality: u8,
    /// Free-space floor enforced on the video store after each session.
    pub min_free_bytes: u64,
}

/// Spawns and supervises recording sessions.
pub struct SessionManager {
    config: RecorderConfig,
    gate: SessionGate,
    slot: Arc<LiveFrameSlot>,
    transcoder: Arc<dyn Transcoder>,
    notifier: Arc<dyn NotificationSink>,
    probe: Arc<dyn FreeSpaceProbe>,
}

impl SessionManager {
    pub fn new(
        config: RecorderConfig,
        slot: Arc<LiveFrameSlot>,
        transcoder: Arc<dyn Transcoder>,
        notifier: Arc<dyn NotificationSink>,
        probe: Arc<dyn FreeSpaceProbe>,
    ) -> Self {
        Self {
            config,
            gate: SessionGate::new(),
            slot,
            transcoder,
            notifier,
            probe,
        }
    }

    /// The gate the detector claims at trigger time.
    pub fn gate(&self) -> &SessionGate {
        &self.gate
    }

    /// Run a session for an already-claimed gate.
    ///
    /// Takes the pre-roll snapshot captured at trigger time and returns the
    /// session thread's handle. Session failures are contained here: they are
    /// logged, the gate is released, and the capture loop stays untouched.
    pub fn start(&self, preroll: Vec<Arc<Frame>>, trigger_epoch_s: u64) -> JoinHandle<()> {
        let config = self.config.clone();
        let gate = self.gate.clone();
        let slot = Arc::clone(&self.slot);
        let transcoder = Arc::clone(&self.transcoder);
        let notifier = Arc::clone(&self.notifier);
        let probe = Arc::clone(&self.probe);

        std::thread::spawn(move || {
            let _release = GateRelease(gate);
            match run_session(&config, &slot, transcoder.as_ref(), preroll, trigger_epoch_s) {
                Ok(clip) => {
                    log::info!("recording session complete: {}", clip.display());
                    if let Err(err) = notifier.deliver("Recording finished", Some(&clip)) {
                        log::warn!("clip notification failed: {err:#}");
                    }
                }
                Err(err) => {
                    log::error!("recording session for t={trigger_epoch_s} failed: {err:#}");
                }
            }
            match storage::enforce_free_space_floor(
                &config.video_dir,
                config.min_free_bytes,
                probe.as_ref(),
            ) {
                Ok(0) => {}
                Ok(deleted) => log::info!("reclaimed {deleted} old clip(s) from video store"),
                Err(err) => log::warn!("storage reclaim failed: {err:#}"),
            }
        })
    }
}

fn run_session(
    config: &RecorderConfig,
    slot: &LiveFrameSlot,
    transcoder: &dyn Transcoder,
    preroll: Vec<Arc<Frame>>,
    trigger_epoch_s: u64,
) -> Result<PathBuf> {
    let raw_path = config
        .video_dir
        .join(format!("video_{trigger_epoch_s}.mjpeg"));
    let mut writer = ClipWriter::create(&raw_path, config.jpeg_quality)?;

    // Pre-roll first: the clip always opens with the lead-in context that
    // was in the ring at trigger time.
    for frame in &preroll {
        writer.append(frame)?;
    }

    // Then the live window, paced to the frame rate. If the slot has not
    // advanced we repeat the frame rather than stall.
    let interval = Duration::from_millis(1000 / config.fps.max(1) as u64);
    let started = Instant::now();
    while started.elapsed() < config.record_duration {
        if let Some(frame) = slot.latest() {
            writer.append(&frame)?;
        }
        std::thread::sleep(interval);
    }

    let (raw_path, frames) = writer.finish()?;
    log::debug!(
        "raw clip {} closed with {} frames",
        raw_path.display(),
        frames
    );

    let clip = transcoder.transcode(&raw_path)?;
    remove_raw_intermediate(&raw_path);
    Ok(clip)
}

fn remove_raw_intermediate(raw: &Path) {
    if let Err(err) = std::fs::remove_file(raw) {
        log::warn!("failed to remove raw intermediate {}: {err}", raw.display());
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;
    use crate::notify::NotificationSink;
    use std::sync::Mutex;

    struct CopyTranscoder;

    impl Transcoder for CopyTranscoder {
        fn transcode(&self, raw: &Path) -> Result<PathBuf> {
            let out = raw.with_extension("mp4");
            std::fs::copy(raw, &out)?;
            Ok(out)
        }
    }

    struct FailingTranscoder;

    impl Transcoder for FailingTranscoder {
        fn transcode(&self, _raw: &Path) -> Result<PathBuf> {
            anyhow::bail!("encoder unavailable")
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        calls: Mutex<Vec<(String, Option<PathBuf>)>>,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, label: &str, file: Option<&Path>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push((label.to_string(), file.map(Path::to_path_buf)));
            Ok(())
        }
    }

    struct BottomlessVolume;

    impl FreeSpaceProbe for BottomlessVolume {
        fn free_bytes(&self, _path: &Path) -> Result<u64> {
            Ok(u64::MAX)
        }
    }

    fn test_frame(shade: u8) -> Arc<Frame> {
        Arc::new(Frame::new(
            vec![shade; 8 * 8 * 3],
            8,
            8,
            PixelFormat::Rgb24,
            0,
        ))
    }

    fn manager(
        video_dir: &Path,
        transcoder: Arc<dyn Transcoder>,
        sink: Arc<RecordingSink>,
    ) -> SessionManager {
        let slot = Arc::new(LiveFrameSlot::new());
        slot.set(test_frame(9));
        SessionManager::new(
            RecorderConfig {
                fps: 20,
                record_duration: Duration::from_millis(120),
                video_dir: video_dir.to_path_buf(),
                jpeg_quality: 80,
                min_free_bytes: 0,
            },
            slot,
            transcoder,
            sink,
            Arc::new(BottomlessVolume),
        )
    }

    fn count_jpeg_starts(bytes: &[u8]) -> usize {
        bytes
            .windows(3)
            .filter(|w| w == &[0xFF, 0xD8, 0xFF])
            .count()
    }

    #[test]
    fn session_writes_preroll_then_live_and_cleans_up() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager(dir.path(), Arc::new(CopyTranscoder), Arc::clone(&sink));

        assert!(mgr.gate().try_acquire());
        let preroll: Vec<_> = (0..5).map(|i| test_frame(i * 40)).collect();
        mgr.start(preroll, 1_700_000_000).join().unwrap();

        assert!(!mgr.gate().is_active());

        let clip = dir.path().join("video_1700000000.mp4");
        assert!(clip.exists());
        assert!(!dir.path().join("video_1700000000.mjpeg").exists());

        // Full pre-roll plus at least one paced live frame.
        let bytes = std::fs::read(&clip).unwrap();
        assert!(count_jpeg_starts(&bytes) >= 6);

        let calls = sink.calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "Recording finished");
        assert_eq!(calls[0].1.as_deref(), Some(clip.as_path()));
    }

    #[test]
    fn transcode_failure_keeps_raw_and_skips_delivery() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager(dir.path(), Arc::new(FailingTranscoder), Arc::clone(&sink));

        assert!(mgr.gate().try_acquire());
        mgr.start(vec![test_frame(1)], 42).join().unwrap();

        assert!(!mgr.gate().is_active());
        assert!(dir.path().join("video_42.mjpeg").exists());
        assert!(!dir.path().join("video_42.mp4").exists());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn unopenable_output_aborts_session_and_releases_gate() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent");
        let sink = Arc::new(RecordingSink::default());
        let mgr = manager(&missing, Arc::new(CopyTranscoder), Arc::clone(&sink));

        assert!(mgr.gate().try_acquire());
        mgr.start(vec![test_frame(1)], 43).join().unwrap();

        assert!(!mgr.gate().is_active());
        assert!(sink.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn gate_admits_exactly_one_claimant() {
        let gate = SessionGate::new();
        assert!(gate.try_acquire());
        assert!(!gate.try_acquire());
        assert!(gate.is_active());
        gate.release();
        assert!(gate.try_acquire());
    }
}
