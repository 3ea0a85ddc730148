//! sentry-node
//!
//! This crate implements the control core of an unattended surveillance
//! node: it watches a live video source, detects motion against a rolling
//! one-frame baseline, and preserves evidence as a snapshot plus a clip
//! spanning the seconds before and after each trigger.
//!
//! # Architecture
//!
//! The capture-and-detect loop runs continuously at the camera rate; at most
//! one recording session runs beside it:
//!
//! 1. **Ingest**: `CameraSource` pulls frames (synthetic or HTTP camera).
//! 2. **Sharing**: each frame lands in the `LiveFrameSlot` (most recent
//!    frame, read by recorders and the live stream) and the `PreRollBuffer`
//!    (the last few seconds, snapshotted at trigger time).
//! 3. **Detection**: `MotionDetector` runs frame differencing with temporal
//!    hysteresis and a cooldown; its trigger decision claims the
//!    `SessionGate` atomically, so two sessions can never start.
//! 4. **Recording**: `SessionManager` writes pre-roll plus a live window to
//!    a raw MJPEG intermediate, transcodes it to MP4, delivers it, and
//!    enforces the free-space floor on the video store.
//! 5. **Surfaces**: the `api` server streams live frames and browses saved
//!    snapshots; `notify` pushes snapshots and clips to a webhook.
//!
//! # Module Structure
//!
//! - `frame`: Frame, PreRollBuffer, LiveFrameSlot
//! - `ingest`: camera sources
//! - `detect`: motion detector and pixel filters
//! - `record`: session gate, clip writer, transcoder, session manager
//! - `storage`: snapshot/clip stores and the free-space reclaimer
//! - `api` / `notify`: viewing surface and outbound notifications
//! - `capture`: the loop tying it all together

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

pub mod api;
pub mod capture;
pub mod codec;
pub mod config;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod notify;
pub mod record;
pub mod storage;

pub use capture::{CapturePipeline, PipelineConfig};
pub use config::SentrydConfig;
pub use detect::{MotionConfig, MotionDetector, MotionTrigger};
pub use frame::{Frame, LiveFrameSlot, PixelFormat, PreRollBuffer};
pub use ingest::{CameraConfig, CameraSource};
pub use notify::{NotificationSink, NullNotifier, WebhookNotifier};
pub use record::{FfmpegTranscoder, RecorderConfig, SessionGate, SessionManager, Transcoder};
pub use storage::{
    enforce_free_space_floor, list_snapshots, write_snapshot, FreeSpaceProbe, SnapshotEntry,
    VolumeProbe,
};

/// Seconds since the Unix epoch.
pub fn now_epoch_s() -> Result<u64> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs())
}
