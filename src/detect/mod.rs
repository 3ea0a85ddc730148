//! Motion detection.
//!
//! `MotionDetector` turns the raw frame stream into discrete trigger events
//! using frame-to-frame differencing with temporal hysteresis and a cooldown
//! gate:
//!
//! 1. Each capture is reduced to a small, blurred intensity plane.
//! 2. The plane is diffed against the previous cycle's plane, binarized,
//!    then opened (erode + dilate) to drop single-pixel sensor noise.
//! 3. Foreground pixel counts above the configured threshold grow a
//!    consecutive-motion run; anything less resets it.
//! 4. A trigger fires only when the run reaches the configured length, the
//!    cooldown has elapsed, and the shared session gate can be claimed.
//!
//! The gate claim is a compare-and-swap, so the trigger decision and the
//! "session active" transition are one atomic step: a racing cycle can never
//! double-trigger.
//!
//! The baseline is the previous frame, not a long-term background model;
//! that trades robustness to slow lighting drift for low latency.

pub mod filters;

use std::time::{Duration, Instant};

use crate::frame::Frame;
use crate::record::SessionGate;

/// Tuning for the motion detector.
#[derive(Clone, Debug)]
pub struct MotionConfig {
    /// Foreground pixel count above which a cycle counts as motion.
    pub pixel_threshold: usize,
    /// Consecutive motion cycles required before a trigger fires.
    pub min_run_length: u32,
    /// Minimum spacing between triggers.
    pub cooldown: Duration,
    /// Per-pixel intensity delta treated as a change.
    pub diff_threshold: u8,
    /// Box blur radius applied to the analysis plane (kernel 2r+1).
    pub blur_radius: u32,
    /// Analysis plane dimensions; captures are downscaled to this size.
    pub analysis_width: u32,
    pub analysis_height: u32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            pixel_threshold: 1200,
            min_run_length: 2,
            cooldown: Duration::from_secs(20),
            diff_threshold: 20,
            blur_radius: 7,
            analysis_width: 480,
            analysis_height: 360,
        }
    }
}

/// A motion event that claimed the session gate.
///
/// The gate is already held when this is returned; the recording session is
/// responsible for releasing it.
#[derive(Clone, Copy, Debug)]
pub struct MotionTrigger {
    /// Capture time of the triggering frame, seconds since epoch.
    pub epoch_s: u64,
    /// Foreground pixel count of the triggering cycle.
    pub foreground_pixels: usize,
}

/// Stateful frame-differencing classifier. One instance per capture loop;
/// all detection state lives here, nothing ambient.
pub struct MotionDetector {
    config: MotionConfig,
    previous: Option<Vec<u8>>,
    run_length: u32,
    last_trigger: Option<Instant>,
}

impl MotionDetector {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
            run_length: 0,
            last_trigger: None,
        }
    }

    /// Feed one captured frame through the detector.
    ///
    /// `now` is passed explicitly so the temporal logic (cooldown, trigger
    /// spacing) is a pure function of its inputs. Returns a trigger only when
    /// the gate claim succeeded; the consecutive-motion counter and
    /// last-trigger stamp are updated in the same step.
    pub fn observe(&mut self, frame: &Frame, now: Instant, gate: &SessionGate) -> Option<MotionTrigger> {
        let comparison = self.comparison_plane(frame);

        let Some(previous) = self.previous.replace(comparison) else {
            // Cold start: baseline only.
            return None;
        };
        let current = self.previous.as_ref().expect("comparison plane just stored");

        let mask = filters::diff_mask(&previous, current, self.config.diff_threshold);
        let mask = filters::erode(&mask, self.config.analysis_width, self.config.analysis_height);
        let mask = filters::dilate(&mask, self.config.analysis_width, self.config.analysis_height);
        let foreground = filters::count_foreground(&mask);

        if foreground > self.config.pixel_threshold {
            self.run_length += 1;
        } else {
            self.run_length = 0;
        }

        if self.run_length < self.config.min_run_length {
            return None;
        }
        if !self.cooldown_elapsed(now) {
            return None;
        }
        // The gate claim is the decision point shared with the recording
        // task; on failure the run keeps growing and the next eligible cycle
        // retries.
        if !gate.try_acquire() {
            return None;
        }

        self.run_length = 0;
        self.last_trigger = Some(now);
        Some(MotionTrigger {
            epoch_s: frame.captured_at_epoch_s,
            foreground_pixels: foreground,
        })
    }

    fn comparison_plane(&self, frame: &Frame) -> Vec<u8> {
        let plane = filters::downscale_luma(
            frame.pixels(),
            frame.width,
            frame.height,
            self.config.analysis_width,
            self.config.analysis_height,
        );
        filters::box_blur(
            &plane,
            self.config.analysis_width,
            self.config.analysis_height,
            self.config.blur_radius,
        )
    }

    fn cooldown_elapsed(&self, now: Instant) -> bool {
        match self.last_trigger {
            Some(last) => now.duration_since(last) > self.config.cooldown,
            None => true,
        }
    }
}
