//! Frame types and the two shared frame stores.
//!
//! - `Frame`: immutable-once-captured pixel grid, tagged with its capture time.
//! - `PreRollBuffer`: bounded FIFO of the most recent frames, snapshotted at
//!   trigger time so a recording always carries lead-in context.
//! - `LiveFrameSlot`: single-slot most-recent-frame store, overwritten every
//!   capture cycle and read by a concurrent recorder.
//!
//! Frames are shared as `Arc<Frame>` so the capture loop, the recording task
//! and the viewing surface never copy pixel data and never observe a torn
//! frame: a reader either sees the previous frame or the new one, whole.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Pixel layout of a captured frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit-per-channel RGB, row-major, no padding.
    Rgb24,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
        }
    }
}

/// A single captured frame.
///
/// Pixel data is private; readers go through `pixels()`. Frames are never
/// mutated after construction.
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    /// Capture time in seconds since the Unix epoch.
    pub captured_at_epoch_s: u64,
}

impl Frame {
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at_epoch_s: u64,
    ) -> Self {
        debug_assert_eq!(
            data.len(),
            width as usize * height as usize * format.bytes_per_pixel()
        );
        Self {
            data,
            width,
            height,
            format,
            captured_at_epoch_s,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

// ----------------------------------------------------------------------------
// PreRollBuffer: bounded FIFO of recent frames
// ----------------------------------------------------------------------------

/// Fixed-capacity ring of the most recent frames.
///
/// `push` is O(1) and evicts the oldest frame exactly when the buffer is
/// full. `snapshot` returns an ordered copy of the current contents and is
/// safe to call concurrently with `push`: both serialize on the same lock, so
/// a snapshot can never observe a frame twice or lose one to a mid-read
/// eviction.
pub struct PreRollBuffer {
    inner: Mutex<VecDeque<Arc<Frame>>>,
    capacity: usize,
}

impl PreRollBuffer {
    /// Capacity is fixed at construction; a zero capacity is clamped to one
    /// frame so `push` never has to fail.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Capacity sized for `pre_record_secs` of footage at `fps`.
    pub fn for_pre_roll(pre_record_secs: u32, fps: u32) -> Self {
        Self::new(pre_record_secs as usize * fps as usize)
    }

    pub fn push(&self, frame: Arc<Frame>) {
        let mut inner = self.inner.lock().expect("pre-roll buffer poisoned");
        if inner.len() == self.capacity {
            inner.pop_front();
        }
        inner.push_back(frame);
    }

    /// Ordered copy of the current contents, oldest first.
    pub fn snapshot(&self) -> Vec<Arc<Frame>> {
        let inner = self.inner.lock().expect("pre-roll buffer poisoned");
        inner.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("pre-roll buffer poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

// ----------------------------------------------------------------------------
// LiveFrameSlot: single-slot most-recent-frame store
// ----------------------------------------------------------------------------

/// Most-recent-frame slot shared between the capture loop (writer) and any
/// concurrent reader (recording task, live stream).
///
/// The slot holds an `Arc`, so `set` is an atomic reference swap under the
/// lock and `latest` hands back a whole frame; readers can never see a
/// partially written one.
#[derive(Default)]
pub struct LiveFrameSlot {
    inner: Mutex<Option<Arc<Frame>>>,
}

impl LiveFrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the slot unconditionally.
    pub fn set(&self, frame: Arc<Frame>) {
        *self.inner.lock().expect("live slot poisoned") = Some(frame);
    }

    /// The most recently captured frame, or `None` before the first one.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.inner.lock().expect("live slot poisoned").clone()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_tagged(id: u64) -> Arc<Frame> {
        // 2x2 RGB frame whose first byte encodes the id for inspection.
        let mut data = vec![0u8; 12];
        data[0] = id as u8;
        Arc::new(Frame::new(data, 2, 2, PixelFormat::Rgb24, id))
    }

    #[test]
    fn buffer_never_exceeds_capacity() {
        let buf = PreRollBuffer::new(8);
        for i in 0..50 {
            buf.push(frame_tagged(i));
            assert!(buf.len() <= 8);
        }
        assert_eq!(buf.len(), 8);
    }

    #[test]
    fn buffer_keeps_most_recent_frames_in_order() {
        // 20 fps x 3 s pre-roll = 60 frames; pushing 100 leaves 41..=100.
        let buf = PreRollBuffer::for_pre_roll(3, 20);
        assert_eq!(buf.capacity(), 60);
        for i in 1..=100u64 {
            buf.push(frame_tagged(i));
        }
        let snap = buf.snapshot();
        assert_eq!(snap.len(), 60);
        let ids: Vec<u64> = snap.iter().map(|f| f.captured_at_epoch_s).collect();
        let expected: Vec<u64> = (41..=100).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let buf = PreRollBuffer::new(4);
        buf.push(frame_tagged(1));
        let snap = buf.snapshot();
        buf.push(frame_tagged(2));
        assert_eq!(snap.len(), 1);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn snapshot_is_consistent_under_concurrent_pushes() {
        let buf = Arc::new(PreRollBuffer::new(16));
        let writer = {
            let buf = Arc::clone(&buf);
            std::thread::spawn(move || {
                for i in 0..500 {
                    buf.push(frame_tagged(i));
                }
            })
        };
        for _ in 0..100 {
            let snap = buf.snapshot();
            assert!(snap.len() <= 16);
            // Capture order must be preserved within every snapshot.
            for pair in snap.windows(2) {
                assert!(pair[0].captured_at_epoch_s < pair[1].captured_at_epoch_s);
            }
        }
        writer.join().unwrap();
    }

    #[test]
    fn live_slot_is_empty_until_first_frame() {
        let slot = LiveFrameSlot::new();
        assert!(slot.latest().is_none());
        slot.set(frame_tagged(7));
        assert_eq!(slot.latest().unwrap().captured_at_epoch_s, 7);
        slot.set(frame_tagged(8));
        assert_eq!(slot.latest().unwrap().captured_at_epoch_s, 8);
    }
}
