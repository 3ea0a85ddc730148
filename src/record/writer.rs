//! Raw clip stream writer.
//!
//! The recording task writes its intermediate artifact as an MJPEG stream:
//! one JPEG per frame, concatenated. The transcoder turns it into the final
//! deliverable container afterwards.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::codec;
use crate::frame::Frame;

pub struct ClipWriter {
    out: BufWriter<File>,
    path: PathBuf,
    quality: u8,
    frames_written: u64,
}

impl ClipWriter {
    /// Open the raw stream. Failure here aborts the owning session.
    pub fn create(path: &Path, quality: u8) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("open raw clip stream {}", path.display()))?;
        Ok(Self {
            out: BufWriter::new(file),
            path: path.to_path_buf(),
            quality,
            frames_written: 0,
        })
    }

    pub fn append(&mut self, frame: &Frame) -> Result<()> {
        let jpeg = codec::encode_jpeg(frame, self.quality)?;
        self.out
            .write_all(&jpeg)
            .with_context(|| format!("append frame to {}", self.path.display()))?;
        self.frames_written += 1;
        Ok(())
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Flush and close the stream, returning its path and frame count.
    pub fn finish(mut self) -> Result<(PathBuf, u64)> {
        self.out
            .flush()
            .with_context(|| format!("flush raw clip stream {}", self.path.display()))?;
        Ok((self.path, self.frames_written))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::PixelFormat;

    fn frame(shade: u8) -> Frame {
        Frame::new(vec![shade; 8 * 8 * 3], 8, 8, PixelFormat::Rgb24, 0)
    }

    fn count_jpeg_starts(bytes: &[u8]) -> usize {
        bytes
            .windows(3)
            .filter(|w| w == &[0xFF, 0xD8, 0xFF])
            .count()
    }

    #[test]
    fn writes_one_jpeg_per_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mjpeg");
        let mut writer = ClipWriter::create(&path, 80).unwrap();
        for shade in [0u8, 128, 255] {
            writer.append(&frame(shade)).unwrap();
        }
        let (out_path, frames) = writer.finish().unwrap();
        assert_eq!(frames, 3);

        let bytes = std::fs::read(out_path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(count_jpeg_starts(&bytes), 3);
    }

    #[test]
    fn create_fails_on_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("clip.mjpeg");
        assert!(ClipWriter::create(&path, 80).is_err());
    }
}
