//! Raw-to-container transcoding seam.
//!
//! The recording task owns the raw MJPEG intermediate until the transcoder
//! confirms success; only then is the raw file deleted. On failure the raw
//! artifact stays on disk for manual recovery.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};

pub trait Transcoder: Send + Sync {
    /// Produce the final container next to `raw`, returning its path.
    /// Must leave `raw` untouched on failure.
    fn transcode(&self, raw: &Path) -> Result<PathBuf>;
}

/// Shells out to ffmpeg to wrap the raw MJPEG stream into an H.264 MP4.
pub struct FfmpegTranscoder {
    ffmpeg_bin: String,
    fps: u32,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_bin: impl Into<String>, fps: u32) -> Self {
        Self {
            ffmpeg_bin: ffmpeg_bin.into(),
            fps,
        }
    }
}

impl Transcoder for FfmpegTranscoder {
    fn transcode(&self, raw: &Path) -> Result<PathBuf> {
        let out = raw.with_extension("mp4");
        let status = Command::new(&self.ffmpeg_bin)
            .arg("-y")
            .args(["-f", "mjpeg"])
            .args(["-framerate", &self.fps.to_string()])
            .arg("-i")
            .arg(raw)
            .args(["-vcodec", "libx264", "-preset", "veryfast"])
            .arg(&out)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .with_context(|| format!("spawn {}", self.ffmpeg_bin))?;

        if !status.success() {
            // ffmpeg may leave a truncated output behind; don't ship it.
            let _ = std::fs::remove_file(&out);
            return Err(anyhow!(
                "{} exited with {} for {}",
                self.ffmpeg_bin,
                status,
                raw.display()
            ));
        }
        if !out.exists() {
            return Err(anyhow!(
                "{} reported success but produced no {}",
                self.ffmpeg_bin,
                out.display()
            ));
        }
        Ok(out)
    }
}
