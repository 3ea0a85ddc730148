//! Persisted artifact stores.
//!
//! Two flat directories hold the node's evidence: snapshots
//! (`capture_<unixSeconds>.jpg`) and clips (`video_<unixSeconds>.mp4`). This
//! module owns snapshot writing, the listing used by the viewing surface,
//! and the free-space reclaimer that keeps the video store from filling the
//! volume.

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::codec;
use crate::frame::Frame;

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

/// Write the triggering frame as `capture_<epoch>.jpg` in the image store.
pub fn write_snapshot(dir: &Path, frame: &Frame, epoch_s: u64, quality: u8) -> Result<PathBuf> {
    let path = dir.join(format!("capture_{epoch_s}.jpg"));
    let jpeg = codec::encode_jpeg(frame, quality)?;
    std::fs::write(&path, jpeg)
        .with_context(|| format!("write snapshot {}", path.display()))?;
    Ok(path)
}

/// One row of the snapshot listing. `timestamp` is the capture time parsed
/// from the filename, in seconds since epoch; unparseable names keep their
/// file but lose the timestamp.
#[derive(Clone, Debug, Serialize)]
pub struct SnapshotEntry {
    pub filename: String,
    pub timestamp: Option<u64>,
}

/// List the snapshot store, newest first.
pub fn list_snapshots(dir: &Path) -> Result<Vec<SnapshotEntry>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("read snapshot store {}", dir.display()))?
    {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort_unstable_by(|a, b| b.cmp(a));
    Ok(names
        .into_iter()
        .map(|filename| {
            let timestamp = parse_capture_timestamp(&filename);
            SnapshotEntry {
                filename,
                timestamp,
            }
        })
        .collect())
}

/// Parse the capture time out of a `capture_<unixSeconds>.<ext>` filename.
pub fn parse_capture_timestamp(name: &str) -> Option<u64> {
    // Compile once for repeated listings.
    static CAPTURE_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = CAPTURE_RE
        .get_or_init(|| regex::Regex::new(r"^capture_(\d+)\.[A-Za-z0-9]+$").unwrap());
    let caps = re.captures(name)?;
    caps[1].parse().ok()
}

// ----------------------------------------------------------------------------
// Free-space reclaimer
// ----------------------------------------------------------------------------

/// Free-space query for the volume backing a store directory. Behind a trait
/// so tests can model a volume without filling a disk.
pub trait FreeSpaceProbe: Send + Sync {
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

/// Probes the real volume via statvfs.
pub struct VolumeProbe;

impl FreeSpaceProbe for VolumeProbe {
    #[cfg(target_os = "linux")]
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        use std::os::unix::ffi::OsStrExt;
        let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
            .context("store path contains a NUL byte")?;
        let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
        let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("statvfs {}", path.display()));
        }
        Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
    }

    #[cfg(not(target_os = "linux"))]
    fn free_bytes(&self, _path: &Path) -> Result<u64> {
        // No portable probe on this platform; report the floor as satisfied
        // so eviction never fires.
        Ok(u64::MAX)
    }
}

/// Enforce the free-space floor on the volume backing `dir`.
///
/// At or above the floor this is a no-op. Below it, files are deleted oldest
/// first, re-probing after each deletion, until the floor is met or the
/// store is empty. Individual deletion failures are logged and skipped.
/// Returns the number of files deleted.
///
/// Callers must only invoke this after any in-flight session has fully
/// completed; the reclaimer assumes nothing in the store is still open.
pub fn enforce_free_space_floor(
    dir: &Path,
    min_free_bytes: u64,
    probe: &dyn FreeSpaceProbe,
) -> Result<usize> {
    if probe.free_bytes(dir)? >= min_free_bytes {
        return Ok(0);
    }

    let mut files = Vec::new();
    for entry in
        std::fs::read_dir(dir).with_context(|| format!("read video store {}", dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let meta = entry.metadata()?;
        let stamp = meta.created().or_else(|_| meta.modified()).unwrap_or(SystemTime::UNIX_EPOCH);
        files.push((stamp, entry.path()));
    }
    // Oldest first; path as tiebreak keeps the order deterministic when
    // timestamps collide.
    files.sort_unstable();

    let mut deleted = 0;
    for (_, path) in files {
        match std::fs::remove_file(&path) {
            Ok(()) => {
                deleted += 1;
                log::info!("evicted {} to reclaim space", path.display());
            }
            Err(err) => {
                log::warn!("failed to evict {}: {err}", path.display());
                continue;
            }
        }
        if probe.free_bytes(dir)? >= min_free_bytes {
            break;
        }
    }
    Ok(deleted)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
