//! On-disk layout for frames and timelapses.
//!
//! ```text
//! <raw_root>/cloudcam<yymmdd>/cloudcam<yyyymmdd-HHMMSS>.jpg
//! <annotated_root>/cloudcamovr<yymmdd>/OVRcloudcam<yyyymmdd-HHMMSS>.jpg
//! <timelapse_root>/cloudcamtimelapse<yymmdd>.mp4
//! ```
//!
//! Folder dates use the local calendar day of the night's sunset, so a night
//! that crosses midnight stays in one folder even when the daemon restarts
//! after midnight. Frame names carry the UTC capture instant and sort
//! chronologically.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Utc};
use image::RgbImage;
use tracing::debug;

use crate::error::{OpsError, OpsResult};

const ANNOTATED_PREFIX: &str = "OVR";

#[derive(Debug, Clone)]
pub struct FrameStore {
    raw_root: PathBuf,
    annotated_root: PathBuf,
    timelapse_root: PathBuf,
    local_offset: FixedOffset,
}

impl FrameStore {
    pub fn new(
        raw_root: impl Into<PathBuf>,
        annotated_root: impl Into<PathBuf>,
        timelapse_root: impl Into<PathBuf>,
        utc_offset_hours: f64,
    ) -> OpsResult<Self> {
        let local_offset = local_offset(utc_offset_hours)?;
        Ok(Self {
            raw_root: raw_root.into(),
            annotated_root: annotated_root.into(),
            timelapse_root: timelapse_root.into(),
            local_offset,
        })
    }

    fn date_tag(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.local_offset).format("%y%m%d").to_string()
    }

    /// Create and return the raw and annotated folders for the night that
    /// began at `sunset`.
    pub fn session_dirs(&self, sunset: DateTime<Utc>) -> OpsResult<(PathBuf, PathBuf)> {
        let tag = self.date_tag(sunset);
        let raw = self.raw_root.join(format!("cloudcam{}", tag));
        let annotated = self.annotated_root.join(format!("cloudcamovr{}", tag));
        fs::create_dir_all(&raw)?;
        fs::create_dir_all(&annotated)?;
        Ok((raw, annotated))
    }

    pub fn raw_file_name(captured_at: DateTime<Utc>) -> String {
        format!("cloudcam{}.jpg", captured_at.format("%Y%m%d-%H%M%S"))
    }

    /// Write the camera's JPEG bytes unchanged.
    pub fn store_raw(&self, dir: &Path, captured_at: DateTime<Utc>, bytes: &[u8]) -> OpsResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(Self::raw_file_name(captured_at));
        fs::write(&path, bytes)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Stored raw frame");
        Ok(path)
    }

    /// Annotated counterpart of `raw` inside `dir`.
    pub fn annotated_path(dir: &Path, raw: &Path) -> OpsResult<PathBuf> {
        let name = raw
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OpsError::Internal(format!("frame path {} has no file name", raw.display())))?;
        Ok(dir.join(format!("{}{}", ANNOTATED_PREFIX, name)))
    }

    /// Encode `image` next to its siblings, format chosen by the raw extension.
    pub fn store_annotated(&self, dir: &Path, raw: &Path, image: &RgbImage) -> OpsResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = Self::annotated_path(dir, raw)?;
        image.save(&path)?;
        debug!(path = %path.display(), "Stored annotated frame");
        Ok(path)
    }

    /// Whole-night video for the night that began at `sunset`.
    pub fn timelapse_path(&self, sunset: DateTime<Utc>) -> PathBuf {
        self.timelapse_root
            .join(format!("cloudcamtimelapse{}.mp4", self.date_tag(sunset)))
    }

    /// Every frame stored in a night's folders, oldest first.
    ///
    /// Frames written before a restart are included. Each raw frame is
    /// replaced by its annotated counterpart when one exists.
    pub fn night_frames(&self, raw_dir: &Path, annotated_dir: &Path) -> OpsResult<Vec<PathBuf>> {
        let entries = match fs::read_dir(raw_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut raw = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && is_frame(&path) {
                raw.push(path);
            }
        }
        raw.sort();

        let mut frames = Vec::with_capacity(raw.len());
        for path in raw {
            let annotated = Self::annotated_path(annotated_dir, &path)?;
            frames.push(if annotated.is_file() { annotated } else { path });
        }
        Ok(frames)
    }

    /// Where the renderer writes the overlay for the current cycle.
    pub fn overlay_scratch_path(&self) -> PathBuf {
        self.annotated_root.join(".overlay.png")
    }

    /// Rolling summary video, overwritten on each refresh.
    pub fn summary_path(&self, annotated_dir: &Path) -> PathBuf {
        annotated_dir.join("summary.mp4")
    }
}

/// Site-local offset from a configured number of hours.
pub(crate) fn local_offset(utc_offset_hours: f64) -> OpsResult<FixedOffset> {
    let offset_secs = (utc_offset_hours * 3600.0).round() as i32;
    FixedOffset::east_opt(offset_secs).ok_or_else(|| {
        OpsError::Configuration(format!("invalid UTC offset {} h", utc_offset_hours))
    })
}

fn is_frame(path: &Path) -> bool {
    let named = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("cloudcam"))
        .unwrap_or(false);
    let image = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        .unwrap_or(false);
    named && image
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FrameStore {
        FrameStore::new(
            dir.path().join("raw"),
            dir.path().join("ovr"),
            dir.path().join("timelapses"),
            -10.0,
        )
        .unwrap()
    }

    #[test]
    fn test_session_dirs_use_local_sunset_date() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        // 05:30 UTC on the 17th is 19:30 HST on the 16th
        let start = Utc.with_ymd_and_hms(2025, 7, 17, 5, 30, 0).unwrap();
        let (raw, ovr) = store.session_dirs(start).unwrap();
        assert_eq!(raw, dir.path().join("raw").join("cloudcam250716"));
        assert_eq!(ovr, dir.path().join("ovr").join("cloudcamovr250716"));
        assert!(raw.is_dir());
        assert!(ovr.is_dir());
    }

    #[test]
    fn test_store_raw_names_by_utc_instant() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let at = Utc.with_ymd_and_hms(2025, 7, 17, 5, 30, 9).unwrap();
        let path = store.store_raw(&dir.path().join("night"), at, b"jpeg").unwrap();
        assert_eq!(path.file_name().unwrap(), "cloudcam20250717-053009.jpg");
        assert_eq!(fs::read(&path).unwrap(), b"jpeg");
    }

    #[test]
    fn test_store_annotated_prefixes_raw_name() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let raw = dir.path().join("cloudcam20250717-053009.png");
        let image = RgbImage::from_pixel(4, 3, image::Rgb([10, 20, 30]));
        let path = store
            .store_annotated(&dir.path().join("ovr"), &raw, &image)
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "OVRcloudcam20250717-053009.png");
        let decoded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(decoded.get_pixel(2, 1), &image::Rgb([10, 20, 30]));
    }

    #[test]
    fn test_timelapse_path() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let start = Utc.with_ymd_and_hms(2025, 7, 17, 5, 30, 0).unwrap();
        assert_eq!(
            store.timelapse_path(start),
            dir.path().join("timelapses").join("cloudcamtimelapse250716.mp4")
        );
    }

    #[test]
    fn test_night_frames_lists_folder_and_prefers_annotated() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let sunset = Utc.with_ymd_and_hms(2025, 7, 17, 5, 0, 0).unwrap();
        let (raw_dir, ovr_dir) = store.session_dirs(sunset).unwrap();

        let late = store
            .store_raw(&raw_dir, Utc.with_ymd_and_hms(2025, 7, 17, 11, 0, 0).unwrap(), b"b")
            .unwrap();
        let early = store
            .store_raw(&raw_dir, Utc.with_ymd_and_hms(2025, 7, 17, 6, 0, 0).unwrap(), b"a")
            .unwrap();
        fs::write(raw_dir.join("notes.txt"), "x").unwrap();
        let image = RgbImage::from_pixel(2, 2, image::Rgb([1, 2, 3]));
        let annotated = store.store_annotated(&ovr_dir, &early, &image).unwrap();

        let frames = store.night_frames(&raw_dir, &ovr_dir).unwrap();
        assert_eq!(frames, vec![annotated, late]);
    }

    #[test]
    fn test_night_frames_of_missing_folder_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let frames = store
            .night_frames(&dir.path().join("absent"), &dir.path().join("ovr"))
            .unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn test_invalid_offset_is_configuration_error() {
        let err = FrameStore::new("a", "b", "c", 48.0).unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }
}
