//! Persisted pointing calibration.
//!
//! The most recent successful plate solve is kept in memory and mirrored to a
//! small JSON file so a restart mid-night can keep drawing overlays without
//! solving again. Writes go through a temporary file and a rename.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{OpsError, OpsResult};
use crate::models::PointingCalibration;

/// Single-writer store for the current [`PointingCalibration`].
#[derive(Debug)]
pub struct CalibrationStore {
    path: PathBuf,
    current: RwLock<Option<PointingCalibration>>,
}

impl CalibrationStore {
    /// Open the store, loading any calibration already on disk.
    ///
    /// An unreadable or corrupt file is logged and treated as missing.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let current = match read_calibration(&path) {
            Ok(Some(cal)) => {
                info!(
                    path = %path.display(),
                    ra = cal.right_ascension.value(),
                    dec = cal.declination.value(),
                    timestamp = %cal.timestamp,
                    "Loaded pointing calibration"
                );
                Some(cal)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring unreadable calibration file");
                None
            }
        };
        Self {
            path,
            current: RwLock::new(current),
        }
    }

    /// In-memory store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::new(),
            current: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Option<PointingCalibration> {
        *self.current.read()
    }

    /// Replace the calibration and persist it.
    ///
    /// The in-memory value is updated even if the write fails.
    pub fn replace(&self, calibration: PointingCalibration) -> OpsResult<()> {
        *self.current.write() = Some(calibration);
        if self.path.as_os_str().is_empty() {
            return Ok(());
        }
        write_calibration(&self.path, &calibration)?;
        info!(
            path = %self.path.display(),
            ra = calibration.right_ascension.value(),
            dec = calibration.declination.value(),
            "Saved pointing calibration"
        );
        Ok(())
    }
}

fn read_calibration(path: &Path) -> OpsResult<Option<PointingCalibration>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let cal: PointingCalibration = serde_json::from_str(&content)
        .map_err(|e| OpsError::Internal(format!("invalid calibration JSON: {}", e)))?;
    // re-normalise in case the file was edited by hand
    Ok(Some(PointingCalibration::new(
        cal.timestamp,
        cal.right_ascension.value(),
        cal.declination.value(),
    )))
}

fn write_calibration(path: &Path, calibration: &PointingCalibration) -> OpsResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(calibration)
        .map_err(|e| OpsError::Internal(format!("failed to encode calibration: {}", e)))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
