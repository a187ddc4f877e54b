//! astrometry.net `solve-field` wrapper.
//!
//! The solver runs against a staging prefix; only a successful run replaces
//! `<prefix>.wcs`, which the overlay renderer uses as its projection
//! template. A failed solve therefore never clobbers a good header.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use super::process;
use super::PlateSolver;
use crate::config::SolverSettings;
use crate::error::{OpsError, OpsResult};
use crate::models::PointingCalibration;
use crate::pointing::wcs;

/// Plate solver backed by the `solve-field` command-line tool.
#[derive(Debug, Clone)]
pub struct AstrometryNetSolver {
    settings: SolverSettings,
    output_dir: PathBuf,
}

impl AstrometryNetSolver {
    pub fn new(settings: SolverSettings, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings,
            output_dir: output_dir.into(),
        }
    }

    /// WCS header of the most recent successful solve.
    pub fn wcs_path(&self) -> PathBuf {
        self.output_dir.join(format!("{}.wcs", self.settings.prefix))
    }

    fn staging_prefix(&self) -> String {
        format!("{}-attempt", self.settings.prefix)
    }

    /// Command-line arguments for solving `frame`.
    pub fn arguments(&self, frame: &Path) -> Vec<String> {
        let s = &self.settings;
        let mut args = vec![
            frame.display().to_string(),
            "-o".to_string(),
            self.staging_prefix(),
            "-D".to_string(),
            self.output_dir.display().to_string(),
            "--scale-units".to_string(),
            "degwidth".to_string(),
            "--scale-low".to_string(),
            s.scale_low_deg.to_string(),
            "--scale-high".to_string(),
            s.scale_high_deg.to_string(),
            "--objs".to_string(),
            s.max_objects.to_string(),
            "--sigma".to_string(),
            s.sigma.to_string(),
            "--overwrite".to_string(),
        ];
        if let Some(index_dir) = &s.index_dir {
            args.push("--index-dir".to_string());
            args.push(index_dir.display().to_string());
        }
        // suppress every by-product except the WCS header
        for flag in ["-N", "-S", "-M", "-R", "-i", "-n", "-U", "--axy", "-B"] {
            args.push(flag.to_string());
            args.push("none".to_string());
        }
        args.push("-p".to_string());
        args
    }
}

#[async_trait]
impl PlateSolver for AstrometryNetSolver {
    async fn solve(&self, frame: &Path, captured_at: DateTime<Utc>) -> OpsResult<PointingCalibration> {
        fs::create_dir_all(&self.output_dir)?;
        let staged = self.output_dir.join(format!("{}.wcs", self.staging_prefix()));
        if staged.exists() {
            fs::remove_file(&staged)?;
        }

        info!(frame = %frame.display(), "Running plate solver");
        process::run(&self.settings.command, self.arguments(frame), self.settings.timeout())
            .await
            .map_err(|e| OpsError::Solver(format!("{} {}", self.settings.command, e)))?;

        if !staged.exists() {
            return Err(OpsError::Solver(format!(
                "no solution for {}",
                frame.display()
            )));
        }
        let center = wcs::read_center_file(&staged)?;
        fs::rename(&staged, self.wcs_path())?;

        let calibration = PointingCalibration::new(captured_at, center.ra_deg(), center.dec_deg());
        info!(
            ra = calibration.right_ascension.value(),
            dec = calibration.declination.value(),
            "Plate solve succeeded"
        );
        Ok(calibration)
    }

    fn solution_present(&self) -> bool {
        self.wcs_path().is_file()
    }
}
