//! `plot-constellations` overlay renderer.

use std::fs;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::process;
use super::{OverlayRenderer, RenderRequest};
use crate::config::RendererSettings;
use crate::error::{OpsError, OpsResult};
use crate::pointing::wcs;

/// Renders overlays by repointing the solver's WCS header and invoking
/// `plot-constellations` on it.
#[derive(Debug, Clone)]
pub struct PlotConstellationsRenderer {
    settings: RendererSettings,
    wcs_template: PathBuf,
    scratch_dir: PathBuf,
}

impl PlotConstellationsRenderer {
    pub fn new(
        settings: RendererSettings,
        wcs_template: impl Into<PathBuf>,
        scratch_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            wcs_template: wcs_template.into(),
            scratch_dir: scratch_dir.into(),
        }
    }

    fn repointed_wcs_path(&self) -> PathBuf {
        self.scratch_dir.join("overlay.wcs")
    }

    /// Command-line arguments for one render.
    pub fn arguments(&self, request: &RenderRequest, wcs_path: &std::path::Path) -> Vec<String> {
        let mut args = vec![
            "-W".to_string(),
            request.width.to_string(),
            "-H".to_string(),
            request.height.to_string(),
            "-w".to_string(),
            wcs_path.display().to_string(),
            "-o".to_string(),
            request.output.display().to_string(),
            "-v".to_string(),
        ];
        args.extend(self.settings.extra_args.iter().cloned());
        if let Some(ephemeris) = &self.settings.ephemeris_file {
            args.push("-U".to_string());
            args.push(ephemeris.display().to_string());
        }
        args
    }
}

#[async_trait]
impl OverlayRenderer for PlotConstellationsRenderer {
    async fn render(&self, request: &RenderRequest) -> OpsResult<PathBuf> {
        if !self.wcs_template.exists() {
            return Err(OpsError::Render(format!(
                "missing WCS template {}",
                self.wcs_template.display()
            )));
        }
        if let Some(ephemeris) = &self.settings.ephemeris_file {
            if !ephemeris.exists() {
                return Err(OpsError::Render(format!(
                    "missing ephemeris file {}",
                    ephemeris.display()
                )));
            }
        }

        fs::create_dir_all(&self.scratch_dir)?;
        if let Some(parent) = request.output.parent() {
            fs::create_dir_all(parent)?;
        }
        let wcs_path = self.repointed_wcs_path();
        wcs::repoint_file(&self.wcs_template, &wcs_path, &request.center)?;
        debug!(
            ra = request.center.ra_deg(),
            dec = request.center.dec_deg(),
            wcs = %wcs_path.display(),
            "Repointed WCS header"
        );

        process::run(
            &self.settings.command,
            self.arguments(request, &wcs_path),
            self.settings.timeout(),
        )
        .await
        .map_err(|e| OpsError::Render(format!("{} {}", self.settings.command, e)))?;

        if !request.output.exists() {
            return Err(OpsError::Render(format!(
                "renderer produced no image at {}",
                request.output.display()
            )));
        }
        Ok(request.output.clone())
    }
}
