//! External collaborators of the night loop.
//!
//! Each concern is a trait so the scheduler can be driven by fakes in tests:
//!
//! - [`SunTimeSource`]: sunrise/sunset lookups (`ssGet` at the observatory)
//! - [`StatusSink`]: operator-visible status values (`ssPut`)
//! - [`PlateSolver`]: astrometric calibration of a stored frame (`solve-field`)
//! - [`OverlayRenderer`]: constellation overlay for a given center (`plot-constellations`)
//! - [`TimelapseAssembler`]: frames to video (`ffmpeg`)
//!
//! [`FrameStore`] is the on-disk layout for raw and annotated frames and
//! [`Captioner`] stamps the timestamp caption on annotated ones.

pub mod caption;
pub mod command;
mod process;
pub mod renderer;
pub mod solver;
pub mod storage;
pub mod timelapse;

pub use caption::Captioner;
pub use command::{CommandStatusSink, CommandSunTimeSource};
pub use renderer::PlotConstellationsRenderer;
pub use solver::AstrometryNetSolver;
pub use storage::FrameStore;
pub use timelapse::FfmpegTimelapse;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::OpsResult;
use crate::models::{PointingCalibration, SkyCoordinate, SunEvent};

/// Source of sunrise and sunset instants.
#[async_trait]
pub trait SunTimeSource: Send + Sync {
    async fn fetch(&self, event: SunEvent) -> OpsResult<DateTime<Utc>>;
}

/// Named status values shown to operators.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn put(&self, key: &str, value: &str, comment: &str) -> OpsResult<()>;
}

/// Astrometric solver.
#[async_trait]
pub trait PlateSolver: Send + Sync {
    /// Solve `frame`, taken at `captured_at`, into a pointing calibration.
    async fn solve(&self, frame: &Path, captured_at: DateTime<Utc>) -> OpsResult<PointingCalibration>;

    /// Whether the files a previous solve left for the renderer are still
    /// in place. A stored calibration without them is re-solved.
    fn solution_present(&self) -> bool {
        true
    }
}

/// Everything the renderer needs for one overlay.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub center: SkyCoordinate,
    pub observed_at: DateTime<Utc>,
    pub width: u32,
    pub height: u32,
    /// Where the overlay image should be written.
    pub output: PathBuf,
}

/// Constellation/star overlay renderer.
#[async_trait]
pub trait OverlayRenderer: Send + Sync {
    /// Render an overlay and return the path of the produced image.
    async fn render(&self, request: &RenderRequest) -> OpsResult<PathBuf>;
}

/// Turns an ordered list of frames into a video.
#[async_trait]
pub trait TimelapseAssembler: Send + Sync {
    async fn assemble(&self, frames: &[PathBuf], output: &Path) -> OpsResult<PathBuf>;
}
