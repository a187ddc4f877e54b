//! Timelapse assembly with `ffmpeg`'s concat demuxer.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::info;

use super::process;
use super::TimelapseAssembler;
use crate::config::TimelapseSettings;
use crate::error::{OpsError, OpsResult};

/// Builds MP4 timelapses by feeding `ffmpeg` a concat list of frames.
#[derive(Debug, Clone)]
pub struct FfmpegTimelapse {
    settings: TimelapseSettings,
}

impl FfmpegTimelapse {
    pub fn new(settings: TimelapseSettings) -> Self {
        Self { settings }
    }

    /// Concat-demuxer script showing each frame for `1/fps` seconds.
    ///
    /// The last frame is listed twice; the demuxer ignores the duration of
    /// the final entry otherwise.
    pub fn concat_list(&self, frames: &[PathBuf]) -> String {
        let fps = self.settings.fps.max(1);
        let mut list = String::from("ffconcat version 1.0\n");
        for frame in frames {
            let _ = writeln!(list, "file '{}'", escape(frame));
            let _ = writeln!(list, "duration 1/{}", fps);
        }
        if let Some(last) = frames.last() {
            let _ = writeln!(list, "file '{}'", escape(last));
        }
        list
    }

    pub fn arguments(&self, list: &Path, output: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            "concat".to_string(),
            "-safe".to_string(),
            "0".to_string(),
            "-i".to_string(),
            list.display().to_string(),
            "-r".to_string(),
            self.settings.fps.max(1).to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            output.display().to_string(),
        ]
    }
}

/// Single quotes are the only character the concat syntax needs escaped.
fn escape(path: &Path) -> String {
    path.display().to_string().replace('\'', r"'\''")
}

#[async_trait]
impl TimelapseAssembler for FfmpegTimelapse {
    async fn assemble(&self, frames: &[PathBuf], output: &Path) -> OpsResult<PathBuf> {
        if frames.is_empty() {
            return Err(OpsError::Internal(format!(
                "no frames for timelapse {}",
                output.display()
            )));
        }
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }

        let list_path = output.with_extension("txt");
        fs::write(&list_path, self.concat_list(frames))?;

        let result = process::run(
            &self.settings.command,
            self.arguments(&list_path, output),
            self.settings.timeout(),
        )
        .await;
        let _ = fs::remove_file(&list_path);
        result.map_err(|e| OpsError::Internal(format!("{} {}", self.settings.command, e)))?;

        info!(frames = frames.len(), output = %output.display(), "Timelapse written");
        Ok(output.to_path_buf())
    }
}
