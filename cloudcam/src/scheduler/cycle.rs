//! One night capture cycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use image::RgbImage;
use tracing::{debug, info, warn};

use super::{Clock, SessionScheduler};
use crate::collaborators::RenderRequest;
use crate::device::CapturedFrame;
use crate::error::{OpsError, OpsResult};
use crate::exposure::{blend_overlay, decode_frame, mean_brightness};
use crate::models::{AttemptOutcome, ExposureState, StoredFrame};
use crate::watchdog::{AttemptKind, Outcome, RetryNotifier};

const DEADLINE_POLL: Duration = Duration::from_millis(500);

impl SessionScheduler {
    /// Capture, store, calibrate, adjust exposure, annotate and summarise.
    ///
    /// Capture retries stop at `sunrise`; the cycle then ends without a frame.
    pub(super) async fn run_cycle(&mut self, sunrise: DateTime<Utc>) -> OpsResult<()> {
        let Some((frame, started_at, elapsed)) = self.capture(sunrise).await? else {
            info!(%sunrise, "Sunrise reached while retrying capture");
            return Ok(());
        };
        self.track_reported_settings(&frame);

        let (raw_dir, annotated_dir) = match self.session.as_ref() {
            Some(session) => (session.raw_dir.clone(), session.annotated_dir.clone()),
            None => return Err(OpsError::Internal("capture cycle without a session".to_string())),
        };
        let raw = self.frames.store_raw(&raw_dir, frame.captured_at, &frame.bytes)?;
        if let Some(session) = self.session.as_mut() {
            session.record_attempt(started_at, elapsed, AttemptOutcome::Success { frame: raw.clone() });
        }

        self.calibrate_if_needed(&raw, frame.captured_at).await?;

        let decoded = self.measure(frame.bytes).await;
        let annotated = match decoded {
            Some((brightness, rgb)) => {
                self.adjust_exposure(brightness).await?;
                self.annotate(&rgb, &raw, &annotated_dir, frame.captured_at).await
            }
            None => None,
        };

        if let Some(session) = self.session.as_mut() {
            session.record_frame(StoredFrame {
                captured_at: frame.captured_at,
                raw,
                annotated,
            });
        }

        self.refresh_summary(&annotated_dir).await;
        Ok(())
    }

    /// Capture through the retry combinator, recording failed attempts as
    /// they happen. Returns the frame with its attempt's start and duration,
    /// or `None` if `deadline` passed first.
    async fn capture(
        &mut self,
        deadline: DateTime<Utc>,
    ) -> OpsResult<Option<(CapturedFrame, DateTime<Utc>, Duration)>> {
        let camera = Arc::clone(&self.collaborators.camera);
        let clock = Arc::clone(&self.clock);
        let session = &mut self.session;
        let mut succeeded = None;

        let retries = self
            .watchdogs
            .capture
            .run_until_success(
                move || {
                    let camera = Arc::clone(&camera);
                    async move { camera.capture().await }
                },
                &self.status,
                &self.shutdown,
                |report| {
                    let started_at = attempt_start(clock.now(), report.elapsed);
                    let outcome = match &report.kind {
                        AttemptKind::Succeeded => {
                            succeeded = Some((started_at, report.elapsed));
                            return;
                        }
                        AttemptKind::TimedOut => AttemptOutcome::TimedOut,
                        AttemptKind::Failed(message) => AttemptOutcome::Failed {
                            message: message.clone(),
                        },
                    };
                    if let Some(session) = session.as_mut() {
                        session.record_attempt(started_at, report.elapsed, outcome);
                    }
                },
            );
        let frame = tokio::select! {
            frame = retries => frame?,
            _ = reached(&*clock, deadline) => return Ok(None),
        };

        let (started_at, elapsed) = succeeded.unwrap_or((self.clock.now(), Duration::ZERO));
        info!(
            bytes = frame.bytes.len(),
            exposure_secs = frame.reported.exposure_secs,
            gain = frame.reported.gain,
            elapsed_ms = elapsed.as_millis() as u64,
            "Frame captured"
        );
        Ok(Some((frame, started_at, elapsed)))
    }

    fn track_reported_settings(&mut self, frame: &CapturedFrame) {
        match self.exposure.as_mut() {
            Some(state) => state.reported(frame.reported, frame.captured_at),
            None => self.exposure = Some(ExposureState::new(frame.reported, frame.captured_at)),
        }
    }

    fn calibration_is_stale(&self, now: DateTime<Utc>) -> bool {
        match self.calibration.get() {
            None => true,
            Some(_) if !self.collaborators.solver.solution_present() => true,
            Some(calibration) => match self.config.schedule.recalibration_interval() {
                Some(interval) => calibration
                    .age(now)
                    .to_std()
                    .map(|age| age >= interval)
                    .unwrap_or(false),
                None => false,
            },
        }
    }

    async fn calibrate_if_needed(&self, raw: &Path, captured_at: DateTime<Utc>) -> OpsResult<()> {
        if !self.calibration_is_stale(captured_at) {
            return Ok(());
        }
        match self.collaborators.solver.solve(raw, captured_at).await {
            Ok(calibration) => {
                if let Err(e) = self.calibration.replace(calibration) {
                    warn!(error = %e, "Could not persist calibration");
                }
            }
            Err(e) => {
                warn!(error = %e, frame = %raw.display(), "Plate solve failed");
                self.status.notify("Plate Solve Exception").await;
                if self.shutdown.is_cancelled() {
                    return Err(OpsError::Shutdown);
                }
            }
        }
        Ok(())
    }

    /// Decode the frame off the runtime and measure its sky brightness.
    async fn measure(&self, bytes: Vec<u8>) -> Option<(f64, RgbImage)> {
        let mask = self.mask.clone();
        let result = tokio::task::spawn_blocking(move || -> OpsResult<(f64, RgbImage)> {
            let image = decode_frame(&bytes)?;
            let brightness = mean_brightness(&image.to_luma8(), &mask);
            Ok((brightness, image.to_rgb8()))
        })
        .await
        .map_err(|e| OpsError::Internal(e.to_string()))
        .and_then(|r| r);

        match result {
            Ok((brightness, rgb)) => {
                debug!(brightness, "Measured sky brightness");
                Some((brightness, rgb))
            }
            Err(e) => {
                warn!(error = %e, "Could not decode frame");
                None
            }
        }
    }

    /// Run the controller and push changed settings in a single attempt.
    async fn adjust_exposure(&mut self, brightness: f64) -> OpsResult<()> {
        let now = self.clock.now();
        let Some(state) = self.exposure.as_mut() else {
            return Ok(());
        };
        let current = state.settings;
        let next = self.controller.adjust(brightness, current);
        state.commanded(next, brightness, now);
        if next == current {
            debug!(brightness, "Exposure within dead band");
            return Ok(());
        }

        info!(
            brightness,
            exposure_secs = next.exposure_secs,
            gain = next.gain,
            "Applying exposure settings"
        );
        let camera = Arc::clone(&self.collaborators.camera);
        let outcome = self
            .watchdogs
            .apply
            .run(async move { camera.apply(next).await })
            .await;

        let label = self.watchdogs.apply.label().to_string();
        match outcome {
            Outcome::Success(reported) => {
                if let Some(state) = self.exposure.as_mut() {
                    state.reported(reported, now);
                }
            }
            Outcome::TimedOut { .. } => {
                self.status.notify(&format!("{} Timeout", label)).await;
            }
            Outcome::Failed(_) => {
                self.status.notify(&format!("{} Exception", label)).await;
            }
        }
        if self.shutdown.is_cancelled() {
            return Err(OpsError::Shutdown);
        }
        Ok(())
    }

    /// Render, blend and caption the overlay. Any failure only costs this cycle's
    /// annotated frame.
    async fn annotate(
        &self,
        rgb: &RgbImage,
        raw: &Path,
        annotated_dir: &Path,
        observed_at: DateTime<Utc>,
    ) -> Option<PathBuf> {
        if !self.config.renderer.enabled {
            return None;
        }
        let calibration = self.calibration.get();
        let center = match self.tracker.center_at(observed_at, calibration.as_ref()) {
            Ok(center) => center,
            Err(OpsError::CalibrationMissing) => {
                info!("No pointing calibration yet; storing frame without overlay");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "Pointing failed");
                return None;
            }
        };

        let request = RenderRequest {
            center,
            observed_at,
            width: rgb.width(),
            height: rgb.height(),
            output: self.frames.overlay_scratch_path(),
        };
        let result = match self.collaborators.renderer.render(&request).await {
            Ok(overlay) => self.compose(rgb, &overlay, raw, annotated_dir, observed_at).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "Overlay skipped");
                None
            }
        }
    }

    async fn compose(
        &self,
        rgb: &RgbImage,
        overlay: &Path,
        raw: &Path,
        annotated_dir: &Path,
        observed_at: DateTime<Utc>,
    ) -> OpsResult<PathBuf> {
        let base = rgb.clone();
        let overlay = overlay.to_path_buf();
        let mask = self.mask.clone();
        let alpha = self.config.renderer.blend_alpha;
        let captioner = self.captioner.clone();
        let blended = tokio::task::spawn_blocking(move || -> OpsResult<RgbImage> {
            let overlay = image::open(&overlay)?.to_rgb8();
            let mut blended = blend_overlay(&base, &overlay, alpha, &mask)?;
            if let Some(captioner) = captioner {
                captioner.draw(&mut blended, observed_at);
            }
            Ok(blended)
        })
        .await
        .map_err(|e| OpsError::Internal(e.to_string()))??;
        self.frames.store_annotated(annotated_dir, raw, &blended)
    }

    /// Hand the last summary window to the timelapse assembler once per
    /// summary interval.
    async fn refresh_summary(&mut self, annotated_dir: &Path) {
        let now = self.clock.now();
        let interval = chrono_span(self.config.schedule.summary_interval());
        let due = match self.last_summary {
            Some(last) => now - last >= interval,
            None => true,
        };
        if !due {
            return;
        }
        self.last_summary = Some(now);

        let window = chrono_span(self.config.schedule.summary_window());
        let frames: Vec<PathBuf> = match self.session.as_ref() {
            Some(session) => session
                .frames_since(now - window)
                .into_iter()
                .map(|f| f.best().clone())
                .collect(),
            None => return,
        };
        if frames.is_empty() {
            return;
        }

        let output = self.frames.summary_path(annotated_dir);
        match self.collaborators.timelapse.assemble(&frames, &output).await {
            Ok(path) => info!(frames = frames.len(), output = %path.display(), "Summary timelapse refreshed"),
            Err(e) => warn!(error = %e, "Summary timelapse failed"),
        }
    }
}

/// Resolves once `clock` reads `deadline` or later.
///
/// Polls with runtime timers instead of [`Clock::sleep`] so waiting never
/// moves the clock itself.
async fn reached(clock: &dyn Clock, deadline: DateTime<Utc>) {
    loop {
        let now = clock.now();
        if now >= deadline {
            return;
        }
        let wait = (deadline - now)
            .to_std()
            .unwrap_or_default()
            .min(DEADLINE_POLL);
        tokio::time::sleep(wait).await;
    }
}

/// Out-of-range spans saturate at a century.
fn chrono_span(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

/// Start of an attempt that ended at `ended` after `elapsed`.
fn attempt_start(ended: DateTime<Utc>, elapsed: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(elapsed)
        .map(|d| ended - d)
        .unwrap_or(ended)
}
