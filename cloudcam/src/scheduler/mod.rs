//! Day/night state machine driving a night of captures.
//!
//! ```text
//! Idle ─► AwaitingSunTimes ─┬─► NightCapturing ─► SessionClosing ─► Idle
//!              ▲   │        │         ▲
//!              │   └(fail)  └─► DaytimeWait
//!              └──(refresh)───────┘
//! ```
//!
//! [`SessionScheduler::step`] performs one transition (or one capture cycle
//! while capturing) so tests can walk the machine step by step.
//! [`SessionScheduler::run`] loops until the shutdown token fires and then
//! marks the camera `OFF`.

pub mod clock;
mod cycle;
pub mod state;
pub mod status;

pub use clock::{Clock, SystemClock};
pub use state::SchedulerState;
pub use status::{StatusReporter, CAMERA_OFF, CAMERA_ON};

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::collaborators::{
    Captioner, FrameStore, OverlayRenderer, PlateSolver, StatusSink, SunTimeSource, TimelapseAssembler,
};
use crate::config::CloudcamConfig;
use crate::device::{CameraDevice, ShutterDevice, ShutterState};
use crate::error::{OpsError, OpsResult};
use crate::exposure::{ExposureController, SkyMask};
use crate::models::{
    DayPhase, ExposureState, NightWindow, ObservationSession, SunEvent, SunTimes,
};
use crate::pointing::{CalibrationStore, PointingTracker};
use crate::watchdog::Watchdog;

/// Devices and external tools the scheduler talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub camera: Arc<dyn CameraDevice>,
    /// Sun shutter, when the site has one.
    pub shutter: Option<Arc<dyn ShutterDevice>>,
    pub sun_times: Arc<dyn SunTimeSource>,
    pub status: Arc<dyn StatusSink>,
    pub solver: Arc<dyn PlateSolver>,
    pub renderer: Arc<dyn OverlayRenderer>,
    pub timelapse: Arc<dyn TimelapseAssembler>,
}

/// Timeout budgets for each device operation.
#[derive(Debug, Clone)]
pub struct DeviceWatchdogs {
    pub capture: Watchdog,
    pub apply: Watchdog,
    pub shutter: Watchdog,
}

impl DeviceWatchdogs {
    pub fn from_config(config: &CloudcamConfig) -> Self {
        let backoff = config.schedule.retry_backoff();
        Self {
            capture: Watchdog::new("Image Capture", config.device.capture_timeout()).with_backoff(backoff),
            apply: Watchdog::new("Exposure Update", config.device.apply_timeout()).with_backoff(backoff),
            shutter: Watchdog::new("Shutter", config.device.shutter_timeout()).with_backoff(backoff),
        }
    }
}

pub struct SessionScheduler {
    config: CloudcamConfig,
    collaborators: Collaborators,
    watchdogs: DeviceWatchdogs,
    frames: FrameStore,
    calibration: Arc<CalibrationStore>,
    tracker: PointingTracker,
    controller: ExposureController,
    mask: SkyMask,
    captioner: Option<Arc<Captioner>>,
    status: StatusReporter,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,

    state: SchedulerState,
    sun_times: Option<SunTimes>,
    session: Option<ObservationSession>,
    last_session: Option<ObservationSession>,
    exposure: Option<ExposureState>,
    last_summary: Option<DateTime<Utc>>,
}

impl SessionScheduler {
    /// Build a scheduler from configuration.
    ///
    /// Frame folders and the calibration file are taken from `config.paths`.
    /// Fails if a configured caption font cannot be loaded.
    pub fn new(
        config: CloudcamConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        shutdown: CancellationToken,
    ) -> OpsResult<Self> {
        let frames = FrameStore::new(
            config.raw_images_root(),
            config.annotated_images_root(),
            config.timelapse_root(),
            config.sun_times.utc_offset_hours,
        )?;
        let calibration = Arc::new(CalibrationStore::open(config.calibration_path()));
        let captioner = match config.caption_font_path() {
            Some(font) => Some(Arc::new(Captioner::load(
                &font,
                config.renderer.caption_scale,
                config.sun_times.utc_offset_hours,
            )?)),
            None => None,
        };
        let status = StatusReporter::new(
            Arc::clone(&collaborators.status),
            config.status.clone(),
            shutdown.clone(),
        );

        Ok(Self {
            watchdogs: DeviceWatchdogs::from_config(&config),
            tracker: PointingTracker::new(config.site.location()),
            controller: ExposureController::new(config.exposure.clone()),
            mask: SkyMask::from_vertices(&config.brightness.sky_mask),
            captioner,
            frames,
            calibration,
            status,
            clock,
            shutdown,
            config,
            collaborators,
            state: SchedulerState::Idle,
            sun_times: None,
            session: None,
            last_session: None,
            exposure: None,
            last_summary: None,
        })
    }

    /// Replace the device timeout budgets.
    pub fn with_watchdogs(mut self, watchdogs: DeviceWatchdogs) -> Self {
        self.watchdogs = watchdogs;
        self
    }

    /// Share a calibration store with other readers.
    pub fn with_calibration_store(mut self, store: Arc<CalibrationStore>) -> Self {
        self.calibration = store;
        self
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn sun_times(&self) -> Option<SunTimes> {
        self.sun_times
    }

    /// The session currently capturing, if any.
    pub fn session(&self) -> Option<&ObservationSession> {
        self.session.as_ref()
    }

    /// The most recently closed session.
    pub fn last_session(&self) -> Option<&ObservationSession> {
        self.last_session.as_ref()
    }

    pub fn exposure(&self) -> Option<&ExposureState> {
        self.exposure.as_ref()
    }

    pub fn calibration(&self) -> &CalibrationStore {
        &self.calibration
    }

    pub fn frames(&self) -> &FrameStore {
        &self.frames
    }

    /// Sleep on the scheduler clock unless shutdown is requested first.
    async fn pause(&self, duration: Duration) -> OpsResult<()> {
        if duration.is_zero() {
            return Ok(());
        }
        tokio::select! {
            _ = self.clock.sleep(duration) => Ok(()),
            _ = self.shutdown.cancelled() => Err(OpsError::Shutdown),
        }
    }

    /// Advance the state machine by one transition.
    ///
    /// While capturing, one step is one capture cycle. Returns
    /// [`OpsError::Shutdown`] if a wait was interrupted.
    pub async fn step(&mut self) -> OpsResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(OpsError::Shutdown);
        }

        match self.state {
            SchedulerState::Idle => {
                self.transition(SchedulerState::AwaitingSunTimes);
                Ok(())
            }
            SchedulerState::AwaitingSunTimes => self.await_sun_times().await,
            SchedulerState::DaytimeWait { next_night } => self.daytime_wait(next_night).await,
            SchedulerState::NightCapturing { window } => {
                if self.clock.now() >= window.end {
                    self.transition(SchedulerState::SessionClosing);
                    return Ok(());
                }
                self.run_cycle(window.end).await?;
                self.pause(self.config.schedule.cycle_interval()).await
            }
            SchedulerState::SessionClosing => {
                self.close_session().await?;
                self.transition(SchedulerState::Idle);
                Ok(())
            }
        }
    }

    /// Run until shutdown, then mark the camera `OFF`.
    ///
    /// Step failures are logged and retried after the configured backoff;
    /// only shutdown ends the loop.
    pub async fn run(&mut self) {
        info!(state = %self.state, "Scheduler starting");
        while !self.shutdown.is_cancelled() {
            match self.step().await {
                Ok(()) => {}
                Err(OpsError::Shutdown) => break,
                Err(e) => {
                    error!(state = %self.state, error = %e, kind = e.kind(), "Scheduler step failed");
                    if self.pause(self.config.schedule.retry_backoff()).await.is_err() {
                        break;
                    }
                }
            }
        }
        self.cleanup().await;
    }

    async fn cleanup(&mut self) {
        info!(state = %self.state, "Scheduler stopping");
        if let Some(mut session) = self.session.take() {
            session.close(self.clock.now());
            info!(
                session = %session.id,
                frames = session.frames().len(),
                "Session interrupted by shutdown"
            );
            self.last_session = Some(session);
        }
        self.status
            .final_off(self.config.schedule.final_status_attempts)
            .await;
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Scheduler transition");
        }
        self.state = next;
    }

    async fn fetch_sun_times(&self) -> OpsResult<SunTimes> {
        let sunset = self.collaborators.sun_times.fetch(SunEvent::Sunset).await?;
        let sunrise = self.collaborators.sun_times.fetch(SunEvent::Sunrise).await?;
        Ok(SunTimes::new(sunrise, sunset))
    }

    async fn await_sun_times(&mut self) -> OpsResult<()> {
        let sun = match self.fetch_sun_times().await {
            Ok(sun) => sun,
            Err(e) => {
                let poll = self.config.schedule.sun_poll_interval();
                warn!(error = %e, retry_in_secs = poll.as_secs(), "Sun times unavailable");
                return self.pause(poll).await;
            }
        };
        self.sun_times = Some(sun);

        match sun.phase_at(self.clock.now()) {
            DayPhase::Night(window) => self.enter_night(window).await,
            DayPhase::Day { next_night } => {
                info!(sunset = %next_night.start, sunrise = %next_night.end, "Waiting for night");
                self.transition(SchedulerState::DaytimeWait { next_night });
                Ok(())
            }
        }
    }

    async fn daytime_wait(&mut self, next_night: NightWindow) -> OpsResult<()> {
        let now = self.clock.now();
        if next_night.contains(now) {
            return self.enter_night(next_night).await;
        }
        if now >= next_night.end {
            self.transition(SchedulerState::AwaitingSunTimes);
            return Ok(());
        }

        let until_sunset = (next_night.start - now).to_std().unwrap_or_default();
        let refresh = self.config.schedule.daytime_refresh();
        if until_sunset > refresh {
            self.pause(refresh).await?;
            self.transition(SchedulerState::AwaitingSunTimes);
        } else {
            self.pause(until_sunset).await?;
        }
        Ok(())
    }

    async fn enter_night(&mut self, window: NightWindow) -> OpsResult<()> {
        let now = self.clock.now();
        let (raw_dir, annotated_dir) = self.frames.session_dirs(window.start)?;
        let session = ObservationSession::new(now, window, raw_dir, annotated_dir);
        info!(
            session = %session.id,
            until = %window.end,
            raw_dir = %session.raw_dir.display(),
            "Night session started"
        );
        self.session = Some(session);
        self.last_summary = Some(now);
        self.transition(SchedulerState::NightCapturing { window });

        self.status.set_camera(CAMERA_ON).await?;
        if self.config.schedule.shutter_control {
            self.move_shutter(ShutterState::Open).await?;
        }
        Ok(())
    }

    async fn move_shutter(&self, state: ShutterState) -> OpsResult<()> {
        let Some(shutter) = self.collaborators.shutter.as_ref() else {
            warn!(%state, "Shutter control enabled but no shutter device configured");
            return Ok(());
        };
        let shutter = Arc::clone(shutter);
        self.watchdogs
            .shutter
            .run_until_success(
                move || {
                    let shutter = Arc::clone(&shutter);
                    async move { shutter.set_shutter(state).await }
                },
                &self.status,
                &self.shutdown,
                |_| {},
            )
            .await?;
        self.status.set_shutter(state).await
    }

    /// Stitch everything in the night's folders, including frames stored
    /// before a restart.
    async fn assemble_night_timelapse(&self, session: &ObservationSession) {
        let frames = match self.frames.night_frames(&session.raw_dir, &session.annotated_dir) {
            Ok(frames) => frames,
            Err(e) => {
                warn!(error = %e, dir = %session.raw_dir.display(), "Could not list night frames");
                return;
            }
        };
        if frames.is_empty() {
            info!(session = %session.id, "No frames captured; skipping timelapse");
            return;
        }
        let output = self.frames.timelapse_path(session.window.start);
        if let Err(e) = self.collaborators.timelapse.assemble(&frames, &output).await {
            warn!(error = %e, output = %output.display(), "Night timelapse failed");
        }
    }

    async fn close_session(&mut self) -> OpsResult<()> {
        if let Some(session) = self.session.as_ref() {
            self.assemble_night_timelapse(session).await;
        }

        if self.config.schedule.shutter_control {
            self.move_shutter(ShutterState::Closed).await?;
        }
        self.status.set_camera(CAMERA_OFF).await?;

        if let Some(mut session) = self.session.take() {
            session.close(self.clock.now());
            info!(
                session = %session.id,
                attempts = session.attempts().len(),
                captures = session.successful_captures(),
                frames = session.frames().len(),
                "Night session closed"
            );
            self.last_session = Some(session);
        }
        self.last_summary = None;
        Ok(())
    }
}
