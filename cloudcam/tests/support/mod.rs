#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use image::{ImageFormat, Rgb, RgbImage};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use cloudcam::collaborators::{
    OverlayRenderer, PlateSolver, RenderRequest, StatusSink, SunTimeSource, TimelapseAssembler,
};
use cloudcam::device::{CameraDevice, CapturedFrame, ShutterDevice, ShutterState};
use cloudcam::models::{ExposureSettings, PointingCalibration, SunEvent};
use cloudcam::scheduler::{Clock, Collaborators, DeviceWatchdogs};
use cloudcam::watchdog::Watchdog;
use cloudcam::{CloudcamConfig, ErrorContext, OpsError, OpsResult, SessionScheduler};

static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Runs `f` with environment variables temporarily modified.
///
/// Restores the previous values on unwind and serializes access to the
/// process environment across tests.
pub fn with_scoped_env<F, R>(changes: &[(&str, Option<&str>)], f: F) -> R
where
    F: FnOnce() -> R,
{
    let _lock = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let _guard = ScopedEnv::new(changes);
    f()
}

struct ScopedEnv {
    snapshot: Vec<(String, Option<String>)>,
}

impl ScopedEnv {
    fn new(changes: &[(&str, Option<&str>)]) -> Self {
        let keys: HashSet<&str> = changes.iter().map(|(k, _)| *k).collect();
        let snapshot = keys
            .into_iter()
            .map(|k| (k.to_string(), std::env::var(k).ok()))
            .collect::<Vec<_>>();

        for (k, v) in changes {
            match v {
                Some(val) => std::env::set_var(k, val),
                None => std::env::remove_var(k),
            }
        }

        Self { snapshot }
    }
}

impl Drop for ScopedEnv {
    fn drop(&mut self) {
        for (k, v) in self.snapshot.drain(..) {
            match v {
                Some(val) => std::env::set_var(&k, val),
                None => std::env::remove_var(&k),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Fixed instants used across scenarios (UTC). Night runs 05:00 -> 16:00.
// ---------------------------------------------------------------------------

pub fn sunset() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 17, 5, 0, 0).unwrap()
}

pub fn sunrise() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 17, 16, 0, 0).unwrap()
}

pub fn midnight_hst() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 17, 10, 0, 0).unwrap()
}

pub fn afternoon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 17, 0, 0, 0).unwrap()
}

/// Encode a uniform grey PNG frame.
pub fn png_frame(width: u32, height: u32, level: u8) -> Vec<u8> {
    let image = RgbImage::from_pixel(width, height, Rgb([level, level, level]));
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Clock whose sleeps return at once after moving time forward.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        })
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += chrono::Duration::from_std(by).unwrap();
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        self.sleeps.lock().unwrap().push(duration);
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Devices
// ---------------------------------------------------------------------------

/// What the fake camera does on one capture call.
#[derive(Debug, Clone)]
pub enum CaptureStep {
    Frame(Vec<u8>),
    Hang,
    Fail(String),
}

/// Camera that follows a script, then keeps returning `default_frame`.
pub struct ScriptedCamera {
    clock: Arc<ManualClock>,
    script: Mutex<VecDeque<CaptureStep>>,
    default_frame: Mutex<Vec<u8>>,
    reported: Mutex<ExposureSettings>,
    applied: Mutex<Vec<ExposureSettings>>,
    captures: AtomicUsize,
}

impl ScriptedCamera {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            clock,
            script: Mutex::new(VecDeque::new()),
            default_frame: Mutex::new(png_frame(32, 24, 52)),
            reported: Mutex::new(ExposureSettings::new(10.0, 100.0)),
            applied: Mutex::new(Vec::new()),
            captures: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, step: CaptureStep) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn set_default_frame(&self, bytes: Vec<u8>) {
        *self.default_frame.lock().unwrap() = bytes;
    }

    pub fn set_reported(&self, settings: ExposureSettings) {
        *self.reported.lock().unwrap() = settings;
    }

    pub fn applied(&self) -> Vec<ExposureSettings> {
        self.applied.lock().unwrap().clone()
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CameraDevice for ScriptedCamera {
    async fn capture(&self) -> OpsResult<CapturedFrame> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        let bytes = match step {
            Some(CaptureStep::Frame(bytes)) => bytes,
            Some(CaptureStep::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                return Err(OpsError::Internal("hang finished".to_string()));
            }
            Some(CaptureStep::Fail(message)) => {
                return Err(OpsError::transport(
                    message,
                    ErrorContext::new("image").with_endpoint(self.endpoint()),
                ))
            }
            None => self.default_frame.lock().unwrap().clone(),
        };
        Ok(CapturedFrame {
            bytes,
            captured_at: self.clock.now(),
            reported: *self.reported.lock().unwrap(),
        })
    }

    async fn apply(&self, settings: ExposureSettings) -> OpsResult<ExposureSettings> {
        self.applied.lock().unwrap().push(settings);
        *self.reported.lock().unwrap() = settings;
        Ok(settings)
    }

    fn endpoint(&self) -> String {
        "fake-camera:915".to_string()
    }
}

#[derive(Default)]
pub struct RecordingShutter {
    states: Mutex<Vec<ShutterState>>,
}

impl RecordingShutter {
    pub fn states(&self) -> Vec<ShutterState> {
        self.states.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShutterDevice for RecordingShutter {
    async fn set_shutter(&self, state: ShutterState) -> OpsResult<()> {
        self.states.lock().unwrap().push(state);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Sun-time source that fails a set number of lookups before answering.
pub struct ScriptedSunSource {
    failures: Mutex<u32>,
    sunrise: DateTime<Utc>,
    sunset: DateTime<Utc>,
    calls: AtomicUsize,
}

impl ScriptedSunSource {
    pub fn new(sunrise: DateTime<Utc>, sunset: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(0),
            sunrise,
            sunset,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures.lock().unwrap() = count;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SunTimeSource for ScriptedSunSource {
    async fn fetch(&self, event: SunEvent) -> OpsResult<DateTime<Utc>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(OpsError::source_unavailable(
                    "no value",
                    ErrorContext::new("fetch_sun_time").with_details(event.key()),
                ));
            }
        }
        Ok(match event {
            SunEvent::Sunrise => self.sunrise,
            SunEvent::Sunset => self.sunset,
        })
    }
}

#[derive(Default)]
pub struct RecordingStatusSink {
    puts: Mutex<Vec<(String, String)>>,
}

impl RecordingStatusSink {
    pub fn values(&self, key: &str) -> Vec<String> {
        self.puts
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn camera_values(&self) -> Vec<String> {
        self.values("/i/cloudcam/camera/status")
    }

    pub fn shutter_values(&self) -> Vec<String> {
        self.values("/i/cloudcam/camera/shutter")
    }
}

#[async_trait]
impl StatusSink for RecordingStatusSink {
    async fn put(&self, key: &str, value: &str, _comment: &str) -> OpsResult<()> {
        self.puts
            .lock()
            .unwrap()
            .push((key.to_string(), value.to_string()));
        Ok(())
    }
}

/// Solver returning a fixed center, or failing when none is set.
pub struct FakeSolver {
    center: Mutex<Option<(f64, f64)>>,
    calls: AtomicUsize,
    solution_lost: AtomicBool,
}

impl FakeSolver {
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            center: Mutex::new(None),
            calls: AtomicUsize::new(0),
            solution_lost: AtomicBool::new(false),
        })
    }

    pub fn solving_to(ra_deg: f64, dec_deg: f64) -> Arc<Self> {
        let solver = Self::failing();
        *solver.center.lock().unwrap() = Some((ra_deg, dec_deg));
        solver
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Pretend the solver's output files were deleted.
    pub fn lose_solution(&self) {
        self.solution_lost.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl PlateSolver for FakeSolver {
    async fn solve(&self, frame: &Path, captured_at: DateTime<Utc>) -> OpsResult<PointingCalibration> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert!(frame.exists(), "solver handed a missing frame");
        match *self.center.lock().unwrap() {
            Some((ra, dec)) => Ok(PointingCalibration::new(captured_at, ra, dec)),
            None => Err(OpsError::Solver("no solution".to_string())),
        }
    }

    fn solution_present(&self) -> bool {
        !self.solution_lost.swap(false, Ordering::SeqCst)
    }
}

/// Renderer drawing a white square in the top-left quarter of the overlay.
#[derive(Default)]
pub struct FakeRenderer {
    requests: Mutex<Vec<RenderRequest>>,
}

impl FakeRenderer {
    pub fn requests(&self) -> Vec<RenderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl OverlayRenderer for FakeRenderer {
    async fn render(&self, request: &RenderRequest) -> OpsResult<PathBuf> {
        self.requests.lock().unwrap().push(request.clone());
        let mut overlay = RgbImage::new(request.width, request.height);
        for y in 0..request.height / 2 {
            for x in 0..request.width / 2 {
                overlay.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        if let Some(parent) = request.output.parent() {
            std::fs::create_dir_all(parent)?;
        }
        overlay.save(&request.output)?;
        Ok(request.output.clone())
    }
}

#[derive(Default)]
pub struct RecordingTimelapse {
    calls: Mutex<Vec<(Vec<PathBuf>, PathBuf)>>,
}

impl RecordingTimelapse {
    pub fn calls(&self) -> Vec<(Vec<PathBuf>, PathBuf)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TimelapseAssembler for RecordingTimelapse {
    async fn assemble(&self, frames: &[PathBuf], output: &Path) -> OpsResult<PathBuf> {
        self.calls
            .lock()
            .unwrap()
            .push((frames.to_vec(), output.to_path_buf()));
        Ok(output.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A scheduler wired to fakes, with a temporary work directory.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub camera: Arc<ScriptedCamera>,
    pub shutter: Arc<RecordingShutter>,
    pub sun: Arc<ScriptedSunSource>,
    pub status: Arc<RecordingStatusSink>,
    pub solver: Arc<FakeSolver>,
    pub renderer: Arc<FakeRenderer>,
    pub timelapse: Arc<RecordingTimelapse>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(start: DateTime<Utc>) -> Self {
        let clock = ManualClock::new(start);
        Self {
            dir: TempDir::new().unwrap(),
            camera: ScriptedCamera::new(Arc::clone(&clock)),
            clock,
            shutter: Arc::new(RecordingShutter::default()),
            sun: ScriptedSunSource::new(sunrise(), sunset()),
            status: Arc::new(RecordingStatusSink::default()),
            solver: FakeSolver::failing(),
            renderer: Arc::new(FakeRenderer::default()),
            timelapse: Arc::new(RecordingTimelapse::default()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_solver(mut self, solver: Arc<FakeSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Defaults with the work directory in the temp dir and the full frame
    /// used for brightness.
    pub fn config(&self) -> CloudcamConfig {
        let mut config = CloudcamConfig::default();
        config.paths.work_dir = self.dir.path().to_path_buf();
        config.brightness.sky_mask = Vec::new();
        config.status.retry_delay_ms = 1;
        config.schedule.retry_backoff_secs = 0;
        config
    }

    pub fn watchdogs() -> DeviceWatchdogs {
        let backoff = Duration::from_millis(1);
        DeviceWatchdogs {
            capture: Watchdog::new("Image Capture", Duration::from_millis(200)).with_backoff(backoff),
            apply: Watchdog::new("Exposure Update", Duration::from_millis(200)).with_backoff(backoff),
            shutter: Watchdog::new("Shutter", Duration::from_millis(200)).with_backoff(backoff),
        }
    }

    pub fn scheduler_with(&self, config: CloudcamConfig) -> SessionScheduler {
        self.try_scheduler_with(config).unwrap()
    }

    pub fn try_scheduler_with(&self, config: CloudcamConfig) -> OpsResult<SessionScheduler> {
        let collaborators = Collaborators {
            camera: self.camera.clone(),
            shutter: Some(self.shutter.clone()),
            sun_times: self.sun.clone(),
            status: self.status.clone(),
            solver: self.solver.clone(),
            renderer: self.renderer.clone(),
            timelapse: self.timelapse.clone(),
        };
        Ok(
            SessionScheduler::new(config, collaborators, self.clock.clone(), self.shutdown.clone())?
                .with_watchdogs(Self::watchdogs()),
        )
    }

    pub fn scheduler(&self) -> SessionScheduler {
        self.scheduler_with(self.config())
    }
}

/// Step `scheduler` `n` times, failing the test on any error.
pub async fn steps(scheduler: &mut SessionScheduler, n: usize) {
    for _ in 0..n {
        scheduler.step().await.unwrap();
    }
}
