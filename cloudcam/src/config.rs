//! Configuration file support.
//!
//! The daemon reads a single TOML file (`cloudcam.toml`). Every section and
//! field is optional; missing values fall back to the defaults used at the
//! observatory. A handful of environment variables override the file so the
//! same config can be reused across hosts.

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{OpsError, OpsResult};
use crate::exposure::ExposureTuning;
use crate::models::SiteLocation;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloudcamConfig {
    #[serde(default)]
    pub device: DeviceSettings,
    #[serde(default)]
    pub exposure: ExposureTuning,
    #[serde(default)]
    pub brightness: BrightnessSettings,
    #[serde(default)]
    pub site: SiteSettings,
    #[serde(default)]
    pub schedule: ScheduleSettings,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub status: StatusSettings,
    #[serde(default)]
    pub sun_times: SunTimeSettings,
    #[serde(default)]
    pub solver: SolverSettings,
    #[serde(default)]
    pub renderer: RendererSettings,
    #[serde(default)]
    pub timelapse: TimelapseSettings,
}

/// Camera/shutter server connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "default_device_host")]
    pub host: String,
    #[serde(default = "default_device_port")]
    pub port: u16,
    /// Watchdog budget for one capture (connect, query, image transfer).
    #[serde(default = "default_capture_timeout")]
    pub capture_timeout_secs: u64,
    /// Watchdog budget for pushing new exposure/gain values.
    #[serde(default = "default_apply_timeout")]
    pub apply_timeout_secs: u64,
    /// Watchdog budget for one shutter command.
    #[serde(default = "default_shutter_timeout")]
    pub shutter_timeout_secs: u64,
    /// How long to wait for the shutter server's acknowledgement line.
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,
}

fn default_device_host() -> String {
    "128.171.80.243".to_string()
}

fn default_device_port() -> u16 {
    915
}

fn default_capture_timeout() -> u64 {
    90
}

fn default_apply_timeout() -> u64 {
    30
}

fn default_shutter_timeout() -> u64 {
    20
}

fn default_reply_timeout() -> u64 {
    5
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            host: default_device_host(),
            port: default_device_port(),
            capture_timeout_secs: default_capture_timeout(),
            apply_timeout_secs: default_apply_timeout(),
            shutter_timeout_secs: default_shutter_timeout(),
            reply_timeout_secs: default_reply_timeout(),
        }
    }
}

impl DeviceSettings {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_secs)
    }

    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    pub fn shutter_timeout(&self) -> Duration {
        Duration::from_secs(self.shutter_timeout_secs)
    }

    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }
}

/// Region of the frame used for the brightness statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrightnessSettings {
    /// Polygon vertices in pixel coordinates; pixels outside are ignored.
    /// An empty list uses the whole frame.
    pub sky_mask: Vec<[f64; 2]>,
}

impl Default for BrightnessSettings {
    fn default() -> Self {
        Self {
            sky_mask: vec![
                [322.0, 0.0],
                [621.0, 0.0],
                [672.0, 43.0],
                [670.0, 73.0],
                [766.0, 151.0],
                [788.0, 145.0],
                [2053.0, 1189.0],
                [1794.0, 1162.0],
                [1625.0, 1186.0],
                [842.0, 1281.0],
                [1399.0, 1286.0],
                [1218.0, 1195.0],
                [949.0, 1351.0],
                [535.0, 1354.0],
                [433.0, 1152.0],
                [209.0, 1219.0],
                [153.0, 1109.0],
                [5.0, 1049.0],
            ],
        }
    }
}

/// Observing site.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteSettings {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
}

impl Default for SiteSettings {
    fn default() -> Self {
        // CFHT headquarters, Waimea
        Self {
            latitude: 20.019547523714984,
            longitude: -155.6719115353903,
            elevation_m: 813.816,
        }
    }
}

impl SiteSettings {
    pub fn location(&self) -> SiteLocation {
        SiteLocation {
            latitude: self.latitude,
            longitude: self.longitude,
            elevation_m: Some(self.elevation_m),
        }
    }
}

/// Scheduler cadences and policies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// Wait between sun-time lookups while the source is unavailable.
    #[serde(default = "default_sun_poll_interval")]
    pub sun_poll_interval_secs: u64,
    /// Fixed backoff between failed device attempts.
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_secs: u64,
    /// How often a recent-frames summary is handed to the timelapse assembler.
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
    /// How far back the summary reaches.
    #[serde(default = "default_summary_window")]
    pub summary_window_secs: u64,
    /// Longest uninterrupted daytime sleep before sun times are refreshed.
    #[serde(default = "default_daytime_refresh")]
    pub daytime_refresh_secs: u64,
    /// Re-solve once the calibration is this old; 0 solves only when missing.
    #[serde(default)]
    pub recalibration_interval_secs: u64,
    /// Minimum spacing between capture cycles; 0 captures back to back.
    #[serde(default)]
    pub cycle_interval_secs: u64,
    /// Open the sun shutter at dusk and close it at dawn.
    #[serde(default)]
    pub shutter_control: bool,
    /// Status attempts made while shutting down before giving up.
    #[serde(default = "default_final_status_attempts")]
    pub final_status_attempts: u32,
}

fn default_sun_poll_interval() -> u64 {
    60
}

fn default_retry_backoff() -> u64 {
    10
}

fn default_summary_interval() -> u64 {
    1800
}

fn default_summary_window() -> u64 {
    1800
}

fn default_daytime_refresh() -> u64 {
    3600
}

fn default_final_status_attempts() -> u32 {
    5
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            sun_poll_interval_secs: default_sun_poll_interval(),
            retry_backoff_secs: default_retry_backoff(),
            summary_interval_secs: default_summary_interval(),
            summary_window_secs: default_summary_window(),
            daytime_refresh_secs: default_daytime_refresh(),
            recalibration_interval_secs: 0,
            cycle_interval_secs: 0,
            shutter_control: false,
            final_status_attempts: default_final_status_attempts(),
        }
    }
}

impl ScheduleSettings {
    pub fn sun_poll_interval(&self) -> Duration {
        Duration::from_secs(self.sun_poll_interval_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_secs(self.retry_backoff_secs)
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs)
    }

    pub fn summary_window(&self) -> Duration {
        Duration::from_secs(self.summary_window_secs)
    }

    pub fn daytime_refresh(&self) -> Duration {
        Duration::from_secs(self.daytime_refresh_secs)
    }

    pub fn recalibration_interval(&self) -> Option<Duration> {
        match self.recalibration_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.cycle_interval_secs)
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Root of every relative path below.
    pub work_dir: PathBuf,
    pub raw_images_dir: PathBuf,
    pub annotated_images_dir: PathBuf,
    pub timelapse_dir: PathBuf,
    pub calibration_file: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/cloudcams"),
            raw_images_dir: PathBuf::from("cloudcamimages"),
            annotated_images_dir: PathBuf::from("cloudcamovr"),
            timelapse_dir: PathBuf::from("timeslapses"),
            calibration_file: PathBuf::from("astrometrynet_files/calibration.json"),
        }
    }
}

impl PathSettings {
    /// Resolve `path` against `work_dir` unless it is already absolute.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.work_dir.join(path)
        }
    }
}

/// Status sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusSettings {
    pub command: String,
    pub camera_key: String,
    pub camera_comment: String,
    pub shutter_key: String,
    pub shutter_comment: String,
    /// Pause between attempts while the sink is failing.
    pub retry_delay_ms: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            command: "ssPut".to_string(),
            camera_key: "/i/cloudcam/camera/status".to_string(),
            camera_comment: "Camera Operational Status".to_string(),
            shutter_key: "/i/cloudcam/camera/shutter".to_string(),
            shutter_comment: "Sun Shutter Status".to_string(),
            retry_delay_ms: 1000,
        }
    }
}

impl StatusSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Sun-time source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SunTimeSettings {
    pub command: String,
    /// Prepended to `sunriseTime` / `sunsetTime`.
    pub key_prefix: String,
    /// chrono format of the returned local timestamp.
    pub time_format: String,
    /// Offset of the returned local time from UTC, in hours.
    pub utc_offset_hours: f64,
}

impl Default for SunTimeSettings {
    fn default() -> Self {
        Self {
            command: "ssGet".to_string(),
            key_prefix: "/t/ephem/".to_string(),
            time_format: "%d-%b-%Y %H:%M:%S".to_string(),
            utc_offset_hours: -10.0,
        }
    }
}

/// astrometry.net `solve-field` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub command: String,
    pub index_dir: Option<PathBuf>,
    /// Directory receiving `<prefix>.wcs`.
    pub output_dir: PathBuf,
    pub prefix: String,
    pub scale_low_deg: f64,
    pub scale_high_deg: f64,
    pub max_objects: u32,
    pub sigma: f64,
    pub timeout_secs: u64,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            command: "solve-field".to_string(),
            index_dir: None,
            output_dir: PathBuf::from("astrometrynet_files"),
            prefix: "initial".to_string(),
            scale_low_deg: 0.1,
            scale_high_deg: 180.0,
            max_objects: 2000,
            sigma: 3.0,
            timeout_secs: 300,
        }
    }
}

impl SolverSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `plot-constellations` overlay renderer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererSettings {
    pub enabled: bool,
    pub command: String,
    /// Extra flags selecting constellations, stars and labels.
    pub extra_args: Vec<String>,
    /// Planet/satellite catalogue passed with `-U`, if present.
    pub ephemeris_file: Option<PathBuf>,
    pub timeout_secs: u64,
    /// Weight of the overlay where it has content.
    pub blend_alpha: f32,
    /// TrueType/OpenType font for the timestamp caption; no caption when unset.
    pub caption_font: Option<PathBuf>,
    /// Caption glyph height in pixels.
    pub caption_scale: f32,
}

impl Default for RendererSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "plot-constellations".to_string(),
            extra_args: vec![
                "-C".to_string(),
                "-B".to_string(),
                "-j".to_string(),
                "-b".to_string(),
                "12".to_string(),
            ],
            ephemeris_file: None,
            timeout_secs: 120,
            blend_alpha: 0.45,
            caption_font: None,
            caption_scale: 56.0,
        }
    }
}

impl RendererSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Timelapse assembly settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelapseSettings {
    pub command: String,
    pub fps: u32,
    pub timeout_secs: u64,
}

impl Default for TimelapseSettings {
    fn default() -> Self {
        Self {
            command: "ffmpeg".to_string(),
            fps: 10,
            timeout_secs: 900,
        }
    }
}

impl TimelapseSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CloudcamConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    /// * `Ok(CloudcamConfig)` if successful
    /// * `Err(OpsError::Configuration)` if the file cannot be read, parsed or validated
    pub fn from_file<P: AsRef<Path>>(path: P) -> OpsResult<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            OpsError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(content: &str) -> OpsResult<Self> {
        let config: CloudcamConfig = toml::from_str(content).map_err(|e| {
            OpsError::Configuration(format!("Failed to parse config file: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default location.
    ///
    /// Searches for `cloudcam.toml` in:
    /// 1. Current directory
    /// 2. `cloudcam/` directory
    /// 3. Parent directory
    pub fn from_default_location() -> OpsResult<Self> {
        let search_paths = [
            PathBuf::from("cloudcam.toml"),
            PathBuf::from("cloudcam/cloudcam.toml"),
            PathBuf::from("../cloudcam.toml"),
        ];

        for path in search_paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(OpsError::Configuration(
            "No cloudcam.toml found in standard locations".to_string(),
        ))
    }

    /// Resolve the configuration the daemon should run with.
    ///
    /// `CLOUDCAM_CONFIG` names an explicit file; otherwise the standard
    /// locations are searched and, failing that, built-in defaults are used.
    /// Environment overrides are applied last.
    pub fn load() -> OpsResult<Self> {
        let mut config = match env::var("CLOUDCAM_CONFIG") {
            Ok(path) => Self::from_file(path)?,
            Err(_) => match Self::from_default_location() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "Using built-in configuration defaults");
                    Self::default()
                }
            },
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// # Environment Variables
    /// - `CLOUDCAM_DEVICE_HOST`: camera server hostname
    /// - `CLOUDCAM_DEVICE_PORT`: camera server port
    /// - `CLOUDCAM_WORK_DIR`: root directory for images and calibration files
    pub fn apply_env_overrides(&mut self) -> OpsResult<()> {
        if let Ok(host) = env::var("CLOUDCAM_DEVICE_HOST") {
            self.device.host = host;
        }
        if let Ok(port) = env::var("CLOUDCAM_DEVICE_PORT") {
            self.device.port = port.parse().map_err(|_| {
                OpsError::Configuration(
                    "CLOUDCAM_DEVICE_PORT must be a valid port number".to_string(),
                )
            })?;
        }
        if let Ok(dir) = env::var("CLOUDCAM_WORK_DIR") {
            self.paths.work_dir = PathBuf::from(dir);
        }
        Ok(())
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> OpsResult<()> {
        self.exposure.validate()?;

        if self.device.host.trim().is_empty() {
            return Err(OpsError::Configuration(
                "device.host must not be empty".to_string(),
            ));
        }
        if self.device.port == 0 {
            return Err(OpsError::Configuration(
                "device.port must be non-zero".to_string(),
            ));
        }
        if self.device.capture_timeout_secs == 0
            || self.device.apply_timeout_secs == 0
            || self.device.shutter_timeout_secs == 0
        {
            return Err(OpsError::Configuration(
                "device timeouts must be at least one second".to_string(),
            ));
        }
        if self.schedule.summary_interval_secs == 0 {
            return Err(OpsError::Configuration(
                "schedule.summary_interval_secs must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.renderer.blend_alpha) {
            return Err(OpsError::Configuration(format!(
                "renderer.blend_alpha must be within [0, 1], got {}",
                self.renderer.blend_alpha
            )));
        }
        if !(self.renderer.caption_scale.is_finite() && self.renderer.caption_scale > 0.0) {
            return Err(OpsError::Configuration(format!(
                "renderer.caption_scale must be positive, got {}",
                self.renderer.caption_scale
            )));
        }
        let mask = &self.brightness.sky_mask;
        if !mask.is_empty() && mask.len() < 3 {
            return Err(OpsError::Configuration(
                "brightness.sky_mask needs at least three vertices".to_string(),
            ));
        }
        if !(-14.0..=14.0).contains(&self.sun_times.utc_offset_hours) {
            return Err(OpsError::Configuration(format!(
                "sun_times.utc_offset_hours out of range: {}",
                self.sun_times.utc_offset_hours
            )));
        }
        Ok(())
    }

    pub fn raw_images_root(&self) -> PathBuf {
        self.paths.resolve(&self.paths.raw_images_dir)
    }

    pub fn annotated_images_root(&self) -> PathBuf {
        self.paths.resolve(&self.paths.annotated_images_dir)
    }

    pub fn timelapse_root(&self) -> PathBuf {
        self.paths.resolve(&self.paths.timelapse_dir)
    }

    pub fn calibration_path(&self) -> PathBuf {
        self.paths.resolve(&self.paths.calibration_file)
    }

    pub fn solver_output_dir(&self) -> PathBuf {
        self.paths.resolve(&self.solver.output_dir)
    }

    /// Resolved caption font, if captions are enabled.
    pub fn caption_font_path(&self) -> Option<PathBuf> {
        self.renderer
            .caption_font
            .as_deref()
            .map(|path| self.paths.resolve(path))
    }
}
