//! Commanded camera settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Exposure time and gain as sent to (or reported by) the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureSettings {
    /// Exposure time in seconds.
    pub exposure_secs: f64,
    /// Sensor gain in device units.
    pub gain: f64,
}

impl ExposureSettings {
    pub fn new(exposure_secs: f64, gain: f64) -> Self {
        Self {
            exposure_secs,
            gain,
        }
    }
}

/// Session-scoped exposure state.
///
/// Written once per capture cycle from the controller output, or replaced
/// wholesale by device-reported values after a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExposureState {
    pub settings: ExposureSettings,
    /// Mean grey level of the most recent frame, if one has been measured.
    pub last_brightness: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

impl ExposureState {
    pub fn new(settings: ExposureSettings, updated_at: DateTime<Utc>) -> Self {
        Self {
            settings,
            last_brightness: None,
            updated_at,
        }
    }

    /// Replace the settings with values read back from the device.
    pub fn reported(&mut self, settings: ExposureSettings, at: DateTime<Utc>) {
        self.settings = settings;
        self.updated_at = at;
    }

    /// Record a controller decision together with the brightness that drove it.
    pub fn commanded(&mut self, settings: ExposureSettings, brightness: f64, at: DateTime<Utc>) {
        self.settings = settings;
        self.last_brightness = Some(brightness);
        self.updated_at = at;
    }
}
