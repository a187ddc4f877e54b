//! Sky coordinates, observing site and the plate-solve anchor.

use chrono::{DateTime, Utc};
use qtty::Degrees;
use serde::{Deserialize, Serialize};

/// Geographic location of the camera.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SiteLocation {
    /// Latitude in degrees, north positive.
    pub latitude: f64,
    /// Longitude in degrees, east positive.
    pub longitude: f64,
    /// Elevation above sea level in meters.
    #[serde(default)]
    pub elevation_m: Option<f64>,
}

/// Equatorial coordinate of a point on the sky.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoordinate {
    pub right_ascension: Degrees,
    pub declination: Degrees,
}

impl SkyCoordinate {
    pub fn new(ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            right_ascension: Degrees::new(ra_deg),
            declination: Degrees::new(dec_deg),
        }
    }

    pub fn ra_deg(&self) -> f64 {
        self.right_ascension.value()
    }

    pub fn dec_deg(&self) -> f64 {
        self.declination.value()
    }
}

/// Anchor for rotation tracking, produced by a successful plate solve.
///
/// Right ascension is normalised into `[0, 360)` on construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointingCalibration {
    pub timestamp: DateTime<Utc>,
    pub right_ascension: Degrees,
    pub declination: Degrees,
}

impl PointingCalibration {
    pub fn new(timestamp: DateTime<Utc>, ra_deg: f64, dec_deg: f64) -> Self {
        Self {
            timestamp,
            right_ascension: Degrees::new(ra_deg).wrap_pos(),
            declination: Degrees::new(dec_deg),
        }
    }

    /// The field center at the moment of calibration.
    pub fn center(&self) -> SkyCoordinate {
        SkyCoordinate {
            right_ascension: self.right_ascension,
            declination: self.declination,
        }
    }

    /// Age of the calibration relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.timestamp
    }
}
