//! Field-center tracking from a single plate-solve anchor.
//!
//! The camera is fixed, so the sky turns past it at the sidereal rate. The
//! tracker carries the calibration's right ascension forward by the local
//! sidereal time elapsed since the calibration was taken. Declination does
//! not change.

use chrono::{DateTime, Utc};
use qtty::Degrees;

use super::sidereal::local_apparent_sidereal_time;
use crate::error::{OpsError, OpsResult};
use crate::models::{PointingCalibration, SiteLocation, SkyCoordinate};

/// Degrees of right ascension per hour of elapsed sidereal time.
pub const SIDEREAL_RATE_DEG_PER_HOUR: f64 = 15.04107;

/// Field center at `observation_time` given the anchor `calibration`.
pub fn center_at(
    observation_time: DateTime<Utc>,
    calibration: &PointingCalibration,
    site: &SiteLocation,
) -> SkyCoordinate {
    let lst_now = local_apparent_sidereal_time(observation_time, site.longitude);
    let lst_cal = local_apparent_sidereal_time(calibration.timestamp, site.longitude);
    let delta_lst = (lst_now - lst_cal).wrap_pos();

    let delta_ra = Degrees::new(delta_lst.value() * SIDEREAL_RATE_DEG_PER_HOUR);
    SkyCoordinate {
        right_ascension: (calibration.right_ascension + delta_ra).wrap_pos(),
        declination: calibration.declination,
    }
}

/// Tracker bound to an observing site.
#[derive(Debug, Clone, Copy)]
pub struct PointingTracker {
    site: SiteLocation,
}

impl PointingTracker {
    pub fn new(site: SiteLocation) -> Self {
        Self { site }
    }

    pub fn site(&self) -> &SiteLocation {
        &self.site
    }

    /// Field center at `observation_time`, or [`OpsError::CalibrationMissing`]
    /// if no plate solve has succeeded yet.
    pub fn center_at(
        &self,
        observation_time: DateTime<Utc>,
        calibration: Option<&PointingCalibration>,
    ) -> OpsResult<SkyCoordinate> {
        let calibration = calibration.ok_or(OpsError::CalibrationMissing)?;
        Ok(center_at(observation_time, calibration, &self.site))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn site() -> SiteLocation {
        SiteLocation {
            latitude: 20.019547523714984,
            longitude: -155.6719115353903,
            elevation_m: Some(813.816),
        }
    }

    fn calibration() -> PointingCalibration {
        let t = Utc.with_ymd_and_hms(2025, 7, 16, 7, 6, 10).unwrap();
        PointingCalibration::new(t, 250.0, 19.8)
    }

    #[test]
    fn test_zero_elapsed_is_identity() {
        let cal = calibration();
        let center = center_at(cal.timestamp, &cal, &site());
        assert!((center.ra_deg() - 250.0).abs() < 1e-9);
        assert_eq!(center.dec_deg(), 19.8);
    }

    #[test]
    fn test_one_hour_moves_about_fifteen_degrees() {
        let cal = calibration();
        let later = cal.timestamp + Duration::hours(1);
        let center = center_at(later, &cal, &site());

        // one solar hour is 1.0027379 sidereal hours
        let expected = 250.0 + 1.002_737_909 * SIDEREAL_RATE_DEG_PER_HOUR;
        assert!((center.ra_deg() - expected).abs() < 1e-3, "ra = {}", center.ra_deg());
        assert_eq!(center.dec_deg(), 19.8);
    }

    #[test]
    fn test_missing_calibration() {
        let tracker = PointingTracker::new(site());
        let err = tracker.center_at(Utc::now(), None).unwrap_err();
        assert!(matches!(err, OpsError::CalibrationMissing));
    }

    #[test]
    fn test_tracker_wraps_past_360() {
        let t = Utc.with_ymd_and_hms(2025, 7, 16, 7, 0, 0).unwrap();
        let cal = PointingCalibration::new(t, 355.0, -5.0);
        let center = PointingTracker::new(site())
            .center_at(t + Duration::hours(2), Some(&cal))
            .unwrap();
        assert!(center.ra_deg() < 30.0 && center.ra_deg() >= 0.0);
    }

    proptest! {
        #[test]
        fn prop_ra_in_range_and_dec_preserved(
            ra in -720.0f64..720.0,
            dec in -90.0f64..=90.0,
            minutes in 0i64..(60 * 24 * 10),
        ) {
            let t0 = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
            let cal = PointingCalibration::new(t0, ra, dec);
            let center = center_at(t0 + Duration::minutes(minutes), &cal, &site());
            prop_assert!(center.ra_deg() >= 0.0 && center.ra_deg() < 360.0);
            prop_assert_eq!(center.dec_deg(), dec);
        }

        #[test]
        fn prop_center_is_deterministic(minutes in 0i64..100_000) {
            let cal = calibration();
            let at = cal.timestamp + Duration::minutes(minutes);
            let a = center_at(at, &cal, &site());
            let b = center_at(at, &cal, &site());
            prop_assert_eq!(a, b);
        }
    }
}
