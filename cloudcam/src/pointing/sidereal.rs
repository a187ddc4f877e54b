//! Sidereal time.
//!
//! Greenwich mean sidereal time follows the IAU 2006 expression built on the
//! Earth Rotation Angle (Kaplan, *The IAU Resolutions on Astronomical
//! Reference Systems*, eq. 2.12). Apparent time adds the equation of the
//! equinoxes from the low-precision nutation series in Meeus, *Astronomical
//! Algorithms*, ch. 22, good to about 0.5". UT1 is taken to be UTC; the
//! difference (under 0.9 s) is far below what the overlay can show.

use chrono::{DateTime, Utc};
use qtty::{Degrees, HourAngles};

use crate::models::ModifiedJulianDate;

const J2000_JD: f64 = 2_451_545.0;
const DAYS_PER_JULIAN_CENTURY: f64 = 36_525.0;
const ARCSEC_PER_DEGREE: f64 = 3600.0;

/// Earth Rotation Angle for a UT1 Julian date, in `[0, 360)`.
pub fn earth_rotation_angle(jd_ut1: f64) -> Degrees {
    let du = jd_ut1 - J2000_JD;
    let frac = jd_ut1.rem_euclid(1.0);
    let turns = 0.779_057_273_264_0 + 0.002_737_811_911_354_48 * du + frac;
    Degrees::new(turns.rem_euclid(1.0) * 360.0)
}

/// Greenwich mean sidereal time, in hours `[0, 24)`.
pub fn greenwich_mean_sidereal_time(at: DateTime<Utc>) -> HourAngles {
    let jd = ModifiedJulianDate::from(at).julian_date();
    let t = (jd - J2000_JD) / DAYS_PER_JULIAN_CENTURY;

    let precession_arcsec = 0.014_506
        + 4_612.157_399_66 * t
        + 1.396_677_21 * t.powi(2)
        - 0.000_093_44 * t.powi(3)
        + 0.000_018_82 * t.powi(4);

    let gmst_deg = earth_rotation_angle(jd).value() + precession_arcsec / ARCSEC_PER_DEGREE;
    HourAngles::new(gmst_deg / 15.0).wrap_pos()
}

/// Equation of the equinoxes (apparent minus mean sidereal time), in hours.
pub fn equation_of_equinoxes(at: DateTime<Utc>) -> HourAngles {
    let jd = ModifiedJulianDate::from(at).julian_date();
    let t = (jd - J2000_JD) / DAYS_PER_JULIAN_CENTURY;

    // longitude of the Moon's ascending node, mean longitudes of Sun and Moon
    let omega = (125.044_52 - 1_934.136_261 * t).to_radians();
    let l_sun = (280.466_5 + 36_000.769_8 * t).to_radians();
    let l_moon = (218.316_5 + 481_267.881_3 * t).to_radians();

    let nutation_longitude = -17.20 * omega.sin() - 1.32 * (2.0 * l_sun).sin()
        - 0.23 * (2.0 * l_moon).sin()
        + 0.21 * (2.0 * omega).sin();
    let nutation_obliquity = 9.20 * omega.cos() + 0.57 * (2.0 * l_sun).cos()
        + 0.10 * (2.0 * l_moon).cos()
        - 0.09 * (2.0 * omega).cos();

    let mean_obliquity_deg = 23.439_291_1 - 0.013_004_2 * t;
    let true_obliquity = (mean_obliquity_deg + nutation_obliquity / ARCSEC_PER_DEGREE).to_radians();

    let eqeq_arcsec = nutation_longitude * true_obliquity.cos();
    HourAngles::new(eqeq_arcsec / ARCSEC_PER_DEGREE / 15.0)
}

/// Greenwich apparent sidereal time, in hours `[0, 24)`.
pub fn greenwich_apparent_sidereal_time(at: DateTime<Utc>) -> HourAngles {
    (greenwich_mean_sidereal_time(at) + equation_of_equinoxes(at)).wrap_pos()
}

/// Local apparent sidereal time for an east-positive longitude, in hours `[0, 24)`.
pub fn local_apparent_sidereal_time(at: DateTime<Utc>, longitude_deg: f64) -> HourAngles {
    (greenwich_apparent_sidereal_time(at) + HourAngles::new(longitude_deg / 15.0)).wrap_pos()
}
