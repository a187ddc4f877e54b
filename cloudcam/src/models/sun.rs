//! Sunrise/sunset boundaries and the night window derived from them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key understood by the sun-time source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SunEvent {
    Sunrise,
    Sunset,
}

impl SunEvent {
    /// Key name used by the ephemeris service.
    pub fn key(&self) -> &'static str {
        match self {
            SunEvent::Sunrise => "sunriseTime",
            SunEvent::Sunset => "sunsetTime",
        }
    }
}

impl fmt::Display for SunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Half-open interval `[start, end)` between a sunset and the following sunrise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NightWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl NightWindow {
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    fn shifted(&self, days: i64) -> Self {
        Self {
            start: self.start + Duration::days(days),
            end: self.end + Duration::days(days),
        }
    }
}

/// Whether it is currently night, and the window that applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPhase {
    /// Inside a night window; capture until `end`.
    Night(NightWindow),
    /// Daytime; the next night starts at `next_night.start`.
    Day { next_night: NightWindow },
}

/// Sunrise and sunset as reported by the sun-time source.
///
/// The source may report today's or tomorrow's events depending on when it
/// was last refreshed, so the pair is normalised into a sunset→sunrise window
/// shorter than one day and then shifted by whole days around `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SunTimes {
    pub sunrise: DateTime<Utc>,
    pub sunset: DateTime<Utc>,
}

/// Upper bound on whole-day shifts when the reported times are stale.
const MAX_DAY_SHIFT: i64 = 366;

impl SunTimes {
    pub fn new(sunrise: DateTime<Utc>, sunset: DateTime<Utc>) -> Self {
        Self { sunrise, sunset }
    }

    /// The sunset→sunrise window anchored at the reported sunset.
    pub fn base_window(&self) -> NightWindow {
        let one_day = Duration::days(1);
        let mut end = self.sunrise;
        while end <= self.sunset {
            end += one_day;
        }
        while end - self.sunset > one_day {
            end -= one_day;
        }
        NightWindow {
            start: self.sunset,
            end,
        }
    }

    /// Classify `now` as night (with the window to capture through) or day
    /// (with the next window to wait for).
    pub fn phase_at(&self, now: DateTime<Utc>) -> DayPhase {
        let base = self.base_window();
        let mut shift = -1;
        let mut window = base.shifted(shift);
        while window.end <= now && shift < MAX_DAY_SHIFT {
            shift += 1;
            window = base.shifted(shift);
        }
        if window.contains(now) {
            DayPhase::Night(window)
        } else {
            DayPhase::Day { next_night: window }
        }
    }
}
