use std::fmt;

use crate::models::NightWindow;

/// Position of the scheduler in the day/night cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Between sessions; the next step looks up sun times.
    Idle,
    /// Waiting for the sun-time source to answer.
    AwaitingSunTimes,
    /// Daytime; sleeping until `next_night` begins.
    DaytimeWait { next_night: NightWindow },
    /// Capturing until `window.end`.
    NightCapturing { window: NightWindow },
    /// Sunrise reached; assembling the night and marking the camera off.
    SessionClosing,
}

impl SchedulerState {
    pub fn name(&self) -> &'static str {
        match self {
            SchedulerState::Idle => "idle",
            SchedulerState::AwaitingSunTimes => "awaiting_sun_times",
            SchedulerState::DaytimeWait { .. } => "daytime_wait",
            SchedulerState::NightCapturing { .. } => "night_capturing",
            SchedulerState::SessionClosing => "session_closing",
        }
    }

    pub fn is_night(&self) -> bool {
        matches!(self, SchedulerState::NightCapturing { .. })
    }
}

impl fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
