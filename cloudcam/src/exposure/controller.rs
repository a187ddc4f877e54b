//! Dead-band proportional exposure/gain controller.
//!
//! The controller nudges one axis per frame toward a target mean grey level.
//! Inside the dead band nothing changes; far from the target the step caps
//! widen so the camera recovers quickly at dusk and dawn.

use serde::{Deserialize, Serialize};

use crate::error::{OpsError, OpsResult};
use crate::models::ExposureSettings;

/// Controller constants. Every field can be overridden from `[exposure]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureTuning {
    /// Mean grey level the controller settles on.
    pub target_mean: f64,
    /// No change while `|brightness - target_mean|` is at most this.
    pub dead_band: f64,
    /// Beyond this error the fast step caps apply.
    pub fast_threshold: f64,
    /// Seconds of exposure per grey level of error.
    pub k_etime_per_level: f64,
    /// Gain units per grey level of error.
    pub k_gain_per_level: f64,
    pub max_etime_step: f64,
    pub max_gain_step: f64,
    pub fast_max_etime_step: f64,
    pub fast_max_gain_step: f64,
    pub min_etime: f64,
    pub max_etime: f64,
    pub min_gain: f64,
    pub max_gain: f64,
    /// Floor gain steps to whole units.
    pub discrete_gain: bool,
}

impl Default for ExposureTuning {
    fn default() -> Self {
        Self {
            target_mean: 52.0,
            dead_band: 1.5,
            fast_threshold: 30.0,
            k_etime_per_level: 0.05,
            k_gain_per_level: 1.5,
            max_etime_step: 2.5,
            max_gain_step: 50.0,
            fast_max_etime_step: 7.5,
            fast_max_gain_step: 150.0,
            min_etime: 0.001,
            max_etime: 45.0,
            min_gain: 0.0,
            max_gain: 510.0,
            discrete_gain: true,
        }
    }
}

impl ExposureTuning {
    pub fn validate(&self) -> OpsResult<()> {
        let fields = [
            ("target_mean", self.target_mean),
            ("dead_band", self.dead_band),
            ("fast_threshold", self.fast_threshold),
            ("k_etime_per_level", self.k_etime_per_level),
            ("k_gain_per_level", self.k_gain_per_level),
            ("max_etime_step", self.max_etime_step),
            ("max_gain_step", self.max_gain_step),
            ("fast_max_etime_step", self.fast_max_etime_step),
            ("fast_max_gain_step", self.fast_max_gain_step),
            ("min_etime", self.min_etime),
            ("max_etime", self.max_etime),
            ("min_gain", self.min_gain),
            ("max_gain", self.max_gain),
        ];
        for (name, value) in fields {
            if !value.is_finite() || value < 0.0 {
                return Err(OpsError::Configuration(format!(
                    "exposure.{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.min_etime >= self.max_etime {
            return Err(OpsError::Configuration(format!(
                "exposure.min_etime ({}) must be below max_etime ({})",
                self.min_etime, self.max_etime
            )));
        }
        if self.min_gain >= self.max_gain {
            return Err(OpsError::Configuration(format!(
                "exposure.min_gain ({}) must be below max_gain ({})",
                self.min_gain, self.max_gain
            )));
        }
        if self.fast_threshold < self.dead_band {
            return Err(OpsError::Configuration(
                "exposure.fast_threshold must not be inside the dead band".to_string(),
            ));
        }
        if self.fast_max_etime_step < self.max_etime_step
            || self.fast_max_gain_step < self.max_gain_step
        {
            return Err(OpsError::Configuration(
                "exposure fast step caps must be at least the normal caps".to_string(),
            ));
        }
        Ok(())
    }

    fn clamp_etime(&self, v: f64) -> f64 {
        v.clamp(self.min_etime, self.max_etime)
    }

    fn clamp_gain(&self, v: f64) -> f64 {
        v.clamp(self.min_gain, self.max_gain)
    }
}

/// Pure, reentrant controller.
#[derive(Debug, Clone, Default)]
pub struct ExposureController {
    tuning: ExposureTuning,
}

impl ExposureController {
    pub fn new(tuning: ExposureTuning) -> Self {
        Self { tuning }
    }

    pub fn tuning(&self) -> &ExposureTuning {
        &self.tuning
    }

    /// Compute `(exposure_secs, gain)` for the next frame.
    pub fn next_settings(&self, brightness: f64, exposure_secs: f64, gain: f64) -> (f64, f64) {
        let t = &self.tuning;

        if !brightness.is_finite() {
            return (t.clamp_etime(exposure_secs), t.clamp_gain(gain));
        }

        let diff = brightness - t.target_mean;
        let error = diff.abs();
        if error <= t.dead_band {
            return (t.clamp_etime(exposure_secs), t.clamp_gain(gain));
        }

        let (etime_cap, gain_cap) = if error > t.fast_threshold {
            (t.fast_max_etime_step, t.fast_max_gain_step)
        } else {
            (t.max_etime_step, t.max_gain_step)
        };
        let etime_step = (error * t.k_etime_per_level).min(etime_cap);
        let mut gain_step = (error * t.k_gain_per_level).min(gain_cap);
        if t.discrete_gain {
            gain_step = gain_step.floor();
        }

        let (mut new_etime, mut new_gain) = (exposure_secs, gain);
        if diff > 0.0 {
            // too bright: gain first, exposure once gain is exhausted
            if gain > t.min_gain {
                new_gain = gain - gain_step;
            } else {
                new_etime = exposure_secs - etime_step;
            }
        } else if exposure_secs < t.max_etime {
            new_etime = exposure_secs + etime_step;
        } else {
            new_gain = gain + gain_step;
        }

        (t.clamp_etime(new_etime), t.clamp_gain(new_gain))
    }

    /// [`next_settings`](Self::next_settings) over an [`ExposureSettings`].
    pub fn adjust(&self, brightness: f64, current: ExposureSettings) -> ExposureSettings {
        let (exposure_secs, gain) = self.next_settings(brightness, current.exposure_secs, current.gain);
        ExposureSettings::new(exposure_secs, gain)
    }
}
