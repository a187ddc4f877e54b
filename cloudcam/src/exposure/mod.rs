//! Exposure control: brightness measurement and the dead-band controller.

pub mod brightness;
pub mod controller;

pub use brightness::{blend_overlay, decode_frame, mean_brightness, measure_frame, SkyMask};
pub use controller::{ExposureController, ExposureTuning};
