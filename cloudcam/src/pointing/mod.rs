//! Pointing: where the fixed camera is looking on the sky right now.
//!
//! - [`sidereal`]: mean/apparent sidereal time
//! - [`tracker`]: carries a plate-solve anchor forward in time
//! - [`store`]: the persisted calibration
//! - [`wcs`]: reading and repointing the solver's WCS header

pub mod sidereal;
pub mod store;
pub mod tracker;
pub mod wcs;

pub use store::CalibrationStore;
pub use tracker::{center_at, PointingTracker, SIDEREAL_RATE_DEG_PER_HOUR};
