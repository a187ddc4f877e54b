//! # Cloud Cam operations controller
//!
//! Unattended control loop for an all-sky cloud camera. The crate captures
//! frames from a remote camera over a small line-oriented TCP protocol, keeps
//! exposure and gain inside a target brightness band, tracks where the field
//! center sits on the sky as the Earth rotates, and supervises every blocking
//! device call with a watchdog so a hung socket cannot stall the night.
//!
//! ## Architecture
//!
//! The crate is organized into several logical modules:
//!
//! - [`watchdog`]: Timeout-bounded execution of device operations and the
//!   retry-forever combinator built on top of it
//! - [`device`]: Camera/shutter channel traits, the wire protocol and the TCP client
//! - [`exposure`]: Dead-band exposure/gain controller and frame brightness measurement
//! - [`pointing`]: Sidereal time, rotation tracking, calibration persistence and WCS headers
//! - [`collaborators`]: Traits and process-backed adapters for the plate solver,
//!   overlay renderer, timelapse assembler, sun-time source, status sink and frame storage
//! - [`scheduler`]: The day/night state machine that drives a night session
//! - [`models`]: Plain data types shared across modules
//! - [`config`]: TOML configuration with environment overrides
//!
//! ## Data flow
//!
//! ```text
//! Scheduler ─► Watchdog ─► CameraDevice::capture ─► frame ─► brightness ─► ExposureController
//!     │                                                                         │
//!     │                          CameraDevice::apply ◄── Watchdog ◄─────────────┘
//!     │
//!     └─► PointingTracker::center_at ─► OverlayRenderer ─► annotated frame ─► FrameStore
//! ```

pub mod collaborators;
pub mod config;
pub mod device;
pub mod error;
pub mod exposure;
pub mod models;
pub mod pointing;
pub mod scheduler;
pub mod watchdog;

pub use config::CloudcamConfig;
pub use error::{ErrorContext, OpsError, OpsResult};
pub use scheduler::{SchedulerState, SessionScheduler};
pub use watchdog::{Outcome, Watchdog};
