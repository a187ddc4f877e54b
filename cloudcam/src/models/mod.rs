//! Plain data types shared by the controller, tracker and scheduler.

pub mod exposure;
pub mod pointing;
pub mod session;
pub mod sun;
pub mod time;

pub use exposure::{ExposureSettings, ExposureState};
pub use pointing::{PointingCalibration, SiteLocation, SkyCoordinate};
pub use session::{AttemptOutcome, CaptureAttempt, ObservationSession, StoredFrame};
pub use sun::{DayPhase, NightWindow, SunEvent, SunTimes};
pub use time::ModifiedJulianDate;
