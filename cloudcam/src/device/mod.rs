//! Camera and shutter device channels.
//!
//! The camera server speaks a small line protocol (see [`protocol`]). The
//! scheduler only sees the [`CameraDevice`] and [`ShutterDevice`] traits, so
//! tests can swap in scripted fakes and the TCP client stays in [`tcp`].
//!
//! Implementations must be cheap to clone into a watchdog task: every method
//! takes `&self` and the scheduler wraps the device in an `Arc`.

pub mod protocol;
pub mod tcp;

pub use tcp::{TcpCameraChannel, TcpShutterChannel};

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::OpsResult;
use crate::models::ExposureSettings;

/// Frame bytes exactly as sent by the camera, plus the settings it reported.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub bytes: Vec<u8>,
    pub captured_at: DateTime<Utc>,
    /// Exposure and gain the camera reported just before the transfer.
    pub reported: ExposureSettings,
}

/// Sun shutter position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutterState {
    Open,
    Closed,
}

impl ShutterState {
    /// Argument of the `shutter` command.
    pub fn wire_token(&self) -> &'static str {
        match self {
            ShutterState::Open => "OPEN",
            ShutterState::Closed => "close",
        }
    }
}

impl fmt::Display for ShutterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutterState::Open => f.write_str("OPEN"),
            ShutterState::Closed => f.write_str("CLOSED"),
        }
    }
}

/// Remote all-sky camera.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Read current settings and transfer one frame.
    async fn capture(&self) -> OpsResult<CapturedFrame>;

    /// Push new settings; returns the values the camera acknowledged.
    async fn apply(&self, settings: ExposureSettings) -> OpsResult<ExposureSettings>;

    /// Human-readable endpoint for logs.
    fn endpoint(&self) -> String;
}

/// Remote sun shutter.
#[async_trait]
pub trait ShutterDevice: Send + Sync {
    async fn set_shutter(&self, state: ShutterState) -> OpsResult<()>;
}
