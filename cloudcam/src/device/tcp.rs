//! TCP client for the camera server.
//!
//! A fresh connection is opened for every operation, so an aborted watchdog
//! task never leaves a half-read stream behind.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::protocol::DeviceConnection;
use super::{CameraDevice, CapturedFrame, ShutterDevice, ShutterState};
use crate::config::DeviceSettings;
use crate::error::{ErrorContext, OpsError, OpsResult};
use crate::models::ExposureSettings;

async fn connect(address: &str, operation: &str) -> OpsResult<DeviceConnection<TcpStream>> {
    let stream = TcpStream::connect(address).await.map_err(|e| {
        OpsError::transport(
            format!("connect failed: {}", e),
            ErrorContext::new(operation)
                .with_endpoint(address)
                .retryable(),
        )
    })?;
    stream.set_nodelay(true)?;
    debug!(endpoint = %address, operation, "Connected to camera server");
    Ok(DeviceConnection::new(stream, address))
}

/// Camera channel over TCP.
#[derive(Debug, Clone)]
pub struct TcpCameraChannel {
    address: String,
}

impl TcpCameraChannel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(settings.address())
    }
}

#[async_trait]
impl CameraDevice for TcpCameraChannel {
    async fn capture(&self) -> OpsResult<CapturedFrame> {
        let mut conn = connect(&self.address, "capture").await?;
        let (reported, bytes) = conn.fetch_frame().await?;
        info!(
            endpoint = %self.address,
            exposure_secs = reported.exposure_secs,
            gain = reported.gain,
            bytes = bytes.len(),
            "Captured frame"
        );
        Ok(CapturedFrame {
            bytes,
            captured_at: Utc::now(),
            reported,
        })
    }

    async fn apply(&self, settings: ExposureSettings) -> OpsResult<ExposureSettings> {
        let mut conn = connect(&self.address, "apply").await?;
        let acknowledged = conn.apply_settings(settings).await?;
        info!(
            endpoint = %self.address,
            exposure_secs = acknowledged.exposure_secs,
            gain = acknowledged.gain,
            "Applied exposure settings"
        );
        Ok(acknowledged)
    }

    fn endpoint(&self) -> String {
        self.address.clone()
    }
}

/// Shutter channel over TCP.
#[derive(Debug, Clone)]
pub struct TcpShutterChannel {
    address: String,
    reply_timeout: Duration,
}

impl TcpShutterChannel {
    pub fn new(address: impl Into<String>, reply_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            reply_timeout,
        }
    }

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self::new(settings.address(), settings.reply_timeout())
    }
}

#[async_trait]
impl ShutterDevice for TcpShutterChannel {
    async fn set_shutter(&self, state: ShutterState) -> OpsResult<()> {
        let mut conn = connect(&self.address, "shutter").await?;
        let reply = conn.set_shutter(state, self.reply_timeout).await?;
        info!(endpoint = %self.address, state = %state, reply = ?reply, "Shutter command sent");
        Ok(())
    }
}
