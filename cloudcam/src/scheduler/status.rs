//! Operator status reporting on top of an unreliable sink.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::collaborators::StatusSink;
use crate::config::StatusSettings;
use crate::device::ShutterState;
use crate::error::{OpsError, OpsResult};
use crate::watchdog::RetryNotifier;

pub const CAMERA_ON: &str = "ON";
pub const CAMERA_OFF: &str = "OFF";

/// Retries every update until the sink accepts it or shutdown is requested.
#[derive(Clone)]
pub struct StatusReporter {
    sink: Arc<dyn StatusSink>,
    settings: StatusSettings,
    shutdown: CancellationToken,
}

impl StatusReporter {
    pub fn new(sink: Arc<dyn StatusSink>, settings: StatusSettings, shutdown: CancellationToken) -> Self {
        Self {
            sink,
            settings,
            shutdown,
        }
    }

    async fn put_until_success(&self, key: &str, value: &str, comment: &str) -> OpsResult<()> {
        let mut attempt = 0u32;
        loop {
            if self.shutdown.is_cancelled() {
                return Err(OpsError::Shutdown);
            }
            attempt = attempt.saturating_add(1);
            match self.sink.put(key, value, comment).await {
                Ok(()) => {
                    debug!(key, value, attempt, "Status updated");
                    return Ok(());
                }
                Err(e) => warn!(key, value, attempt, error = %e, "Status update failed, retrying"),
            }
            tokio::select! {
                _ = tokio::time::sleep(self.settings.retry_delay()) => {}
                _ = self.shutdown.cancelled() => return Err(OpsError::Shutdown),
            }
        }
    }

    /// Set the camera's operational status string.
    pub async fn set_camera(&self, value: &str) -> OpsResult<()> {
        self.put_until_success(
            &self.settings.camera_key,
            value,
            &self.settings.camera_comment,
        )
        .await
    }

    pub async fn set_shutter(&self, state: ShutterState) -> OpsResult<()> {
        self.put_until_success(
            &self.settings.shutter_key,
            &state.to_string(),
            &self.settings.shutter_comment,
        )
        .await
    }

    /// Mark the camera `OFF` during shutdown.
    ///
    /// Ignores the shutdown token, which is normally already cancelled, and
    /// gives up after `attempts` tries instead.
    pub async fn final_off(&self, attempts: u32) -> bool {
        for attempt in 1..=attempts.max(1) {
            match self
                .sink
                .put(&self.settings.camera_key, CAMERA_OFF, &self.settings.camera_comment)
                .await
            {
                Ok(()) => return true,
                Err(e) => {
                    warn!(attempt, attempts, error = %e, "Final status update failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.retry_delay()).await;
                    }
                }
            }
        }
        error!("Could not mark the camera OFF");
        false
    }
}

#[async_trait]
impl RetryNotifier for StatusReporter {
    async fn notify(&self, message: &str) {
        // shutdown ends the surrounding retry loop on its own
        let _ = self.set_camera(message).await;
    }
}
