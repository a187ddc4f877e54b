//! Retry-forever policy used by the scheduler for device operations.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{Outcome, Watchdog};
use crate::error::{OpsError, OpsResult};

/// Receives the operator-facing message emitted before each retry.
#[async_trait]
pub trait RetryNotifier: Send + Sync {
    async fn notify(&self, message: &str);
}

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptKind {
    Succeeded,
    TimedOut,
    Failed(String),
}

/// Summary of one attempt handed to the observer callback.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptReport {
    /// 1-based attempt number within this retry loop.
    pub number: u32,
    pub elapsed: Duration,
    pub kind: AttemptKind,
}

impl Watchdog {
    /// Retry `make_operation` until it succeeds.
    ///
    /// Each failed attempt sends `"<label> Timeout, retrying..."` or
    /// `"<label> Exception, retrying..."` to `notifier` and then sleeps the
    /// fixed backoff. Returns [`OpsError::Shutdown`] once `shutdown` fires;
    /// nothing else ends the loop.
    pub async fn run_until_success<T, F, Fut, N, A>(
        &self,
        mut make_operation: F,
        notifier: &N,
        shutdown: &CancellationToken,
        mut on_attempt: A,
    ) -> OpsResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = OpsResult<T>> + Send + 'static,
        T: Send + 'static,
        N: RetryNotifier + ?Sized,
        A: FnMut(&AttemptReport),
    {
        let mut number = 0u32;
        loop {
            if shutdown.is_cancelled() {
                return Err(OpsError::Shutdown);
            }
            number = number.saturating_add(1);

            let started = std::time::Instant::now();
            let outcome = tokio::select! {
                outcome = self.run(make_operation()) => outcome,
                _ = shutdown.cancelled() => return Err(OpsError::Shutdown),
            };
            let elapsed = started.elapsed();

            let message = match outcome {
                Outcome::Success(value) => {
                    on_attempt(&AttemptReport {
                        number,
                        elapsed,
                        kind: AttemptKind::Succeeded,
                    });
                    return Ok(value);
                }
                Outcome::TimedOut { .. } => {
                    on_attempt(&AttemptReport {
                        number,
                        elapsed,
                        kind: AttemptKind::TimedOut,
                    });
                    format!("{} Timeout, retrying...", self.label())
                }
                Outcome::Failed(err) => {
                    on_attempt(&AttemptReport {
                        number,
                        elapsed,
                        kind: AttemptKind::Failed(err.to_string()),
                    });
                    format!("{} Exception, retrying...", self.label())
                }
            };

            info!(label = %self.label(), attempt = number, backoff_ms = self.backoff().as_millis() as u64, "{}", message);
            notifier.notify(&message).await;

            tokio::select! {
                _ = tokio::time::sleep(self.backoff()) => {}
                _ = shutdown.cancelled() => return Err(OpsError::Shutdown),
            }
        }
    }
}
