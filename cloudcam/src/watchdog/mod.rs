//! Timeout-bounded execution of blocking device operations.
//!
//! Every call that touches the camera or shutter server runs in its own tokio
//! task. If the task does not finish within its budget it is aborted, which
//! drops its future and any socket it holds, and the caller gets
//! [`Outcome::TimedOut`] back instead of hanging.
//!
//! [`Watchdog::run_until_success`] layers the scheduler's retry policy on top:
//! notify, back off, try again, until the operation succeeds or shutdown is
//! requested.

mod retry;

pub use retry::{AttemptKind, AttemptReport, RetryNotifier};

use std::any::Any;
use std::future::Future;
use std::time::{Duration, Instant};

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::error::{OpsError, OpsResult};

/// Default fixed backoff between retries (10 seconds).
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// Result of one watchdog-protected invocation.
#[derive(Debug)]
pub enum Outcome<T> {
    /// The operation completed within its budget.
    Success(T),
    /// The budget expired and the operation was aborted.
    TimedOut { elapsed: Duration },
    /// The operation returned an error or panicked.
    Failed(OpsError),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// Convert into a `Result`, mapping a timeout to [`OpsError::Timeout`].
    pub fn into_result(self, operation: &str, budget: Duration) -> OpsResult<T> {
        match self {
            Outcome::Success(value) => Ok(value),
            Outcome::TimedOut { .. } => Err(OpsError::Timeout {
                operation: operation.to_string(),
                budget,
            }),
            Outcome::Failed(err) => Err(err),
        }
    }
}

/// Run `operation` in an isolated task and wait at most `timeout` for it.
///
/// The operation shares no mutable state with the caller. On expiry the task
/// is aborted before this function returns.
pub async fn run_with_watchdog<F, T>(operation: F, timeout: Duration) -> Outcome<T>
where
    F: Future<Output = OpsResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let started = Instant::now();
    let mut task = AbortOnDrop(tokio::spawn(operation));

    match tokio::time::timeout(timeout, &mut task.0).await {
        Ok(Ok(Ok(value))) => Outcome::Success(value),
        Ok(Ok(Err(err))) => Outcome::Failed(err),
        Ok(Err(join_err)) => Outcome::Failed(join_error_to_ops(join_err)),
        Err(_) => {
            task.0.abort();
            Outcome::TimedOut {
                elapsed: started.elapsed(),
            }
        }
    }
}

/// Aborts the worker if the caller stops waiting (e.g. on shutdown).
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn join_error_to_ops(err: JoinError) -> OpsError {
    if err.is_panic() {
        OpsError::Internal(format!(
            "operation panicked: {}",
            panic_message(err.into_panic())
        ))
    } else {
        OpsError::Internal("operation task was cancelled".to_string())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// A labelled timeout budget plus the backoff used when retrying.
#[derive(Debug, Clone)]
pub struct Watchdog {
    label: String,
    timeout: Duration,
    backoff: Duration,
}

impl Watchdog {
    /// Creates a watchdog with the default backoff.
    pub fn new(label: impl Into<String>, timeout: Duration) -> Self {
        Self {
            label: label.into(),
            timeout,
            backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Single protected attempt.
    pub async fn run<F, T>(&self, operation: F) -> Outcome<T>
    where
        F: Future<Output = OpsResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        debug!(label = %self.label, timeout_ms = self.timeout.as_millis() as u64, "Watchdog attempt");
        let outcome = run_with_watchdog(operation, self.timeout).await;
        match &outcome {
            Outcome::TimedOut { elapsed } => {
                warn!(label = %self.label, elapsed_ms = elapsed.as_millis() as u64, "Operation timed out");
            }
            Outcome::Failed(err) => {
                warn!(label = %self.label, error = %err, kind = err.kind(), "Operation failed");
            }
            Outcome::Success(_) => {}
        }
        outcome
    }
}
