//! Observation sessions and the capture attempts they own.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::sun::NightWindow;

/// Terminal outcome of a single capture attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The frame was received and stored at `frame`.
    Success { frame: PathBuf },
    /// The watchdog aborted the attempt.
    TimedOut,
    /// The operation returned an error.
    Failed { message: String },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Success { .. })
    }
}

/// One watchdog-protected invocation of the capture operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureAttempt {
    /// Position in the session's attempt sequence, starting at 1.
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub outcome: AttemptOutcome,
}

/// A frame written to storage during the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredFrame {
    pub captured_at: DateTime<Utc>,
    pub raw: PathBuf,
    /// Overlay-annotated copy, when pointing and rendering succeeded.
    pub annotated: Option<PathBuf>,
}

impl StoredFrame {
    /// Annotated copy if present, raw frame otherwise.
    pub fn best(&self) -> &PathBuf {
        self.annotated.as_ref().unwrap_or(&self.raw)
    }
}

/// One continuous night-capture run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationSession {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub window: NightWindow,
    pub raw_dir: PathBuf,
    pub annotated_dir: PathBuf,
    attempts: Vec<CaptureAttempt>,
    frames: Vec<StoredFrame>,
    closed_at: Option<DateTime<Utc>>,
}

impl ObservationSession {
    pub fn new(
        started_at: DateTime<Utc>,
        window: NightWindow,
        raw_dir: PathBuf,
        annotated_dir: PathBuf,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at,
            window,
            raw_dir,
            annotated_dir,
            attempts: Vec::new(),
            frames: Vec::new(),
            closed_at: None,
        }
    }

    /// Append an attempt, assigning the next sequence number.
    pub fn record_attempt(
        &mut self,
        started_at: DateTime<Utc>,
        elapsed: Duration,
        outcome: AttemptOutcome,
    ) -> &CaptureAttempt {
        let sequence = self.attempts.len() as u64 + 1;
        self.attempts.push(CaptureAttempt {
            sequence,
            started_at,
            elapsed,
            outcome,
        });
        &self.attempts[self.attempts.len() - 1]
    }

    pub fn record_frame(&mut self, frame: StoredFrame) {
        self.frames.push(frame);
    }

    pub fn attempts(&self) -> &[CaptureAttempt] {
        &self.attempts
    }

    pub fn frames(&self) -> &[StoredFrame] {
        &self.frames
    }

    /// Frames captured at or after `cutoff`, oldest first.
    pub fn frames_since(&self, cutoff: DateTime<Utc>) -> Vec<&StoredFrame> {
        self.frames
            .iter()
            .filter(|f| f.captured_at >= cutoff)
            .collect()
    }

    pub fn successful_captures(&self) -> usize {
        self.attempts
            .iter()
            .filter(|a| a.outcome.is_success())
            .count()
    }

    pub fn close(&mut self, at: DateTime<Utc>) {
        self.closed_at = Some(at);
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn session() -> ObservationSession {
        let start = Utc.with_ymd_and_hms(2025, 7, 16, 19, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 7, 17, 6, 0, 0).unwrap();
        ObservationSession::new(
            start,
            NightWindow { start, end },
            PathBuf::from("/tmp/raw"),
            PathBuf::from("/tmp/ovr"),
        )
    }

    #[test]
    fn test_attempt_sequence_is_monotonic() {
        let mut s = session();
        let t = s.started_at;
        s.record_attempt(t, Duration::from_secs(90), AttemptOutcome::TimedOut);
        s.record_attempt(
            t,
            Duration::from_millis(5),
            AttemptOutcome::Failed {
                message: "bad header".into(),
            },
        );
        let last = s
            .record_attempt(
                t,
                Duration::from_secs(3),
                AttemptOutcome::Success {
                    frame: PathBuf::from("/tmp/raw/a.jpg"),
                },
            )
            .clone();

        assert_eq!(last.sequence, 3);
        let seqs: Vec<u64> = s.attempts().iter().map(|a| a.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(s.successful_captures(), 1);
    }

    #[test]
    fn test_frames_since_filters_by_capture_time() {
        let mut s = session();
        let t0 = s.started_at;
        for minutes in [0, 10, 40, 50] {
            s.record_frame(StoredFrame {
                captured_at: t0 + chrono::Duration::minutes(minutes),
                raw: PathBuf::from(format!("/tmp/raw/{}.jpg", minutes)),
                annotated: None,
            });
        }
        let recent = s.frames_since(t0 + chrono::Duration::minutes(30));
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].raw, PathBuf::from("/tmp/raw/40.jpg"));
    }

    #[test]
    fn test_best_prefers_annotated() {
        let frame = StoredFrame {
            captured_at: Utc::now(),
            raw: PathBuf::from("raw.jpg"),
            annotated: Some(PathBuf::from("ovr.jpg")),
        };
        assert_eq!(frame.best(), &PathBuf::from("ovr.jpg"));
    }

    #[test]
    fn test_close_marks_session() {
        let mut s = session();
        assert!(!s.is_closed());
        let t = s.window.end;
        s.close(t);
        assert_eq!(s.closed_at(), Some(t));
    }
}
