//! Recording session entity and its status machine.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

pub type SessionId = Uuid;

/// Recording session states.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingStatus {
    #[default]
    Initializing,
    BrowserStarting,
    Authenticating,
    WaitingForStream,
    Recording,
    Completed,
    /// An attempt failed; may be followed by a retry.
    Failed,
    Stopped,
    /// Infrastructure failure (browser launch, filesystem); may be followed by a retry.
    Error,
}

impl RecordingStatus {
    /// States a session can end in.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped | Self::Error)
    }

    /// States in which an attempt is in progress.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::BrowserStarting | Self::Authenticating | Self::WaitingForStream | Self::Recording
        )
    }

    pub fn can_transition_to(&self, target: RecordingStatus) -> bool {
        use RecordingStatus::*;

        match (self, target) {
            (Initializing, BrowserStarting) => true,
            (BrowserStarting, Authenticating) => true,
            (Authenticating, WaitingForStream) => true,
            (WaitingForStream, Recording) => true,
            (Recording, Completed) => true,

            // Any stage can fail.
            (Initializing | BrowserStarting | Authenticating | WaitingForStream | Recording, Failed | Error) => true,

            // Retry after backoff.
            (Failed | Error, BrowserStarting) => true,

            // Stop is accepted until the session has completed or stopped.
            (Completed | Stopped, Stopped) => false,
            (_, Stopped) => true,

            _ => false,
        }
    }

    pub fn transition_to(&self, target: RecordingStatus) -> Result<RecordingStatus, Error> {
        if self.can_transition_to(target) {
            Ok(target)
        } else {
            Err(Error::InvalidStateTransition {
                from: self.to_string(),
                to: target.to_string(),
            })
        }
    }
}

/// One recording request and its progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    pub id: SessionId,
    pub target_url: String,
    pub channel: String,
    pub status: RecordingStatus,
    pub started_at: DateTime<Utc>,
    /// Set once the session will make no further progress.
    pub ended_at: Option<DateTime<Utc>>,
    /// Attempts started so far, 1-based.
    pub attempt: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub manifest_url: Option<String>,
    pub cookie_file: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub final_path: Option<PathBuf>,
    /// Capture ran against the page URL because no manifest was seen.
    pub degraded: bool,
}

impl RecordingSession {
    pub fn new(target_url: impl Into<String>, channel: impl Into<String>, max_retries: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            target_url: target_url.into(),
            channel: channel.into(),
            status: RecordingStatus::Initializing,
            started_at: Utc::now(),
            ended_at: None,
            attempt: 0,
            max_retries,
            last_error: None,
            manifest_url: None,
            cookie_file: None,
            output_path: None,
            final_path: None,
            degraded: false,
        }
    }

    /// Move to `target`, rejecting transitions the status machine does not allow.
    pub fn transition_to(&mut self, target: RecordingStatus) -> Result<(), Error> {
        self.status = self.status.transition_to(target)?;
        Ok(())
    }

    /// Record a failed attempt.
    pub fn fail(&mut self, status: RecordingStatus, reason: impl Into<String>) -> Result<(), Error> {
        self.transition_to(status)?;
        self.last_error = Some(reason.into());
        Ok(())
    }

    /// Mark the session as ended in its current status.
    pub fn finish(&mut self) {
        if self.ended_at.is_none() {
            self.ended_at = Some(Utc::now());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Reset per-attempt fields before a retry.
    pub fn begin_attempt(&mut self) -> Result<(), Error> {
        self.transition_to(RecordingStatus::BrowserStarting)?;
        self.attempt += 1;
        self.manifest_url = None;
        self.cookie_file = None;
        self.output_path = None;
        self.degraded = false;
        Ok(())
    }

    pub fn duration(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_status_strings() {
        assert_eq!(RecordingStatus::WaitingForStream.to_string(), "WAITING_FOR_STREAM");
        assert_eq!(
            RecordingStatus::from_str("BROWSER_STARTING").unwrap(),
            RecordingStatus::BrowserStarting
        );
        assert_eq!(
            serde_json::to_string(&RecordingStatus::Recording).unwrap(),
            "\"RECORDING\""
        );
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut session = RecordingSession::new("https://x.test/alice", "alice", 3);
        session.begin_attempt().unwrap();
        for status in [
            RecordingStatus::Authenticating,
            RecordingStatus::WaitingForStream,
            RecordingStatus::Recording,
            RecordingStatus::Completed,
        ] {
            session.transition_to(status).unwrap();
        }
        assert_eq!(session.attempt, 1);
        assert_eq!(session.status, RecordingStatus::Completed);
    }

    #[test]
    fn test_retry_after_failure() {
        let mut session = RecordingSession::new("u", "c", 3);
        session.begin_attempt().unwrap();
        session.fail(RecordingStatus::Failed, "capture exited").unwrap();
        session.begin_attempt().unwrap();
        assert_eq!(session.attempt, 2);
        assert_eq!(session.last_error.as_deref(), Some("capture exited"));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!RecordingStatus::Completed.can_transition_to(RecordingStatus::Recording));
        assert!(!RecordingStatus::Initializing.can_transition_to(RecordingStatus::Recording));
        assert!(!RecordingStatus::Stopped.can_transition_to(RecordingStatus::Stopped));
        assert!(!RecordingStatus::Completed.can_transition_to(RecordingStatus::Stopped));

        let err = RecordingStatus::Completed
            .transition_to(RecordingStatus::Recording)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_stop_accepted_from_waiting_states() {
        for status in [
            RecordingStatus::Initializing,
            RecordingStatus::BrowserStarting,
            RecordingStatus::Authenticating,
            RecordingStatus::WaitingForStream,
            RecordingStatus::Recording,
            RecordingStatus::Failed,
        ] {
            assert!(status.can_transition_to(RecordingStatus::Stopped), "{status}");
        }
    }

    #[test]
    fn test_finish_is_sticky() {
        let mut session = RecordingSession::new("u", "c", 0);
        session.finish();
        let ended = session.ended_at;
        session.finish();
        assert_eq!(session.ended_at, ended);
        assert!(session.is_finished());
    }
}
