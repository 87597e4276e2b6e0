//! Status surface: a pure projection of `{status, last_error}` for display.

use crate::error::{ErrorKind, SessionError};
use crate::session::{SessionStatus, StatusSnapshot};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Neutral,
    Progress,
    Live,
    Warning,
    Danger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub status: SessionStatus,
    pub label: &'static str,
    pub tone: Tone,
    /// The single message to show, if any
    pub message: Option<String>,
    pub recoverable: Option<bool>,
}

impl StatusView {
    pub fn project(status: SessionStatus, last_error: Option<&SessionError>) -> Self {
        let (label, tone) = match status {
            SessionStatus::Idle if last_error.is_some() => ("Disconnected", Tone::Danger),
            SessionStatus::Idle => ("Ready", Tone::Neutral),
            SessionStatus::Connecting if last_error.is_some() => ("Reconnecting", Tone::Warning),
            SessionStatus::Connecting => ("Connecting", Tone::Progress),
            SessionStatus::Active => ("Live", Tone::Live),
            SessionStatus::Error => match last_error.map(|e| e.kind) {
                Some(ErrorKind::Timeout) => ("Connection timed out", Tone::Warning),
                _ => ("Connection problem", Tone::Warning),
            },
            SessionStatus::Stopping => ("Stopping", Tone::Progress),
        };

        Self {
            status,
            label,
            tone,
            message: last_error.map(|e| e.message.clone()),
            recoverable: last_error.map(|e| e.recoverable),
        }
    }
}

impl From<&StatusSnapshot> for StatusView {
    fn from(snapshot: &StatusSnapshot) -> Self {
        Self::project(snapshot.status, snapshot.last_error.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_without_error_is_ready() {
        let view = StatusView::project(SessionStatus::Idle, None);
        assert_eq!(view.label, "Ready");
        assert_eq!(view.tone, Tone::Neutral);
        assert!(view.message.is_none());
        assert!(view.recoverable.is_none());
    }

    #[test]
    fn test_fatal_error_shows_its_message_once_idle() {
        let err = SessionError::remote("quota exceeded");
        let view = StatusView::project(SessionStatus::Idle, Some(&err));
        assert_eq!(view.tone, Tone::Danger);
        assert_eq!(view.message.as_deref(), Some("quota exceeded"));
        assert_eq!(view.recoverable, Some(false));
    }

    #[test]
    fn test_recoverable_errors_warn() {
        let err = SessionError::timeout("Connection attempt 1 timed out");
        let view = StatusView::project(SessionStatus::Error, Some(&err));
        assert_eq!(view.label, "Connection timed out");
        assert_eq!(view.tone, Tone::Warning);
        assert_eq!(view.recoverable, Some(true));

        let view = StatusView::project(SessionStatus::Connecting, Some(&err));
        assert_eq!(view.label, "Reconnecting");
    }

    #[test]
    fn test_projection_from_snapshot() {
        let mut snapshot = StatusSnapshot::idle();
        snapshot.status = SessionStatus::Active;
        let view = StatusView::from(&snapshot);
        assert_eq!(view.label, "Live");
        assert_eq!(serde_json::to_value(&view).unwrap()["tone"], "live");
    }
}
