//! Session lifecycle events.

use serde::{Deserialize, Serialize};

use crate::{DisplayEvent, SessionId, SessionState, StopTrigger, TransportKind};

/// Event published by a session controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Lifecycle state transition.
    StateChanged { from: SessionState, to: SessionState },
    /// Backend issued a session.
    SessionIssued { session_id: SessionId },
    /// One endpoint candidate could not be used.
    CandidateFailed {
        kind: TransportKind,
        url: String,
        error: String,
    },
    /// Connection-state transition from the display adapter.
    Display(DisplayEvent),
    /// A stop request was dispatched for a session.
    StopIssued {
        session_id: SessionId,
        trigger: StopTrigger,
    },
    /// The current attempt failed and was surfaced to the caller.
    Failed { message: String },
}

impl SessionEvent {
    /// User-facing status line, if this event changes it.
    #[must_use]
    pub fn status_text(&self) -> Option<String> {
        match self {
            Self::StateChanged { to, .. } => match to {
                SessionState::Starting => Some("Starting...".to_string()),
                SessionState::Connecting => Some("Connecting...".to_string()),
                SessionState::Connected => Some("Connected".to_string()),
                SessionState::Idle | SessionState::Ended => None,
            },
            Self::Display(DisplayEvent::Connecting) => Some("Handshaking...".to_string()),
            Self::Display(DisplayEvent::Disconnected { reason }) => {
                let reason = if reason.is_empty() { "Unknown" } else { reason };
                Some(format!("Disconnected: {reason}"))
            }
            Self::Display(DisplayEvent::Error { detail }) => Some(format!("Error: {detail}")),
            Self::StopIssued { .. } => Some("Stopped".to_string()),
            Self::Failed { message } => Some(message.clone()),
            Self::Display(DisplayEvent::Connected)
            | Self::SessionIssued { .. }
            | Self::CandidateFailed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text() {
        let disconnected = SessionEvent::Display(DisplayEvent::Disconnected {
            reason: "idle timeout".to_string(),
        });
        assert_eq!(
            disconnected.status_text().as_deref(),
            Some("Disconnected: idle timeout")
        );

        let unknown = SessionEvent::Display(DisplayEvent::Disconnected {
            reason: String::new(),
        });
        assert_eq!(unknown.status_text().as_deref(), Some("Disconnected: Unknown"));

        let handshaking = SessionEvent::Display(DisplayEvent::Connecting);
        assert_eq!(handshaking.status_text().as_deref(), Some("Handshaking..."));

        let issued = SessionEvent::SessionIssued {
            session_id: "abc123".into(),
        };
        assert_eq!(issued.status_text(), None);
    }

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::StateChanged {
            from: SessionState::Starting,
            to: SessionState::Connecting,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("state_changed"));

        let parsed: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
