//! Events broadcast by the session controller to host frontends.

use serde::{Deserialize, Serialize};

/// Emitted whenever the model produces transcript text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Transcript text for this event.
    pub text: String,
}

/// Emitted whenever the session changes state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub state: SessionState,
    /// Optional human-readable detail (e.g. an error message).
    pub detail: Option<String>,
}

/// Lifecycle state of a session.
///
/// Interruption is not a state: barge-in happens inside `Streaming` and the
/// session stays in `Streaming` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No live resources; `start()` may be called.
    Idle,
    /// Acquiring microphone and opening the duplex stream.
    Connecting,
    /// Bidirectional audio is flowing.
    Streaming,
    /// Teardown in progress after `stop()` or a remote close.
    Closing,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_camel_case() {
        let event = TranscriptEvent {
            seq: 4,
            text: "ನಮಸ್ಕಾರ".into(),
        };
        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 4);
        assert_eq!(json["text"], "ನಮಸ್ಕಾರ");
    }

    #[test]
    fn status_event_serializes_with_lowercase_state() {
        let event = SessionStatusEvent {
            state: SessionState::Connecting,
            detail: Some("opening microphone".into()),
        };
        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["state"], "connecting");
        assert_eq!(json["detail"], "opening microphone");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.state, SessionState::Connecting);
    }

    #[test]
    fn session_state_rejects_non_lowercase_values() {
        assert!(serde_json::from_str::<SessionState>("\"Streaming\"").is_err());
        assert!(serde_json::from_str::<SessionState>("\"streaming\"").is_ok());
    }
}
