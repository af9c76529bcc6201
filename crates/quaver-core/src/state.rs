// Player state machine and observable snapshot

use crate::error::{AudioError, ErrorKind};
use std::fmt;
use std::time::Duration;

/// State of one transport controller.
///
/// Transitions happen only through controller operations or the
/// end-of-stream signal; `Errored` carries the failure that ended the
/// session.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayState {
    /// No session yet
    Idle,
    /// Session is preloading and probing
    Loading,
    /// Samples are flowing to the output
    Playing,
    /// Pause gate engaged
    Paused,
    /// Session torn down by the caller or a premature end of stream
    Stopped,
    /// Stream played through to its end
    Completed,
    /// Session ended with a terminal failure
    Errored { kind: ErrorKind, message: String },
}

impl PlayState {
    pub fn from_error(err: &AudioError) -> Self {
        PlayState::Errored {
            kind: err.kind(),
            message: err.message().to_string(),
        }
    }

    pub fn is_errored(&self) -> bool {
        matches!(self, PlayState::Errored { .. })
    }
}

impl fmt::Display for PlayState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PlayState::Idle => f.write_str("idle"),
            PlayState::Loading => f.write_str("loading"),
            PlayState::Playing => f.write_str("playing"),
            PlayState::Paused => f.write_str("paused"),
            PlayState::Stopped => f.write_str("stopped"),
            PlayState::Completed => f.write_str("completed"),
            PlayState::Errored { kind, .. } => write!(f, "errored ({kind})"),
        }
    }
}

/// Snapshot of the observable playback telemetry. Safe to request from any
/// thread at any cadence.
#[derive(Debug, Clone)]
pub struct PlaybackSnapshot {
    pub state: PlayState,
    pub position: Duration,
    /// Zero when neither the decoder nor the resolver reported a duration
    pub duration: Duration,
    pub volume: f64,
    pub last_error: Option<AudioError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errored_state_carries_kind() {
        let err = AudioError::Network("retries exhausted".into());
        let state = PlayState::from_error(&err);
        assert!(state.is_errored());
        assert_eq!(state.to_string(), "errored (network)");
    }

    #[test]
    fn display_names_are_lowercase() {
        assert_eq!(PlayState::Playing.to_string(), "playing");
        assert_eq!(PlayState::Completed.to_string(), "completed");
    }
}
