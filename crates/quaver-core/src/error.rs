// Error handling for the playback pipeline

use std::fmt;

/// Classification of a playback error. Matches the taxonomy used by the
/// state machine: terminal session failures carry their kind into the
/// `Errored` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Caller-supplied input was rejected
    Input,
    /// Operation is invalid in the current player state
    State,
    /// Value outside its documented range
    Range,
    /// Download or HTTP failure
    Network,
    /// Stream probe or decode failure
    Decode,
    /// Output device failure
    Audio,
    /// A bounded wait expired
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Input => "input",
            ErrorKind::State => "state",
            ErrorKind::Range => "range",
            ErrorKind::Network => "network",
            ErrorKind::Decode => "decode",
            ErrorKind::Audio => "audio",
            ErrorKind::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Playback error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Rejected caller input (empty URL, malformed identifier)
    Input(String),

    /// Operation not valid in the current state
    State(String),

    /// Out-of-range volume or seek target
    Range(String),

    /// Network error (download/streaming)
    Network(String),

    /// Decoding error (probe failure, corrupt stream)
    Decode(String),

    /// Output device error
    Audio(String),

    /// Timed out waiting on a bounded operation
    Timeout(String),
}

impl AudioError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::Input(_) => ErrorKind::Input,
            AudioError::State(_) => ErrorKind::State,
            AudioError::Range(_) => ErrorKind::Range,
            AudioError::Network(_) => ErrorKind::Network,
            AudioError::Decode(_) => ErrorKind::Decode,
            AudioError::Audio(_) => ErrorKind::Audio,
            AudioError::Timeout(_) => ErrorKind::Timeout,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AudioError::Input(msg)
            | AudioError::State(msg)
            | AudioError::Range(msg)
            | AudioError::Network(msg)
            | AudioError::Decode(msg)
            | AudioError::Audio(msg)
            | AudioError::Timeout(msg) => msg,
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} error: {}", self.kind(), self.message())
    }
}

impl std::error::Error for AudioError {}

/// Result type alias for playback operations
pub type Result<T> = std::result::Result<T, AudioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(AudioError::Network("down".into()).kind(), ErrorKind::Network);
        assert_eq!(AudioError::Timeout("slow".into()).kind(), ErrorKind::Timeout);
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = AudioError::Decode("bad frame".into());
        assert_eq!(err.to_string(), "decode error: bad frame");
    }
}
