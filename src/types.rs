//! Error types for Latchkey
//!
//! Only `Config`, `Resolution` and `SessionOpen` are ever surfaced by the
//! top-level load operation. `Transport` covers session I/O failures that
//! occur after a container is open; those are absorbed by the capability
//! attacher (a failed discovery attempt is not an error, the next context
//! change gives another opportunity).

/// Main error type for Latchkey operations
#[derive(Debug, thiserror::Error)]
pub enum LatchkeyError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Session open error: {0}")]
    SessionOpen(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl LatchkeyError {
    /// Whether this error kind is fatal to a load call.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Transport(_))
    }
}

impl From<serde_json::Error> for LatchkeyError {
    fn from(err: serde_json::Error) -> Self {
        Self::Transport(format!("JSON error: {}", err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LatchkeyError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

/// Result type alias for Latchkey operations
pub type Result<T> = std::result::Result<T, LatchkeyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(LatchkeyError::Config("x".into()).is_fatal());
        assert!(LatchkeyError::Resolution("x".into()).is_fatal());
        assert!(LatchkeyError::SessionOpen("x".into()).is_fatal());
        assert!(!LatchkeyError::Transport("x".into()).is_fatal());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = LatchkeyError::Resolution("service returned 500".into());
        assert_eq!(err.to_string(), "Resolution error: service returned 500");
    }
}
