use thiserror::Error;

/// Fault classes surfaced to the hosting page. A missing cue sheet is not
/// represented here: thumbnail absence silently disables the preview feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Media,
    Unsupported,
    Fatal,
}

/// A player failure after recovery was exhausted.
#[derive(Debug, Clone, Error)]
pub enum PlayerError {
    #[error("network failure while loading the stream: {0}")]
    Network(String),
    #[error("media decode failure: {0}")]
    Media(String),
    #[error("this stream cannot be played in this environment: {0}")]
    Unsupported(String),
    #[error("playback failed: {0}")]
    Fatal(String),
}

impl PlayerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(_) => ErrorKind::Network,
            Self::Media(_) => ErrorKind::Media,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network(m) | Self::Media(m) | Self::Unsupported(m) | Self::Fatal(m) => m,
        }
    }
}
