//! Error types for stomp-client.

use thiserror::Error;

/// Main error type for all broker operations.
#[derive(Debug, Error)]
pub enum StompError {
    /// I/O error on the byte channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CONNECT sequence failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Reading or decoding a frame failed.
    #[error("receive error: {0}")]
    Receive(String),

    /// Encoding or writing a frame failed.
    #[error("transmit error: {0}")]
    Transmit(String),

    /// The byte after a `content-length` body was not the NUL terminator.
    #[error("invalid content length: expected NUL terminator, found byte {found:#04x}")]
    InvalidContentLength {
        /// The byte found where the terminator was expected.
        found: u8,
    },

    /// The stream ended where a frame (or the rest of one) was expected.
    #[error("no data: {0}")]
    NoData(String),

    /// `subscribe` was called without a listener.
    #[error("no listener given")]
    NoListener,

    /// Malformed frame (bad header line, unparsable content-length, ...).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Connection URI could not be decomposed.
    #[error("invalid URI: {0}")]
    InvalidUri(String),

    /// Configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON configuration could not be parsed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StompError {
    /// Whether a retry on a fresh channel may succeed.
    ///
    /// Caller misuse and framing violations are never retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            StompError::NoListener
                | StompError::InvalidContentLength { .. }
                | StompError::InvalidUri(_)
                | StompError::Config(_)
                | StompError::Json(_)
        )
    }
}

/// Result type alias using StompError.
pub type Result<T> = std::result::Result<T, StompError>;
