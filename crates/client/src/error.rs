//! Client error types.

use thiserror::Error;

/// Session-layer error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("malformed relay frame: {0}")]
    MalformedFrame(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("protocol error: {0}")]
    Protocol(#[from] negentropy::ProtocolError),

    /// Terminal error reported by the relay for one session, via NEG-ERR
    /// or a negentropy-fatal NOTICE.
    #[error("peer error ({code}): {details}")]
    Peer { code: String, details: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("transport down: {0}")]
    TransportDown(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ClientError {
    /// Build a [`ClientError::Peer`] from a `"code[: details]"` reason
    /// string.
    pub fn peer(reason: &str) -> Self {
        match reason.split_once(':') {
            Some((code, details)) => Self::Peer {
                code: code.trim().to_string(),
                details: details.trim().to_string(),
            },
            None => Self::Peer {
                code: reason.trim().to_string(),
                details: String::new(),
            },
        }
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
