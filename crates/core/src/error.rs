use thiserror::Error;

/// Protocol error type.
///
/// The engine surfaces these to its caller and never retries internally;
/// the session layer converts them into session termination.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Wire bytes cannot be parsed: varint overrun, oversized id prefix,
    /// truncated bound/fingerprint/id list, unknown range mode.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// The leading version byte does not identify a protocol we speak.
    #[error("unsupported protocol version: 0x{0:02x}")]
    UnsupportedVersion(u8),

    /// Driver called out of order: `reconcile` before `initiate`, or
    /// `initiate` twice.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// Caller-supplied record is unusable: id is not 32 bytes, or a hex id
    /// is not 64 hex characters.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
