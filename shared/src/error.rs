//! Wire-level error types for Wormhole.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while encoding or decoding a control-channel frame.
///
/// Anything in this enum represents a malformed message on the wire, never
/// an application-level outcome (those live in the relay's own error type).
#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed frame: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unrecognized frame type: {0}")]
    UnknownFrameType(String),

    #[error("frame missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid base64 body: {0}")]
    InvalidBody(#[from] base64::DecodeError),
}
