//! Application-level error taxonomy for the relay.
//!
//! Every variant here is a possible *outcome* of proxying a single public
//! request, never a transport-level decode failure (see
//! `wormhole_shared::Error` for those). The proxy handler renders each
//! variant to exactly one HTTP status and phrase, so the mapping lives in
//! one place.

use axum::http::StatusCode;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TunnelError {
    #[error("no tunnel bound to this host")]
    TunnelNotFound,

    #[error("tunnel closed while request was in flight")]
    TunnelGone,

    #[error("failed to dispatch request to agent")]
    DispatchFailed,

    #[error("no reply from agent within the request timeout")]
    Timeout,

    #[error("request body exceeds the configured size cap")]
    PayloadTooLarge,

    #[error("agent sent a malformed or out-of-protocol frame")]
    ProtocolError,

    #[error("public client disconnected before a reply arrived")]
    Cancelled,
}

impl TunnelError {
    /// The HTTP status code and human-readable phrase this error renders as.
    ///
    /// `Cancelled` has no rendering: by contract, no response is sent for a
    /// cancelled request because the public connection is already gone.
    pub fn status_and_phrase(&self) -> Option<(StatusCode, &'static str)> {
        match self {
            TunnelError::TunnelNotFound => Some((StatusCode::NOT_FOUND, "Tunnel Not Active")),
            TunnelError::TunnelGone | TunnelError::DispatchFailed | TunnelError::ProtocolError => {
                Some((StatusCode::BAD_GATEWAY, "Bad Gateway"))
            }
            TunnelError::Timeout => Some((StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout")),
            TunnelError::PayloadTooLarge => Some((StatusCode::PAYLOAD_TOO_LARGE, "Payload Too Large")),
            TunnelError::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_renders_no_response() {
        assert_eq!(TunnelError::Cancelled.status_and_phrase(), None);
    }

    #[test]
    fn every_other_kind_renders_a_response() {
        for err in [
            TunnelError::TunnelNotFound,
            TunnelError::TunnelGone,
            TunnelError::DispatchFailed,
            TunnelError::Timeout,
            TunnelError::PayloadTooLarge,
            TunnelError::ProtocolError,
        ] {
            assert!(err.status_and_phrase().is_some());
        }
    }
}
