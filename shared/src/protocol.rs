//! Control-channel wire protocol for Wormhole.
//!
//! Frames are JSON objects with a mandatory `type` discriminator. The codec
//! is strict on decode (unknown types and missing required fields are
//! rejected) and lenient on unknown extra fields, to allow forward-compatible
//! additions on either side of the channel.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Flat header mapping: lowercase header name -> value.
///
/// A `BTreeMap` is used rather than a `HashMap` so that encoded frames (and
/// therefore test fixtures) have a deterministic field order.
pub type HeaderMap = BTreeMap<String, String>;

const KNOWN_TYPES: &[&str] = &["connected", "http_request", "http_response", "ping", "pong"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectedFrame {
    pub tunnel_id: String,
    pub subdomain: String,
    pub public_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequestFrame {
    pub request_id: String,
    pub method: String,
    pub path: String,
    pub query_string: String,
    pub headers: HeaderMap,
    /// Base64-encoded request body. Always present, empty string for no body.
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponseFrame {
    pub request_id: String,
    pub status: u16,
    pub headers: HeaderMap,
    /// Base64-encoded response body. Always present, empty string for no body.
    pub body: String,
}

/// A decoded control-channel frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Connected(ConnectedFrame),
    HttpRequest(HttpRequestFrame),
    HttpResponse(HttpResponseFrame),
    Ping,
    Pong,
}

impl Frame {
    /// Encode this frame to its JSON wire representation.
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("Frame serialization is infallible")
    }

    /// Decode a frame from its JSON wire representation.
    ///
    /// Distinguishes an unrecognized `type` discriminator from any other
    /// decode failure (missing/mistyped field) so callers can tell a
    /// forward-incompatible message apart from a plain protocol violation.
    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        let value: Value = serde_json::from_slice(bytes)?;
        let ty = value.get("type").and_then(Value::as_str).map(str::to_string);

        serde_json::from_value(value).map_err(|err| match ty.as_deref() {
            None => Error::MissingField("type"),
            Some(t) if !KNOWN_TYPES.contains(&t) => Error::UnknownFrameType(t.to_string()),
            _ => Error::Decode(err),
        })
    }
}

/// Base64-encode a body for inclusion in a frame. Byte-exact, no charset
/// assumptions: an empty slice encodes to an empty string, not an omission.
pub fn encode_body(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Base64-decode a frame body back to raw bytes.
pub fn decode_body(encoded: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(encoded)?)
}
