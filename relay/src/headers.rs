//! Header flattening (public request -> frame) and hop-by-hop stripping
//! (agent reply -> public response).

use axum::http::{HeaderMap as AxumHeaderMap, HeaderName, HeaderValue};
use wormhole_shared::protocol::HeaderMap;

/// Flatten an axum request's headers into the wire's single-valued mapping.
/// Header names are lowercased; a name repeated across multiple header
/// lines is joined with `, ` per HTTP semantics. Requests never carry
/// multiple `Set-Cookie` lines, so no special case is needed here — that
/// only matters on the response side, where the wire format is already
/// single-valued per name.
pub fn flatten_request_headers(headers: &AxumHeaderMap) -> HeaderMap {
    let mut flat = HeaderMap::new();
    for name in headers.keys() {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        flat.insert(name.as_str().to_lowercase(), joined);
    }
    flat
}

/// Build the outbound response header set from an agent's reply, dropping
/// hop-by-hop names. Headers that fail to round-trip through `http`'s name
/// or value validation are silently skipped rather than failing the whole
/// response.
pub fn response_headers(flat: &HeaderMap) -> AxumHeaderMap {
    let mut out = AxumHeaderMap::new();
    for (name, value) in flat {
        if is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out.insert(name, value);
        }
    }
    out
}

fn is_hop_by_hop(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    matches!(
        name.as_str(),
        "connection" | "keep-alive" | "transfer-encoding" | "upgrade"
    ) || name.starts_with("proxy-")
}
