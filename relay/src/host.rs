//! Host header -> subdomain extraction.
//!
//! The admin surface lives at the bare base domain; every other host is
//! assumed to target a tunnel.

use std::net::IpAddr;

/// Extract the subdomain label from a `Host` header value, given the
/// configured base domain.
///
/// Returns `None` when the host equals the base domain exactly, does not end
/// with `.<base_domain>`, the label is empty or itself contains a dot
/// (multi-level subdomains are not addressable tunnels), or the host is an
/// IP literal. Matching is case-insensitive and a trailing `:port` is
/// stripped first.
pub fn extract_subdomain(host: &str, base_domain: &str) -> Option<String> {
    let stripped = strip_port(host.trim());
    if is_ip_literal(stripped) {
        return None;
    }

    let host_lower = stripped.to_lowercase();
    let base_lower = base_domain.to_lowercase();
    if host_lower == base_lower {
        return None;
    }

    let suffix = format!(".{base_lower}");
    let label = host_lower.strip_suffix(&suffix)?;
    if label.is_empty() || label.contains('.') {
        return None;
    }
    Some(label.to_string())
}

/// Strip a trailing `:port`, respecting bracketed IPv6 literals.
fn strip_port(host: &str) -> &str {
    if let Some(stripped) = host.strip_prefix('[') {
        return match stripped.find(']') {
            Some(idx) => &host[..idx + 2],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((h, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => h,
        _ => host,
    }
}

fn is_ip_literal(host: &str) -> bool {
    let trimmed = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')).unwrap_or(host);
    trimmed.parse::<IpAddr>().is_ok()
}
