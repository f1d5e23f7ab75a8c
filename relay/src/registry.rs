//! The tunnel registry: subdomain -> live tunnel.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::ids::random_token;
use crate::tunnel::{Tunnel, TunnelId};

/// Collision retry bound for subdomain generation.
const MAX_CREATE_ATTEMPTS: usize = 8;

/// Entropy width (bytes) of a generated subdomain token. 8 bytes = 64 bits,
/// rendered as 16 lowercase hex characters.
const SUBDOMAIN_TOKEN_BYTES: usize = 8;
const TUNNEL_ID_TOKEN_BYTES: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("exhausted subdomain retry budget without finding a free slot")]
pub struct Exhausted;

/// A point-in-time view of one tunnel, for the status surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSnapshot {
    pub subdomain: String,
    pub tunnel_id: TunnelId,
    pub created_at: DateTime<Utc>,
    pub request_count: u64,
}

/// Mapping from subdomain to live tunnel, and from tunnel id to live tunnel.
///
/// Readers (`lookup`) obtain a cloned `Tunnel` handle; that handle stays
/// valid for the lifetime of a single request even if `remove` concurrently
/// drops the tunnel from both maps — the request then observes teardown
/// through the pending-request table, not through a stale registry entry.
pub struct TunnelRegistry {
    by_subdomain: DashMap<String, TunnelId>,
    by_tunnel_id: DashMap<TunnelId, Tunnel>,
}

impl TunnelRegistry {
    pub fn new() -> Self {
        Self {
            by_subdomain: DashMap::new(),
            by_tunnel_id: DashMap::new(),
        }
    }

    /// Allocate a fresh subdomain and register a new tunnel under it.
    pub fn create(&self) -> Result<(Tunnel, mpsc::Receiver<Vec<u8>>), Exhausted> {
        for _ in 0..MAX_CREATE_ATTEMPTS {
            let subdomain = random_token(SUBDOMAIN_TOKEN_BYTES);
            let entry = match self.by_subdomain.entry(subdomain.clone()) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(entry) => entry,
            };

            let tunnel_id = random_token(TUNNEL_ID_TOKEN_BYTES);
            let (tunnel, rx) = Tunnel::new(tunnel_id.clone(), subdomain);
            entry.insert(tunnel_id.clone());
            self.by_tunnel_id.insert(tunnel_id, tunnel.clone());
            return Ok((tunnel, rx));
        }
        Err(Exhausted)
    }

    /// O(1) read by subdomain.
    pub fn lookup(&self, subdomain: &str) -> Option<Tunnel> {
        let tunnel_id = self.by_subdomain.get(subdomain)?.clone();
        self.by_tunnel_id.get(&tunnel_id).map(|t| t.clone())
    }

    /// Idempotent removal by tunnel id. Only clears the subdomain mapping if
    /// it still points at this exact tunnel, so a racing `create` that
    /// reused a just-freed subdomain (vanishingly unlikely, but not
    /// impossible) is never clobbered.
    pub fn remove(&self, tunnel_id: &str) {
        let Some((_, tunnel)) = self.by_tunnel_id.remove(tunnel_id) else {
            return;
        };
        self.by_subdomain
            .remove_if(tunnel.subdomain(), |_, v| v == tunnel_id);
    }

    pub fn snapshot(&self) -> Vec<TunnelSnapshot> {
        self.by_tunnel_id
            .iter()
            .map(|entry| {
                let tunnel = entry.value();
                TunnelSnapshot {
                    subdomain: tunnel.subdomain().to_string(),
                    tunnel_id: tunnel.tunnel_id().to_string(),
                    created_at: tunnel.created_at_utc(),
                    request_count: tunnel.request_count(),
                }
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_tunnel_id.len()
    }
}

impl Default for TunnelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_assigns_a_lowercase_hex_subdomain() {
        let registry = TunnelRegistry::new();
        let (tunnel, _rx) = registry.create().unwrap();
        assert_eq!(tunnel.subdomain().len(), SUBDOMAIN_TOKEN_BYTES * 2);
        assert!(tunnel.subdomain().chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn subdomains_are_pairwise_distinct() {
        let registry = TunnelRegistry::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let (tunnel, _rx) = registry.create().unwrap();
            assert!(seen.insert(tunnel.subdomain().to_string()));
        }
    }

    #[test]
    fn lookup_finds_a_created_tunnel_and_misses_otherwise() {
        let registry = TunnelRegistry::new();
        let (tunnel, _rx) = registry.create().unwrap();
        let found = registry.lookup(tunnel.subdomain()).unwrap();
        assert_eq!(found.tunnel_id(), tunnel.tunnel_id());
        assert!(registry.lookup("definitely-not-registered").is_none());
    }

    #[test]
    fn remove_is_idempotent_and_clears_both_maps() {
        let registry = TunnelRegistry::new();
        let (tunnel, _rx) = registry.create().unwrap();
        let subdomain = tunnel.subdomain().to_string();
        registry.remove(tunnel.tunnel_id());
        registry.remove(tunnel.tunnel_id()); // second call is a no-op, not a panic
        assert!(registry.lookup(&subdomain).is_none());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn a_reader_handle_outlives_concurrent_removal() {
        let registry = TunnelRegistry::new();
        let (tunnel, _rx) = registry.create().unwrap();
        let handle = registry.lookup(tunnel.subdomain()).unwrap();
        registry.remove(tunnel.tunnel_id());
        // The cloned handle is still a perfectly valid Tunnel value; only the
        // registry forgot about it.
        assert_eq!(handle.tunnel_id(), tunnel.tunnel_id());
        assert!(registry.lookup(tunnel.subdomain()).is_none());
    }

    #[test]
    fn snapshot_reflects_live_tunnels() {
        let registry = TunnelRegistry::new();
        let (a, _rx_a) = registry.create().unwrap();
        let (b, _rx_b) = registry.create().unwrap();
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 2);
        let ids: std::collections::HashSet<_> = snap.iter().map(|s| s.tunnel_id.clone()).collect();
        assert!(ids.contains(a.tunnel_id()));
        assert!(ids.contains(b.tunnel_id()));
    }
}
