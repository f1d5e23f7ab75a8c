//! The `Tunnel`: one live agent connection owning one subdomain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Mutex};
use wormhole_shared::protocol::Frame;

pub type TunnelId = String;

/// Bound on the per-tunnel outbound queue. A stalled agent backs up this
/// queue instead of letting server memory grow without limit.
const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct Inner {
    tunnel_id: TunnelId,
    subdomain: String,
    created_at: Instant,
    created_at_utc: DateTime<Utc>,
    request_count: AtomicU64,
    tx: mpsc::Sender<Vec<u8>>,
    /// Serializes writers so concurrent proxy handlers never interleave
    /// frames on the channel; dispatch order is acquisition order.
    send_lock: Mutex<()>,
}

/// A live association between a subdomain and an agent control channel.
///
/// Cheaply `Clone`: all clones share the same underlying connection, counter,
/// and send lock. A handler that cloned a `Tunnel` keeps a valid reference for
/// the duration of its request even if the tunnel is concurrently torn down
/// elsewhere — it observes that teardown through the pending-request table,
/// not through this handle going stale.
#[derive(Clone)]
pub struct Tunnel(Arc<Inner>);

/// Error returned when the outbound channel to the agent has closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("agent channel closed")]
pub struct SendError;

impl Tunnel {
    /// Create a new tunnel and its paired outbound receiver. The receiver is
    /// driven exclusively by the control-channel task for this connection.
    pub fn new(tunnel_id: TunnelId, subdomain: String) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let tunnel = Tunnel(Arc::new(Inner {
            tunnel_id,
            subdomain,
            created_at: Instant::now(),
            created_at_utc: Utc::now(),
            request_count: AtomicU64::new(0),
            tx,
            send_lock: Mutex::new(()),
        }));
        (tunnel, rx)
    }

    pub fn tunnel_id(&self) -> &str {
        &self.0.tunnel_id
    }

    pub fn subdomain(&self) -> &str {
        &self.0.subdomain
    }

    pub fn created_at(&self) -> Instant {
        self.0.created_at
    }

    pub fn created_at_utc(&self) -> DateTime<Utc> {
        self.0.created_at_utc
    }

    pub fn request_count(&self) -> u64 {
        self.0.request_count.load(Ordering::SeqCst)
    }

    /// Record that an outbound frame was handed to the channel. Per the
    /// `request_count` invariant, callers must only invoke this *after* a
    /// successful `send`.
    pub fn record_dispatch(&self) {
        self.0.request_count.fetch_add(1, Ordering::SeqCst);
    }

    /// Send a frame to the agent, serialized against other concurrent
    /// senders by `send_lock`.
    pub async fn send(&self, frame: &Frame) -> Result<(), SendError> {
        let _guard = self.0.send_lock.lock().await;
        self.0.tx.send(frame.encode()).await.map_err(|_| SendError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wormhole_shared::protocol::{Frame, HttpRequestFrame};

    fn request_frame(id: &str) -> Frame {
        Frame::HttpRequest(HttpRequestFrame {
            request_id: id.to_string(),
            method: "GET".into(),
            path: "/".into(),
            query_string: String::new(),
            headers: Default::default(),
            body: String::new(),
        })
    }

    #[tokio::test]
    async fn dispatch_counter_only_advances_explicitly() {
        let (tunnel, mut rx) = Tunnel::new("t1".into(), "swift-otter".into());
        assert_eq!(tunnel.request_count(), 0);
        tunnel.send(&request_frame("r1")).await.unwrap();
        assert_eq!(tunnel.request_count(), 0, "send alone must not advance the counter");
        tunnel.record_dispatch();
        assert_eq!(tunnel.request_count(), 1);
        let received = rx.recv().await.unwrap();
        assert_eq!(received, request_frame("r1").encode());
    }

    #[tokio::test]
    async fn clones_share_the_same_counter_and_channel() {
        let (tunnel, mut rx) = Tunnel::new("t1".into(), "swift-otter".into());
        let clone = tunnel.clone();
        clone.record_dispatch();
        assert_eq!(tunnel.request_count(), 1);
        clone.send(&request_frame("r1")).await.unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn send_fails_once_the_receiver_is_dropped() {
        let (tunnel, rx) = Tunnel::new("t1".into(), "swift-otter".into());
        drop(rx);
        assert_eq!(tunnel.send(&request_frame("r1")).await, Err(SendError));
    }

    #[tokio::test]
    async fn concurrent_sends_are_not_interleaved_or_dropped() {
        let (tunnel, mut rx) = Tunnel::new("t1".into(), "swift-otter".into());
        let n = 50usize;
        let mut handles = Vec::new();
        for i in 0..n {
            let tunnel = tunnel.clone();
            handles.push(tokio::spawn(async move {
                tunnel.send(&request_frame(&format!("r{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        let mut seen = std::collections::HashSet::new();
        for _ in 0..n {
            let bytes = rx.recv().await.unwrap();
            let frame = Frame::decode(&bytes).unwrap();
            match frame {
                Frame::HttpRequest(f) => assert!(seen.insert(f.request_id)),
                _ => panic!("unexpected frame"),
            }
        }
        assert_eq!(seen.len(), n);
    }
}
