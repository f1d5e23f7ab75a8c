//! The pending-request table: request id -> one-shot reply slot.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as DashEntry;
use tokio::sync::oneshot;
use wormhole_shared::protocol::HttpResponseFrame;

use crate::error::TunnelError;
use crate::tunnel::TunnelId;

pub type RequestId = String;
pub type Reply = Result<HttpResponseFrame, TunnelError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("a pending entry already exists for this request id")]
pub struct DuplicateRequestId;

struct Slot {
    tunnel_id: TunnelId,
    reply_tx: oneshot::Sender<Reply>,
}

/// Correlates an outstanding public request with the agent reply it is
/// waiting on. One writer (`register`) and at most one fulfiller per entry;
/// `register` and `fulfill` are linearizable with respect to each other via
/// the backing concurrent map.
pub struct PendingTable {
    slots: DashMap<RequestId, Slot>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Register a fresh pending entry, returning the receiving half of its
    /// reply slot. The deadline itself is enforced by the caller (typically
    /// via `tokio::time::timeout` around `rx.await`), not by this table.
    pub fn register(
        &self,
        request_id: RequestId,
        tunnel_id: TunnelId,
    ) -> Result<oneshot::Receiver<Reply>, DuplicateRequestId> {
        let (tx, rx) = oneshot::channel();
        match self.slots.entry(request_id) {
            DashEntry::Occupied(_) => Err(DuplicateRequestId),
            DashEntry::Vacant(entry) => {
                entry.insert(Slot { tunnel_id, reply_tx: tx });
                Ok(rx)
            }
        }
    }

    /// Fulfill the slot for `request_id` if it is still present. Returns
    /// `false` when there is no such id, it already completed, or it was
    /// cancelled — such replies are dropped, not errors.
    pub fn fulfill(&self, request_id: &str, response: HttpResponseFrame) -> bool {
        match self.slots.remove(request_id) {
            Some((_, slot)) => {
                let _ = slot.reply_tx.send(Ok(response));
                true
            }
            None => false,
        }
    }

    /// Complete every entry bound to `tunnel_id` with `error`, used at
    /// tunnel teardown. Idempotent: entries already removed are skipped.
    pub fn fail_all_for(&self, tunnel_id: &str, error: TunnelError) {
        let matching: Vec<RequestId> = self
            .slots
            .iter()
            .filter(|entry| entry.value().tunnel_id == tunnel_id)
            .map(|entry| entry.key().clone())
            .collect();
        for request_id in matching {
            if let Some((_, slot)) = self.slots.remove(&request_id) {
                let _ = slot.reply_tx.send(Err(error.clone()));
            }
        }
    }

    /// Caller-initiated cancellation: remove the entry without sending a
    /// reply. A reply that was already in flight and arrives afterward finds
    /// no entry and is dropped by `fulfill`.
    pub fn cancel(&self, request_id: &str) {
        self.slots.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(id: &str) -> HttpResponseFrame {
        HttpResponseFrame {
            request_id: id.to_string(),
            status: 200,
            headers: Default::default(),
            body: String::new(),
        }
    }

    #[tokio::test]
    async fn fulfill_delivers_the_reply_and_removes_the_entry() {
        let table = PendingTable::new();
        let rx = table.register("r1".into(), "t1".into()).unwrap();
        assert!(table.fulfill("r1", response("r1")));
        assert_eq!(table.len(), 0);
        let reply = rx.await.unwrap().unwrap();
        assert_eq!(reply.request_id, "r1");
    }

    #[tokio::test]
    async fn a_second_fulfill_for_the_same_id_is_dropped() {
        let table = PendingTable::new();
        let rx = table.register("r1".into(), "t1".into()).unwrap();
        assert!(table.fulfill("r1", response("r1")));
        assert!(!table.fulfill("r1", response("r1")), "slot already completed once");
        let _ = rx.await;
    }

    #[tokio::test]
    async fn fulfill_with_an_unknown_id_is_a_no_op() {
        let table = PendingTable::new();
        assert!(!table.fulfill("ghost", response("ghost")));
    }

    #[tokio::test]
    async fn register_rejects_a_duplicate_id() {
        let table = PendingTable::new();
        let _rx = table.register("r1".into(), "t1".into()).unwrap();
        assert_eq!(table.register("r1".into(), "t1".into()), Err(DuplicateRequestId));
    }

    #[tokio::test]
    async fn fail_all_for_only_touches_the_matching_tunnel() {
        let table = PendingTable::new();
        let rx_a = table.register("a".into(), "tunnel-1".into()).unwrap();
        let rx_b = table.register("b".into(), "tunnel-2".into()).unwrap();
        table.fail_all_for("tunnel-1", TunnelError::TunnelGone);
        assert_eq!(table.len(), 1);
        assert!(matches!(rx_a.await.unwrap(), Err(TunnelError::TunnelGone)));
        // tunnel-2's entry is untouched.
        assert!(table.fulfill("b", response("b")));
        assert!(matches!(rx_b.await.unwrap(), Ok(r) if r.request_id == "b"));
    }

    #[tokio::test]
    async fn cancel_removes_the_entry_and_a_late_reply_is_dropped() {
        let table = PendingTable::new();
        let rx = table.register("r1".into(), "t1".into()).unwrap();
        table.cancel("r1");
        assert_eq!(table.len(), 0);
        assert!(!table.fulfill("r1", response("r1")), "late reply after cancel must be dropped");
        assert!(rx.await.is_err(), "cancellation drops the sender without a reply");
    }
}
