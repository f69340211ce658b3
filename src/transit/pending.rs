//! The pending-request table: `request id -> awaitable`, owned by [`super::Transit`].
//!
//! Grounded on the teacher's JSON-RPC transport (`Arc<Mutex<HashMap<Id,
//! oneshot::Sender<...>>>>`), swapping the integer JSON-RPC id for the
//! UUID-strings Moleculer uses as request ids.

use std::collections::HashMap;

use tokio::sync::{oneshot, Mutex};

use crate::error::BrokerError;
use crate::packet::ResponsePayload;

pub type PendingResult = Result<ResponsePayload, BrokerError>;

#[derive(Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<String, PendingEntry>>,
}

struct PendingEntry {
    sender: oneshot::Sender<PendingResult>,
    node_id: String,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new pending request and returns the receiver half.
    pub async fn insert(&self, request_id: String, node_id: String) -> oneshot::Receiver<PendingResult> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().await.insert(
            request_id,
            PendingEntry {
                sender: tx,
                node_id,
            },
        );
        rx
    }

    /// Resolves the entry for `request_id`, if any, removing it (RESPONSE handler).
    pub async fn resolve(&self, request_id: &str, result: PendingResult) -> bool {
        let entry = self.inner.lock().await.remove(request_id);
        match entry {
            Some(entry) => entry.sender.send(result).is_ok(),
            None => false,
        }
    }

    /// Removes and returns `request_id` without resolving it (timeout path:
    /// the caller constructs its own error after the fact).
    pub async fn remove(&self, request_id: &str) {
        self.inner.lock().await.remove(request_id);
    }

    /// Cancels every entry whose target node is `node_id` with a
    /// `NodeDisconnected` error (peer DISCONNECT).
    pub async fn cancel_for_node(&self, node_id: &str) {
        let mut table = self.inner.lock().await;
        let ids: Vec<String> = table
            .iter()
            .filter(|(_, e)| e.node_id == node_id)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            if let Some(entry) = table.remove(&id) {
                let _ = entry.sender.send(Err(BrokerError::NodeDisconnected(node_id.to_string())));
            }
        }
    }

    /// Cancels every pending entry with a shutdown error (`disconnect()`).
    pub async fn cancel_all(&self) {
        let mut table = self.inner.lock().await;
        for (_, entry) in table.drain() {
            let _ = entry.sender.send(Err(BrokerError::Shutdown));
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn contains(&self, request_id: &str) -> bool {
        self.inner.lock().await.contains_key(request_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolve_removes_entry() {
        let table = PendingTable::new();
        let rx = table.insert("req-1".into(), "node-a".into()).await;
        assert!(table.contains("req-1").await);
        let resolved = table
            .resolve(
                "req-1",
                Ok(ResponsePayload {
                    id: "req-1".into(),
                    success: true,
                    data: None,
                    error: None,
                    meta: serde_json::json!({}),
                    sender: "node-a".into(),
                    ver: "4".into(),
                }),
            )
            .await;
        assert!(resolved);
        assert!(!table.contains("req-1").await);
        assert!(rx.await.unwrap().unwrap().success);
    }

    #[tokio::test]
    async fn cancel_for_node_only_cancels_matching() {
        let table = PendingTable::new();
        let rx_a = table.insert("req-a".into(), "node-a".into()).await;
        let rx_b = table.insert("req-b".into(), "node-b".into()).await;
        table.cancel_for_node("node-a").await;
        assert!(rx_a.await.unwrap().is_err());
        assert!(table.contains("req-b").await);
        drop(rx_b);
    }

    #[tokio::test]
    async fn cancel_all_rejects_every_entry() {
        let table = PendingTable::new();
        let rx = table.insert("req-1".into(), "node-a".into()).await;
        table.cancel_all().await;
        assert_eq!(table.len().await, 0);
        assert!(matches!(rx.await.unwrap(), Err(BrokerError::Shutdown)));
    }
}
