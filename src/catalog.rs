//! The authoritative list of known peers and their advertised services.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::RwLock;
use tracing::info;

use crate::packet::{ClientDescriptor, InfoPayload, ServiceDescriptor};
use crate::registry::Registry;

/// A known peer (or, when `local == true`, this broker's own node).
#[derive(Debug, Clone)]
pub struct Node {
    pub id: String,
    pub available: bool,
    pub local: bool,
    pub services: Vec<ServiceDescriptor>,
    pub cpu: f64,
    pub ip_list: Vec<String>,
    pub hostname: Option<String>,
    pub client: ClientDescriptor,
    pub config: Value,
    pub instance_id: Option<String>,
    pub metadata: Value,
    pub seq: u64,
    pub ver: String,
    pub last_heartbeat_at: Option<Instant>,
}

impl Node {
    fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            available: true,
            local: false,
            services: Vec::new(),
            cpu: 0.0,
            ip_list: Vec::new(),
            hostname: None,
            client: ClientDescriptor::default(),
            config: Value::Object(Default::default()),
            instance_id: None,
            metadata: Value::Object(Default::default()),
            seq: 0,
            ver: crate::packet::PROTOCOL_VERSION.to_string(),
            last_heartbeat_at: None,
        }
    }

    fn apply_info(&mut self, payload: &InfoPayload) {
        self.available = payload.available;
        self.services = payload.services.clone();
        self.cpu = payload.cpu;
        self.ip_list = payload.ip_list.clone();
        self.hostname = payload.hostname.clone();
        self.client = payload.client.clone();
        self.config = payload.config.clone();
        self.instance_id = payload.instance_id.clone();
        self.metadata = payload.metadata.clone();
        self.seq = payload.seq;
        self.ver = payload.ver.clone();
    }
}

/// Tracks remote peers, their advertised services, liveness and INFO
/// sequence numbers. At most one [`Node`] per id; exactly one with
/// `local == true`.
pub struct NodeCatalog {
    node_id: String,
    nodes: RwLock<HashMap<String, Node>>,
    registry: Arc<Registry>,
}

impl NodeCatalog {
    pub fn new(node_id: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            node_id: node_id.into(),
            nodes: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Idempotent creation of the self-node, populated from the local
    /// registry's services. Called again after every `register()` so the
    /// next INFO broadcast advertises the new service.
    pub async fn ensure_local_node(&self) {
        let mut nodes = self.nodes.write().await;
        let node = nodes.entry(self.node_id.clone()).or_insert_with(|| Node::new(self.node_id.clone()));
        node.local = true;
        node.available = true;
        node.client = ClientDescriptor {
            client_type: "rust".into(),
            lang_version: rustc_version_hint().into(),
            version: env!("CARGO_PKG_VERSION").into(),
        };
        drop(nodes);

        let services = self.registry.local_service_descriptors().await;
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(&self.node_id) {
            node.services = services;
        }
    }

    pub async fn local_node(&self) -> Node {
        self.nodes
            .read()
            .await
            .get(&self.node_id)
            .cloned()
            .expect("ensure_local_node must be called before local_node")
    }

    pub async fn bump_local_seq(&self) -> u64 {
        let mut nodes = self.nodes.write().await;
        let node = nodes.get_mut(&self.node_id).expect("local node missing");
        node.seq += 1;
        node.seq
    }

    pub async fn get_node(&self, id: &str) -> Option<Node> {
        self.nodes.read().await.get(id).cloned()
    }

    pub async fn add_node(&self, node: Node) {
        info!(node_id = %node.id, "node added");
        self.nodes.write().await.insert(node.id.clone(), node);
    }

    /// Merges an INFO payload for `node_id`. Ignored if `seq` is not newer
    /// than the stored value (late-arriving stale INFO never overwrites a
    /// newer one).
    pub async fn process_info(&self, node_id: &str, payload: &InfoPayload) {
        let mut nodes = self.nodes.write().await;
        let is_new = !nodes.contains_key(node_id);
        let node = nodes.entry(node_id.to_string()).or_insert_with(|| Node::new(node_id));

        if !is_new && payload.seq <= node.seq {
            return;
        }

        node.apply_info(payload);
        node.last_heartbeat_at = Some(Instant::now());
        let snapshot = node.clone();
        drop(nodes);

        for service in &snapshot.services {
            self.registry.add_remote(node_id, service).await;
        }
        self.registry.set_node_availability(node_id, true).await;
        info!(node_id, seq = snapshot.seq, "node info processed");
    }

    /// Updates the sender's `cpu` and liveness timestamp. Unknown senders
    /// are a no-op at the catalog layer; the transit layer is responsible
    /// for re-syncing via DISCOVER.
    pub async fn process_heartbeat(&self, node_id: &str, cpu: f64) -> bool {
        let mut nodes = self.nodes.write().await;
        match nodes.get_mut(node_id) {
            Some(node) => {
                node.cpu = cpu;
                node.last_heartbeat_at = Some(Instant::now());
                true
            }
            None => false,
        }
    }

    /// Marks `id` unavailable and propagates that to the registry so
    /// selection can skip it immediately; does not remove its endpoints
    /// (that happens separately via `remove_node`/transit's DISCONNECT path).
    pub async fn disconnect_node(&self, id: &str) {
        let mut nodes = self.nodes.write().await;
        if let Some(node) = nodes.get_mut(id) {
            node.available = false;
            info!(node_id = id, "node disconnected");
        }
        drop(nodes);
        self.registry.set_node_availability(id, false).await;
    }

    /// Marks nodes unavailable whose last heartbeat is older than
    /// `3 * heartbeat_interval`.
    pub async fn expire(&self, heartbeat_interval: Duration) -> Vec<String> {
        let threshold = heartbeat_interval * 3;
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut nodes = self.nodes.write().await;
        for node in nodes.values_mut() {
            if node.local || !node.available {
                continue;
            }
            if let Some(last) = node.last_heartbeat_at {
                if now.duration_since(last) > threshold {
                    node.available = false;
                    expired.push(node.id.clone());
                }
            }
        }
        drop(nodes);
        for id in &expired {
            self.registry.set_node_availability(id, false).await;
            info!(node_id = id, "node expired");
        }
        expired
    }

    pub async fn all_nodes(&self) -> Vec<Node> {
        self.nodes.read().await.values().cloned().collect()
    }
}

fn rustc_version_hint() -> &'static str {
    env!("CARGO_PKG_RUST_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PROTOCOL_VERSION;

    fn info_payload(sender: &str, seq: u64) -> InfoPayload {
        InfoPayload {
            id: None,
            services: Vec::new(),
            ip_list: Vec::new(),
            hostname: None,
            client: ClientDescriptor::default(),
            config: Value::Object(Default::default()),
            port: None,
            seq,
            metadata: Value::Object(Default::default()),
            instance_id: None,
            available: true,
            cpu: 0.0,
            sender: sender.into(),
            ver: PROTOCOL_VERSION.into(),
        }
    }

    #[tokio::test]
    async fn stale_info_is_ignored() {
        let registry = Arc::new(Registry::new("local"));
        let catalog = NodeCatalog::new("local", registry);
        catalog.process_info("peer-a", &info_payload("peer-a", 5)).await;
        catalog.process_info("peer-a", &info_payload("peer-a", 2)).await;
        let node = catalog.get_node("peer-a").await.unwrap();
        assert_eq!(node.seq, 5);
    }

    #[tokio::test]
    async fn newer_info_overwrites() {
        let registry = Arc::new(Registry::new("local"));
        let catalog = NodeCatalog::new("local", registry);
        catalog.process_info("peer-a", &info_payload("peer-a", 1)).await;
        catalog.process_info("peer-a", &info_payload("peer-a", 2)).await;
        let node = catalog.get_node("peer-a").await.unwrap();
        assert_eq!(node.seq, 2);
    }

    #[tokio::test]
    async fn disconnect_marks_unavailable() {
        let registry = Arc::new(Registry::new("local"));
        let catalog = NodeCatalog::new("local", registry);
        catalog.process_info("peer-a", &info_payload("peer-a", 1)).await;
        catalog.disconnect_node("peer-a").await;
        let node = catalog.get_node("peer-a").await.unwrap();
        assert!(!node.available);
    }
}
