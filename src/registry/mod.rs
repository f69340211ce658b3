//! Indexes local and remote action/event endpoints and selects one (or all)
//! of them on each invocation.

pub mod endpoint;
pub mod pattern;

pub use endpoint::{ActionEndpoint, EventEndpoint};

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::packet::ServiceDescriptor;
use crate::service::ServiceSchema;

#[derive(Default)]
struct RoundRobin(AtomicUsize);

impl RoundRobin {
    fn next(&self, len: usize) -> usize {
        if len == 0 {
            return 0;
        }
        self.0.fetch_add(1, Ordering::Relaxed) % len
    }
}

/// Indexes action endpoints by fully-qualified name and event endpoints by
/// wildcard pattern. Local endpoints are always preferred for actions;
/// remote endpoints are selected round-robin.
pub struct Registry {
    node_id: String,
    actions: RwLock<HashMap<String, Vec<ActionEndpoint>>>,
    action_rr: RwLock<HashMap<String, Arc<RoundRobin>>>,
    events: RwLock<HashMap<String, Vec<EventEndpoint>>>,
    event_rr: RwLock<HashMap<String, Arc<RoundRobin>>>,
    /// node_id -> available. Populated by the node catalog; lets selection
    /// skip endpoints of a node that went unavailable without having had
    /// its endpoints pruned yet (see `remove_node` for the eager path).
    node_availability: RwLock<HashMap<String, bool>>,
    local_services: RwLock<HashMap<String, ServiceSchema>>,
}

impl Registry {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            actions: RwLock::new(HashMap::new()),
            action_rr: RwLock::new(HashMap::new()),
            events: RwLock::new(HashMap::new()),
            event_rr: RwLock::new(HashMap::new()),
            node_availability: RwLock::new(HashMap::new()),
            local_services: RwLock::new(HashMap::new()),
        }
    }

    /// Ingests a local service declaration. Re-registering the same name
    /// replaces its prior endpoints, making `register` idempotent.
    pub async fn register(&self, schema: ServiceSchema) {
        let service_name = schema.name.clone();
        self.remove_local_service(&service_name).await;

        let mut actions = self.actions.write().await;
        for action in &schema.actions {
            let fq = format!("{}.{}", service_name, action.name);
            let endpoint = ActionEndpoint::local(
                fq.clone(),
                self.node_id.clone(),
                action.handler.clone(),
                action.params_schema.clone(),
            );
            actions.entry(fq).or_default().push(endpoint);
        }
        drop(actions);

        let mut events = self.events.write().await;
        for event in &schema.events {
            let fq = format!("{}.{}", service_name, event.name);
            // `EventDef::new` defaults `pattern` to the bare event name so
            // that listening for your own service's event "just works"
            // without calling `with_pattern`; qualify it here unless the
            // caller explicitly overrode it to something else (e.g. a
            // cross-service wildcard like "user.*").
            let pattern = if event.pattern == event.name { fq.clone() } else { event.pattern.clone() };
            let group = event.group.clone().unwrap_or_else(|| service_name.clone());
            let endpoint = EventEndpoint::local(fq, pattern.clone(), group, self.node_id.clone(), event.handler.clone());
            events.entry(pattern).or_default().push(endpoint);
        }
        drop(events);

        self.local_services.write().await.insert(service_name, schema);
    }

    async fn remove_local_service(&self, service_name: &str) {
        let prefix = format!("{service_name}.");
        let mut actions = self.actions.write().await;
        for (_, endpoints) in actions.iter_mut() {
            endpoints.retain(|e| !(e.is_local && e.name.starts_with(&prefix)));
        }
        actions.retain(|_, v| !v.is_empty());
        drop(actions);

        let mut events = self.events.write().await;
        for (_, endpoints) in events.iter_mut() {
            endpoints.retain(|e| !(e.is_local && e.name.starts_with(&prefix)));
        }
        events.retain(|_, v| !v.is_empty());
    }

    /// Returns the services currently registered locally, in the INFO
    /// descriptor shape the node catalog advertises.
    pub async fn local_service_descriptors(&self) -> Vec<ServiceDescriptor> {
        let services = self.local_services.read().await;
        services
            .values()
            .map(|schema| ServiceDescriptor {
                name: schema.name.clone(),
                full_name: schema.name.clone(),
                settings: schema.settings.clone(),
                metadata: schema.metadata.clone(),
                actions: schema
                    .actions
                    .iter()
                    .map(|a| {
                        let fq = format!("{}.{}", schema.name, a.name);
                        (
                            fq.clone(),
                            crate::packet::ActionDescriptor {
                                raw_name: a.name.clone(),
                                name: fq,
                                params: a.params_schema.clone().unwrap_or(serde_json::Value::Null),
                            },
                        )
                    })
                    .collect(),
                events: schema
                    .events
                    .iter()
                    .map(|e| {
                        let fq = format!("{}.{}", schema.name, e.name);
                        (
                            fq.clone(),
                            crate::packet::EventDescriptor {
                                raw_name: e.name.clone(),
                                name: fq,
                                group: e.group.clone(),
                            },
                        )
                    })
                    .collect(),
            })
            .collect()
    }

    /// Appends one remote endpoint per action/event in `descriptor`.
    /// Idempotent per `(name, node_id)`: re-adding replaces the prior entry.
    pub async fn add_remote(&self, node_id: &str, descriptor: &ServiceDescriptor) {
        let mut actions = self.actions.write().await;
        for fq in descriptor.actions.keys() {
            let list = actions.entry(fq.clone()).or_default();
            list.retain(|e| !(e.node_id == node_id && !e.is_local));
            list.push(ActionEndpoint::remote(fq.clone(), node_id));
        }
        drop(actions);

        let mut events = self.events.write().await;
        for (fq, descr) in descriptor.events.iter() {
            let group = descr.group.clone().unwrap_or_else(|| descriptor.name.clone());
            let list = events.entry(fq.clone()).or_default();
            list.retain(|e| !(e.node_id == node_id && !e.is_local));
            list.push(EventEndpoint::remote(fq.clone(), fq.clone(), group, node_id));
        }
        debug!(node_id, services = descriptor.name, "registry: indexed remote service");
    }

    /// Strips all endpoints whose `node_id` equals `node_id`.
    pub async fn remove_node(&self, node_id: &str) {
        let mut actions = self.actions.write().await;
        for (_, endpoints) in actions.iter_mut() {
            endpoints.retain(|e| e.node_id != node_id);
        }
        actions.retain(|_, v| !v.is_empty());
        drop(actions);

        let mut events = self.events.write().await;
        for (_, endpoints) in events.iter_mut() {
            endpoints.retain(|e| e.node_id != node_id);
        }
        events.retain(|_, v| !v.is_empty());
        drop(events);

        self.node_availability.write().await.remove(node_id);
    }

    /// Records a node's availability so selection can skip it without
    /// waiting for endpoint pruning.
    pub async fn set_node_availability(&self, node_id: &str, available: bool) {
        self.node_availability
            .write()
            .await
            .insert(node_id.to_string(), available);
    }

    async fn node_is_available(&self, node_id: &str) -> bool {
        self.node_availability
            .read()
            .await
            .get(node_id)
            .copied()
            .unwrap_or(true)
    }

    /// Selection policy: (1) local endpoint if present; (2) else
    /// round-robin over available remote endpoints.
    pub async fn get_action(&self, name: &str) -> Option<ActionEndpoint> {
        let actions = self.actions.read().await;
        let candidates = actions.get(name)?;

        if let Some(local) = candidates.iter().find(|e| e.is_local) {
            return Some(local.clone());
        }

        let mut available = Vec::new();
        for endpoint in candidates {
            if self.node_is_available(&endpoint.node_id).await {
                available.push(endpoint.clone());
            }
        }
        drop(actions);
        if available.is_empty() {
            return None;
        }

        let counter = self.rr_counter(&self.action_rr, name).await;
        let idx = counter.next(available.len());
        Some(available[idx].clone())
    }

    /// For `emit`: one endpoint per distinct group, chosen round-robin
    /// within that group. For `broadcast`: every matching endpoint.
    pub async fn get_event(&self, name: &str, broadcast: bool) -> Vec<EventEndpoint> {
        let events = self.events.read().await;
        let mut matched: Vec<EventEndpoint> = Vec::new();
        for endpoints in events.values() {
            for endpoint in endpoints {
                if pattern::matches(&endpoint.pattern, name) {
                    matched.push(endpoint.clone());
                }
            }
        }
        drop(events);

        if broadcast {
            return matched;
        }

        let mut by_group: HashMap<String, Vec<EventEndpoint>> = HashMap::new();
        for endpoint in matched {
            by_group.entry(endpoint.group.clone()).or_default().push(endpoint);
        }

        let mut selected = Vec::new();
        for (group, endpoints) in by_group {
            let counter = self.rr_counter(&self.event_rr, &format!("{name}\0{group}")).await;
            let idx = counter.next(endpoints.len());
            selected.push(endpoints[idx].clone());
        }
        selected
    }

    async fn rr_counter(
        &self,
        table: &RwLock<HashMap<String, Arc<RoundRobin>>>,
        key: &str,
    ) -> Arc<RoundRobin> {
        if let Some(counter) = table.read().await.get(key) {
            return counter.clone();
        }
        let mut guard = table.write().await;
        guard
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RoundRobin::default()))
            .clone()
    }

    /// True if any endpoint (local or remote) is registered for `name`.
    pub async fn has_action(&self, name: &str) -> bool {
        self.actions.read().await.contains_key(name)
    }

    /// Local event endpoints whose pattern matches `name` exactly as
    /// published. Used on the receiving side of an already-targeted EVENT
    /// packet, where the emitter has already done group/broadcast
    /// selection; every local match here runs, there is no re-selection.
    pub async fn local_matching_events(&self, name: &str) -> Vec<EventEndpoint> {
        let events = self.events.read().await;
        events
            .values()
            .flatten()
            .filter(|e| e.is_local && pattern::matches(&e.pattern, name))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use serde_json::json;

    #[tokio::test]
    async fn local_endpoint_preferred_over_remote() {
        let registry = Registry::new("local-node");
        registry
            .add_remote(
                "remote-node",
                &ServiceDescriptor {
                    name: "math".into(),
                    full_name: "math".into(),
                    settings: json!({}),
                    metadata: json!({}),
                    actions: [(
                        "math.add".into(),
                        crate::packet::ActionDescriptor {
                            raw_name: "add".into(),
                            name: "math.add".into(),
                            params: json!({}),
                        },
                    )]
                    .into_iter()
                    .collect(),
                    events: Default::default(),
                },
            )
            .await;

        let schema = ServiceSchema::new("math").action(crate::service::ActionDef::new(
            "add",
            |ctx: Context| async move { Ok(crate::service::ActionOutcome::new(json!(5), ctx.meta)) },
        ));
        registry.register(schema).await;

        let endpoint = registry.get_action("math.add").await.unwrap();
        assert!(endpoint.is_local);
        assert_eq!(endpoint.node_id, "local-node");
    }

    #[tokio::test]
    async fn round_robins_remote_endpoints() {
        let registry = Registry::new("local-node");
        for node in ["node-a", "node-b"] {
            registry
                .add_remote(
                    node,
                    &ServiceDescriptor {
                        name: "math".into(),
                        full_name: "math".into(),
                        settings: json!({}),
                        metadata: json!({}),
                        actions: [(
                            "math.add".into(),
                            crate::packet::ActionDescriptor {
                                raw_name: "add".into(),
                                name: "math.add".into(),
                                params: json!({}),
                            },
                        )]
                        .into_iter()
                        .collect(),
                        events: Default::default(),
                    },
                )
                .await;
        }

        let first = registry.get_action("math.add").await.unwrap().node_id;
        let second = registry.get_action("math.add").await.unwrap().node_id;
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn remove_node_strips_its_endpoints() {
        let registry = Registry::new("local-node");
        registry
            .add_remote(
                "node-a",
                &ServiceDescriptor {
                    name: "math".into(),
                    full_name: "math".into(),
                    settings: json!({}),
                    metadata: json!({}),
                    actions: [(
                        "math.add".into(),
                        crate::packet::ActionDescriptor {
                            raw_name: "add".into(),
                            name: "math.add".into(),
                            params: json!({}),
                        },
                    )]
                    .into_iter()
                    .collect(),
                    events: Default::default(),
                },
            )
            .await;
        assert!(registry.get_action("math.add").await.is_some());
        registry.remove_node("node-a").await;
        assert!(registry.get_action("math.add").await.is_none());
    }

    #[tokio::test]
    async fn emit_picks_one_per_group_broadcast_picks_all() {
        let registry = Registry::new("local-node");
        registry
            .add_remote(
                "node-a",
                &ServiceDescriptor {
                    name: "svcA".into(),
                    full_name: "svcA".into(),
                    settings: json!({}),
                    metadata: json!({}),
                    actions: Default::default(),
                    events: [(
                        "user.created".into(),
                        crate::packet::EventDescriptor {
                            raw_name: "created".into(),
                            name: "user.created".into(),
                            group: Some("groupA".into()),
                        },
                    )]
                    .into_iter()
                    .collect(),
                },
            )
            .await;
        registry
            .add_remote(
                "node-b",
                &ServiceDescriptor {
                    name: "svcB".into(),
                    full_name: "svcB".into(),
                    settings: json!({}),
                    metadata: json!({}),
                    actions: Default::default(),
                    events: [(
                        "user.created".into(),
                        crate::packet::EventDescriptor {
                            raw_name: "created".into(),
                            name: "user.created".into(),
                            group: Some("groupB".into()),
                        },
                    )]
                    .into_iter()
                    .collect(),
                },
            )
            .await;

        let emitted = registry.get_event("user.created", false).await;
        assert_eq!(emitted.len(), 2);

        let broadcasted = registry.get_event("user.created", true).await;
        assert_eq!(broadcasted.len(), 2);
    }
}
