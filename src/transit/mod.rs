//! Transit: the wire-level half of the broker. Owns the transport
//! subscriptions, publishes packets, correlates REQUEST/RESPONSE pairs via
//! the pending-request table, and feeds INFO/HEARTBEAT/DISCONNECT into the
//! node catalog and registry.

pub mod pending;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::catalog::NodeCatalog;
use crate::context::Context;
use crate::error::BrokerError;
use crate::packet::{
    DisconnectPayload, DiscoverPayload, ErrorPayload, EventPayload, HeartbeatPayload, InfoPayload, Packet,
    PacketPayload, PacketType, RequestPayload, ResponsePayload, PROTOCOL_VERSION,
};
use crate::registry::{ActionEndpoint, EventEndpoint, Registry};
use crate::transport::{RawMessage, Transport};

use pending::PendingTable;

/// Ties the wire protocol to the [`Registry`] and [`NodeCatalog`]. Built
/// once per broker and shared behind an `Arc` so the dispatch loop can be
/// spawned with its own handle back to `self`.
pub struct Transit {
    node_id: String,
    namespace: String,
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    catalog: Arc<NodeCatalog>,
    pending: PendingTable,
    default_timeout: Duration,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Transit {
    pub fn new(
        node_id: impl Into<String>,
        namespace: impl Into<String>,
        transport: Arc<dyn Transport>,
        registry: Arc<Registry>,
        catalog: Arc<NodeCatalog>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            namespace: namespace.into(),
            transport,
            registry,
            catalog,
            pending: PendingTable::new(),
            default_timeout,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// The eight subjects every node subscribes to: broadcast and
    /// self-targeted INFO, broadcast DISCOVER and HEARTBEAT, self-targeted
    /// REQ/RES/EVENT, and broadcast DISCONNECT. A targeted DISCOVER subject
    /// is deliberately not in this list: a peer that wants to address one
    /// node directly gets the same effect by waiting for that node's
    /// self-targeted INFO reply, so carrying both would just double the
    /// subscription count for no behavioral gain.
    fn core_subjects(&self) -> Vec<String> {
        use PacketType::*;
        vec![
            Packet::subject(Info.cmd(), &self.namespace, None),
            Packet::subject(Info.cmd(), &self.namespace, Some(&self.node_id)),
            Packet::subject(Discover.cmd(), &self.namespace, None),
            Packet::subject(Heartbeat.cmd(), &self.namespace, None),
            Packet::subject(Request.cmd(), &self.namespace, Some(&self.node_id)),
            Packet::subject(Response.cmd(), &self.namespace, Some(&self.node_id)),
            Packet::subject(Event.cmd(), &self.namespace, Some(&self.node_id)),
            Packet::subject(Disconnect.cmd(), &self.namespace, None),
        ]
    }

    /// Opens the transport, announces this node with a broadcast DISCOVER
    /// followed by a broadcast INFO, then subscribes to the core subjects
    /// and starts the dispatch loop.
    pub async fn connect(self: &Arc<Self>) -> Result<(), BrokerError> {
        self.transport.connect().await?;
        self.catalog.ensure_local_node().await;

        self.publish_discover(None).await?;
        self.publish_info(None).await?;

        let (tx, mut rx) = mpsc::unbounded_channel::<RawMessage>();
        let mut tasks = Vec::new();
        for subject in self.core_subjects() {
            let mut stream = self.transport.subscribe(&subject).await?;
            let forward = tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(message) = stream.next().await {
                    if forward.send(message).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(tx);

        let dispatcher = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                dispatcher.handle_message(message).await;
            }
        }));
        *self.tasks.lock().await = tasks;

        Ok(())
    }

    /// Idempotent: announces DISCONNECT, rejects every pending request with
    /// `BrokerError::Shutdown`, stops the dispatch tasks, then closes the
    /// transport. Order matters: the pending table is drained before the
    /// transport closes so no in-flight RESPONSE can race a cleared table.
    pub async fn disconnect(&self) -> Result<(), BrokerError> {
        let payload = DisconnectPayload {
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        let _ = self
            .publish(Packet {
                ptype: PacketType::Disconnect,
                target: None,
                payload: PacketPayload::Disconnect(payload),
                sender: self.node_id.clone(),
            })
            .await;

        self.pending.cancel_all().await;

        for task in self.tasks.lock().await.drain(..) {
            task.abort();
        }

        self.transport.disconnect().await?;
        Ok(())
    }

    pub async fn publish(&self, packet: Packet) -> Result<(), BrokerError> {
        let subject = Packet::subject(packet.ptype().cmd(), &self.namespace, packet.target.as_deref());
        let bytes = packet.encode()?;
        self.transport.publish(&subject, bytes).await?;
        Ok(())
    }

    async fn publish_info(&self, target: Option<String>) -> Result<(), BrokerError> {
        let node = self.catalog.local_node().await;
        let payload = InfoPayload {
            id: Some(self.node_id.clone()),
            services: node.services,
            ip_list: node.ip_list,
            hostname: node.hostname,
            client: node.client,
            config: node.config,
            port: None,
            seq: node.seq,
            metadata: node.metadata,
            instance_id: node.instance_id,
            available: node.available,
            cpu: node.cpu,
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        self.publish(Packet {
            ptype: PacketType::Info,
            target,
            payload: PacketPayload::Info(payload),
            sender: self.node_id.clone(),
        })
        .await
    }

    async fn publish_discover(&self, target: Option<String>) -> Result<(), BrokerError> {
        let payload = DiscoverPayload {
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        self.publish(Packet {
            ptype: PacketType::Discover,
            target,
            payload: PacketPayload::Discover(payload),
            sender: self.node_id.clone(),
        })
        .await
    }

    /// Re-broadcasts this node's current INFO (bumping `seq` first). Called
    /// by the broker after every `register()` and by the heartbeat task.
    pub async fn announce(&self) -> Result<(), BrokerError> {
        self.catalog.ensure_local_node().await;
        self.catalog.bump_local_seq().await;
        self.publish_info(None).await
    }

    pub async fn send_heartbeat(&self, cpu: f64) -> Result<(), BrokerError> {
        let payload = HeartbeatPayload {
            cpu,
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        self.publish(Packet {
            ptype: PacketType::Heartbeat,
            target: None,
            payload: PacketPayload::Heartbeat(payload),
            sender: self.node_id.clone(),
        })
        .await
    }

    /// Performs a remote call against `endpoint`: inserts a pending entry
    /// keyed by `ctx.id`, publishes a targeted REQUEST, and awaits the
    /// matching RESPONSE with a timeout (`ctx.timeout`, falling back to the
    /// transit-wide default).
    pub async fn request(&self, endpoint: &ActionEndpoint, ctx: Context) -> Result<Value, BrokerError> {
        let timeout = ctx.timeout.unwrap_or(self.default_timeout);
        let request_id = ctx.id.clone();
        let rx = self.pending.insert(request_id.clone(), endpoint.node_id.clone()).await;

        let payload = RequestPayload {
            id: ctx.id.clone(),
            action: endpoint.name.clone(),
            params: ctx.params.clone(),
            meta: ctx.meta.clone(),
            timeout: ctx.timeout.map(|d| d.as_millis() as u64),
            level: ctx.level,
            tracing: false,
            parent_id: ctx.parent_id.clone(),
            request_id: Some(ctx.request_id.clone()),
            stream: ctx.stream,
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        if let Err(err) = self
            .publish(Packet {
                ptype: PacketType::Request,
                target: Some(endpoint.node_id.clone()),
                payload: PacketPayload::Request(payload),
                sender: self.node_id.clone(),
            })
            .await
        {
            self.pending.remove(&request_id).await;
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(response))) => {
                if response.success {
                    Ok(response.data.unwrap_or(Value::Null))
                } else {
                    let error = response.error.unwrap_or_else(default_error_payload);
                    Err(BrokerError::from_response_error(&endpoint.name, &endpoint.node_id, error))
                }
            }
            Ok(Ok(Err(err))) => Err(err),
            Ok(Err(_recv_dropped)) => Err(BrokerError::NodeDisconnected(endpoint.node_id.clone())),
            Err(_elapsed) => {
                self.pending.remove(&request_id).await;
                Err(BrokerError::RequestTimeout { request_id, timeout })
            }
        }
    }

    /// Fire-and-forget targeted EVENT publish to a single already-selected endpoint.
    pub async fn send_event(&self, endpoint: &EventEndpoint, ctx: &Context, broadcast: bool) -> Result<(), BrokerError> {
        let payload = EventPayload {
            id: ctx.id.clone(),
            event: endpoint.name.clone(),
            data: ctx.params.clone(),
            groups: Some(vec![endpoint.group.clone()]),
            broadcast,
            meta: ctx.meta.clone(),
            level: ctx.level,
            tracing: false,
            parent_id: ctx.parent_id.clone(),
            request_id: Some(ctx.request_id.clone()),
            need_ack: false,
            sender: self.node_id.clone(),
            ver: PROTOCOL_VERSION.into(),
        };
        self.publish(Packet {
            ptype: PacketType::Event,
            target: Some(endpoint.node_id.clone()),
            payload: PacketPayload::Event(payload),
            sender: self.node_id.clone(),
        })
        .await
    }

    async fn handle_message(&self, raw: RawMessage) {
        let Some((ptype, target)) = parse_subject(&raw.subject) else {
            warn!(subject = %raw.subject, "transit: unrecognized subject");
            return;
        };
        let packet = match Packet::decode(ptype, target, &raw.payload) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(subject = %raw.subject, error = %err, "transit: failed to decode packet");
                return;
            }
        };
        if packet.sender == self.node_id {
            return;
        }

        match &packet.payload {
            PacketPayload::Info(payload) => self.handle_info(&packet.sender, payload).await,
            PacketPayload::Discover(_) => self.handle_discover(&packet.sender).await,
            PacketPayload::Heartbeat(payload) => self.handle_heartbeat(&packet.sender, payload).await,
            PacketPayload::Request(payload) => self.handle_request(payload.clone()).await,
            PacketPayload::Response(payload) => self.handle_response(payload.clone()).await,
            PacketPayload::Event(payload) => self.handle_event(payload).await,
            PacketPayload::Disconnect(_) => self.handle_disconnect(&packet.sender).await,
        }
    }

    async fn handle_info(&self, sender: &str, payload: &InfoPayload) {
        self.catalog.process_info(sender, payload).await;
    }

    /// A peer announced itself via DISCOVER; since this node never
    /// subscribes to a targeted DISCOVER subject, every DISCOVER it
    /// receives arrived on the broadcast subject, so the reply is a
    /// broadcast INFO rather than one targeted at `sender`.
    async fn handle_discover(&self, sender: &str) {
        if let Err(err) = self.publish_info(None).await {
            warn!(%sender, error = %err, "transit: failed to reply to DISCOVER");
        }
    }

    /// A HEARTBEAT from a sender we haven't indexed via INFO yet means we
    /// missed their announcement (e.g. we joined after they did); ask them
    /// to re-announce instead of silently dropping their heartbeats forever.
    async fn handle_heartbeat(&self, sender: &str, payload: &HeartbeatPayload) {
        let known = self.catalog.process_heartbeat(sender, payload.cpu).await;
        if !known {
            debug!(%sender, "transit: heartbeat from unknown node, requesting re-sync");
            if let Err(err) = self.publish_discover(Some(sender.to_string())).await {
                warn!(%sender, error = %err, "transit: failed to request re-sync");
            }
        }
    }

    async fn handle_request(&self, payload: RequestPayload) {
        let requester = payload.sender.clone();
        let ctx = Context {
            id: payload.id.clone(),
            action: Some(payload.action.clone()),
            params: payload.params.clone(),
            meta: payload.meta.clone(),
            request_id: payload.request_id.clone().unwrap_or_else(|| payload.id.clone()),
            parent_id: payload.parent_id.clone(),
            stream: payload.stream,
            level: payload.level,
            timeout: payload.timeout.map(Duration::from_millis),
        };
        // Falls back to the pre-handler meta for error responses, where the
        // handler either never ran (no endpoint, failed validation) or
        // returned before producing its own final meta.
        let fallback_meta = ctx.meta.clone();

        let endpoint = self.registry.get_action(&payload.action).await;
        let outcome = match endpoint {
            Some(e) if e.is_local => match e.handler {
                Some(handler) => match &e.params_schema {
                    Some(schema) => match crate::validate::validate(schema, &ctx.params) {
                        Ok(()) => handler.call(ctx).await,
                        Err(message) => Err(BrokerError::Validation { action: payload.action.clone(), message }),
                    },
                    None => handler.call(ctx).await,
                },
                None => Err(BrokerError::ServiceNotAvailable(payload.action.clone())),
            },
            _ => Err(BrokerError::ServiceNotAvailable(payload.action.clone())),
        };

        let response = match outcome {
            Ok(outcome) => ResponsePayload {
                id: payload.id.clone(),
                success: true,
                data: Some(outcome.data),
                error: None,
                meta: outcome.meta,
                sender: self.node_id.clone(),
                ver: PROTOCOL_VERSION.into(),
            },
            Err(err) => ResponsePayload {
                id: payload.id.clone(),
                success: false,
                data: None,
                error: Some(broker_error_to_error_payload(&payload.action, &err)),
                meta: fallback_meta,
                sender: self.node_id.clone(),
                ver: PROTOCOL_VERSION.into(),
            },
        };

        if let Err(err) = self
            .publish(Packet {
                ptype: PacketType::Response,
                target: Some(requester.clone()),
                payload: PacketPayload::Response(response),
                sender: self.node_id.clone(),
            })
            .await
        {
            warn!(requester, error = %err, "transit: failed to publish RESPONSE");
        }
    }

    async fn handle_response(&self, payload: ResponsePayload) {
        self.pending.resolve(&payload.id, Ok(payload.clone())).await;
    }

    /// Every local handler whose pattern matches the incoming event name
    /// runs; the sender has already performed group/broadcast selection,
    /// so there is no re-selection on the receiving side.
    async fn handle_event(&self, payload: &EventPayload) {
        let endpoints = self.registry.local_matching_events(&payload.event).await;
        for endpoint in endpoints {
            let Some(handler) = endpoint.handler.clone() else { continue };
            let ctx = Context {
                id: payload.id.clone(),
                action: None,
                params: payload.data.clone(),
                meta: payload.meta.clone(),
                request_id: payload.request_id.clone().unwrap_or_else(|| payload.id.clone()),
                parent_id: payload.parent_id.clone(),
                stream: false,
                level: payload.level,
                timeout: None,
            };
            handler.call(ctx).await;
        }
    }

    /// Marks any node whose last heartbeat is older than `3 * heartbeat_interval`
    /// unavailable, cancels its pending requests and strips its endpoints.
    /// Driven by the broker's periodic sweeper, not called from the dispatch loop.
    pub async fn reap_expired_nodes(&self, heartbeat_interval: Duration) -> Vec<String> {
        let expired = self.catalog.expire(heartbeat_interval).await;
        for id in &expired {
            self.pending.cancel_for_node(id).await;
            self.registry.remove_node(id).await;
        }
        expired
    }

    async fn handle_disconnect(&self, sender: &str) {
        self.catalog.disconnect_node(sender).await;
        self.pending.cancel_for_node(sender).await;
        self.registry.remove_node(sender).await;
    }
}

fn default_error_payload() -> ErrorPayload {
    ErrorPayload {
        name: "MoleculerError".into(),
        message: "remote call failed with no error payload".into(),
        code: None,
        error_type: None,
        stack: None,
        data: None,
    }
}

fn broker_error_to_error_payload(action: &str, err: &BrokerError) -> ErrorPayload {
    match err {
        BrokerError::Validation { message, .. } => ErrorPayload {
            name: "ValidationError".into(),
            message: message.clone(),
            code: Some(422),
            error_type: None,
            stack: None,
            data: None,
        },
        BrokerError::ServiceNotAvailable(_) => ErrorPayload {
            name: "ServiceNotFoundError".into(),
            message: format!("service `{action}` is not available"),
            code: Some(404),
            error_type: None,
            stack: None,
            data: None,
        },
        BrokerError::HandlerError { message, stack, .. } => ErrorPayload {
            name: "MoleculerError".into(),
            message: message.clone(),
            code: Some(500),
            error_type: None,
            stack: stack.clone(),
            data: None,
        },
        other => ErrorPayload {
            name: "MoleculerError".into(),
            message: other.to_string(),
            code: Some(500),
            error_type: None,
            stack: None,
            data: None,
        },
    }
}

/// Reverses [`Packet::subject`]: splits on `.`, locates the `MOL` segment,
/// reads the command after it and joins whatever remains as the target
/// (a node id is never expected to contain a literal `.`, but joining
/// rather than taking a single next segment keeps this robust either way).
fn parse_subject(subject: &str) -> Option<(PacketType, Option<String>)> {
    let parts: Vec<&str> = subject.split('.').collect();
    let mol_idx = parts.iter().position(|p| *p == "MOL")?;
    let cmd = parts.get(mol_idx + 1)?;
    let ptype = PacketType::from_cmd(cmd)?;
    let target = if parts.len() > mol_idx + 2 {
        Some(parts[mol_idx + 2..].join("."))
    } else {
        None
    };
    Some((ptype, target))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broadcast_and_targeted_subjects() {
        assert_eq!(parse_subject("MOL.INFO"), Some((PacketType::Info, None)));
        assert_eq!(
            parse_subject("MOL.REQ.node-a"),
            Some((PacketType::Request, Some("node-a".into())))
        );
        assert_eq!(
            parse_subject("my-ns.MOL.RES.node-b"),
            Some((PacketType::Response, Some("node-b".into())))
        );
        assert_eq!(parse_subject("garbage"), None);
    }
}
