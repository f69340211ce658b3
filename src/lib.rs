#![forbid(unsafe_code)]
//! A Moleculer-protocol-compatible service mesh core: a pub/sub transport
//! abstraction, a Moleculer v4 packet codec, a node catalog, an
//! action/event registry, and the transit and broker layers tying them
//! together.
//!
//! A node built with this crate interoperates on the wire with any other
//! Moleculer v4 node (Node.js, Python/pylecular, ...) sharing the same
//! transporter and namespace: INFO/DISCOVER/HEARTBEAT gossip for discovery,
//! REQUEST/RESPONSE for `call`, EVENT for `emit`/`broadcast`, DISCONNECT on
//! shutdown.
//!
//! ```rust,no_run
//! use molecular_mesh::{ActionDef, ActionOutcome, Broker, ServiceSchema};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = Broker::builder()
//!     .node_id("math-node-1")
//!     .transporter("nats://localhost:4222")
//!     .build();
//!
//! broker
//!     .register(
//!         ServiceSchema::new("math").action(ActionDef::new("add", |ctx: molecular_mesh::Context| async move {
//!             let a = ctx.params["a"].as_f64().unwrap_or(0.0);
//!             let b = ctx.params["b"].as_f64().unwrap_or(0.0);
//!             Ok(ActionOutcome::new(json!(a + b), ctx.meta))
//!         })),
//!     )
//!     .await?;
//!
//! broker.start().await?;
//! let sum = broker.call("math.add", json!({"a": 1, "b": 2})).await?;
//! println!("1 + 2 = {sum}");
//! broker.stop().await?;
//! # Ok(()) }
//! ```

mod broker;
mod catalog;
mod config;
mod context;
mod error;
mod middleware;
mod packet;
mod registry;
mod service;
mod transit;
pub mod transport;
mod validate;

pub use broker::{Broker, BrokerBuilder};
pub use catalog::{Node, NodeCatalog};
pub use config::BrokerConfig;
pub use context::Context;
pub use error::{BrokerError, TransportError};
pub use middleware::{Middleware, RemoteCall};
pub use packet::{
    ActionDescriptor, ClientDescriptor, DisconnectPayload, DiscoverPayload, ErrorPayload, EventDescriptor,
    EventPayload, HeartbeatPayload, InfoPayload, Packet, PacketPayload, PacketType, RequestPayload,
    ResponsePayload, ServiceDescriptor, PROTOCOL_VERSION,
};
pub use registry::{ActionEndpoint, EventEndpoint, Registry};
pub use service::{
    ActionDef, ActionHandler, ActionOutcome, ActionResult, EventDef, EventHandler, EventResult, ServiceSchema,
};
pub use transit::Transit;
pub use transport::local::{LocalBus, LocalTransport};
pub use transport::nats::NatsTransport;
pub use transport::{RawMessage, Transport};
