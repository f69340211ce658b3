//! The thin ergonomic layer spec.md's design notes allow on top of the
//! structured registration surface, supplemented from the original
//! `pylecular/middleware.py`: dispatch-wrapping hooks plus lifecycle
//! notifications. A broker with zero middlewares behaves identically to
//! one with the hooks wired in as no-ops, which is what every default
//! method here does.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;
use crate::error::BrokerError;
use crate::registry::ActionEndpoint;
use crate::service::{ActionHandler, EventHandler};

pub type RemoteCall =
    Arc<dyn Fn(ActionEndpoint, Context) -> Pin<Box<dyn Future<Output = Result<Value, BrokerError>> + Send>> + Send + Sync>;

/// Hooks around action/event dispatch and broker/service lifecycle.
/// All methods default to a no-op (or identity, for the wrapping hooks),
/// so registering zero middlewares changes nothing.
pub trait Middleware: Send + Sync {
    /// Wraps a local action handler before it is installed in the registry.
    fn local_action(&self, next: Arc<dyn ActionHandler>) -> Arc<dyn ActionHandler> {
        next
    }

    /// Wraps the function used to perform a remote call.
    fn remote_action(&self, next: RemoteCall) -> RemoteCall {
        next
    }

    /// Wraps a local event handler before it is installed in the registry.
    fn local_event(&self, next: Arc<dyn EventHandler>) -> Arc<dyn EventHandler> {
        next
    }

    fn broker_created(&self, _node_id: &str) {}
    fn broker_started(&self, _node_id: &str) {}
    fn broker_stopped(&self, _node_id: &str) {}
    fn service_created(&self, _service_name: &str) {}
    fn service_started(&self, _service_name: &str) {}
    fn service_stopped(&self, _service_name: &str) {}
}
