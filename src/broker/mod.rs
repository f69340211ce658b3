//! The [`Broker`] façade: the only type most callers touch directly. Builds
//! the registry/catalog/transit stack, starts the background heartbeat and
//! node-expiry tasks, and exposes `register`/`call`/`emit`/`broadcast`.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::catalog::NodeCatalog;
use crate::config::BrokerConfig;
use crate::context::Context;
use crate::error::BrokerError;
use crate::middleware::{Middleware, RemoteCall};
use crate::registry::Registry;
use crate::service::ServiceSchema;
use crate::transit::Transit;
use crate::transport::nats::NatsTransport;
use crate::transport::Transport;

/// Builder for [`Broker`]. Every setter has a corresponding `MOLECULER_*`
/// environment default (see [`BrokerConfig`]); call [`BrokerBuilder::from_config`]
/// to start from an explicitly loaded config instead of the built-in defaults.
pub struct BrokerBuilder {
    node_id: Option<String>,
    namespace: String,
    transporter: String,
    transport: Option<Arc<dyn Transport>>,
    heartbeat_interval: Duration,
    request_timeout: Duration,
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl BrokerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from an explicitly loaded [`BrokerConfig`] (e.g. `BrokerConfig::from_env()`)
    /// instead of the struct-level defaults.
    pub fn from_config(config: BrokerConfig) -> Self {
        Self {
            node_id: Some(config.node_id),
            namespace: config.namespace,
            transporter: config.transporter,
            transport: None,
            heartbeat_interval: config.heartbeat_interval,
            request_timeout: config.request_timeout,
            middlewares: Vec::new(),
        }
    }

    /// Defaults to `<hostname>-<short-uuid>`.
    pub fn node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = Some(node_id.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Sets the NATS server URL used to build the default transport. Ignored
    /// if [`Self::transport`] is also called.
    pub fn transporter(mut self, url: impl Into<String>) -> Self {
        self.transporter = url.into();
        self
    }

    /// Overrides the transport entirely, e.g. with a [`crate::transport::local::LocalTransport`] for tests.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Registers a middleware. Middlewares wrap local dispatch in the order
    /// added: the first one added is the outermost wrapper.
    pub fn middleware(mut self, middleware: impl Middleware + 'static) -> Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    pub fn build(self) -> Broker {
        let node_id = self.node_id.unwrap_or_else(crate::config::default_node_id);
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(NatsTransport::new(self.transporter.clone())));

        let registry = Arc::new(Registry::new(node_id.clone()));
        let catalog = Arc::new(NodeCatalog::new(node_id.clone(), registry.clone()));
        let transit = Arc::new(Transit::new(
            node_id.clone(),
            self.namespace,
            transport,
            registry.clone(),
            catalog.clone(),
            self.request_timeout,
        ));

        for mw in &self.middlewares {
            mw.broker_created(&node_id);
        }

        Broker {
            node_id,
            registry,
            catalog,
            transit,
            middlewares: self.middlewares,
            heartbeat_interval: self.heartbeat_interval,
            request_timeout: self.request_timeout,
            background_tasks: Mutex::new(Vec::new()),
            shutdown: Notify::new(),
        }
    }
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        let config = BrokerConfig::default();
        Self {
            node_id: None,
            namespace: config.namespace,
            transporter: config.transporter,
            transport: None,
            heartbeat_interval: config.heartbeat_interval,
            request_timeout: config.request_timeout,
            middlewares: Vec::new(),
        }
    }
}

/// The service mesh node: wraps [`Transit`], [`Registry`] and [`NodeCatalog`]
/// behind `register`/`call`/`emit`/`broadcast`/`wait_for_services` and owns
/// the periodic heartbeat publisher and node-expiry sweeper started by
/// [`Broker::start`].
pub struct Broker {
    node_id: String,
    registry: Arc<Registry>,
    catalog: Arc<NodeCatalog>,
    transit: Arc<Transit>,
    middlewares: Vec<Arc<dyn Middleware>>,
    heartbeat_interval: Duration,
    request_timeout: Duration,
    background_tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Notify,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::new()
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Connects the transport, subscribes, announces this node, and spawns
    /// the heartbeat publisher and node-expiry sweeper (both on
    /// `heartbeat_interval`).
    pub async fn start(&self) -> Result<(), BrokerError> {
        self.transit.connect().await?;
        for mw in &self.middlewares {
            mw.broker_started(&self.node_id);
        }

        let heartbeat_interval = self.heartbeat_interval;

        let heartbeat_transit = self.transit.clone();
        let heartbeat_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.tick().await; // first tick fires immediately; we already announced in connect()
            loop {
                ticker.tick().await;
                if let Err(err) = heartbeat_transit.send_heartbeat(0.0).await {
                    warn!(error = %err, "broker: failed to publish heartbeat");
                }
            }
        });

        let sweep_transit = self.transit.clone();
        let sweep_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            loop {
                ticker.tick().await;
                let expired = sweep_transit.reap_expired_nodes(heartbeat_interval).await;
                for node_id in expired {
                    debug!(node_id, "broker: reaped expired node");
                }
            }
        });

        *self.background_tasks.lock().await = vec![heartbeat_task, sweep_task];
        Ok(())
    }

    /// Idempotent: stops the background tasks, disconnects transit, and
    /// wakes any [`Broker::wait_for_shutdown`] caller.
    pub async fn stop(&self) -> Result<(), BrokerError> {
        for task in self.background_tasks.lock().await.drain(..) {
            task.abort();
        }
        self.transit.disconnect().await?;
        for mw in &self.middlewares {
            mw.broker_stopped(&self.node_id);
        }
        self.shutdown.notify_waiters();
        Ok(())
    }

    /// Blocks until `stop()` is called, or the process receives SIGINT or
    /// SIGTERM (in which case it calls `stop()` itself before returning).
    #[cfg(unix)]
    pub async fn wait_for_shutdown(&self) {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "broker: failed to install SIGTERM handler");
                self.shutdown.notified().await;
                return;
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = self.stop().await {
                    warn!(error = %err, "broker: error while stopping on SIGINT");
                }
            }
            _ = sigterm.recv() => {
                if let Err(err) = self.stop().await {
                    warn!(error = %err, "broker: error while stopping on SIGTERM");
                }
            }
            _ = self.shutdown.notified() => {}
        }
    }

    /// As above; SIGTERM has no counterpart on non-Unix platforms.
    #[cfg(not(unix))]
    pub async fn wait_for_shutdown(&self) {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                if let Err(err) = self.stop().await {
                    warn!(error = %err, "broker: error while stopping on ctrl-c");
                }
            }
            _ = self.shutdown.notified() => {}
        }
    }

    /// Installs a service: wraps its action/event handlers through every
    /// registered middleware, indexes it in the registry, and re-announces
    /// this node's INFO so peers pick up the new service immediately.
    pub async fn register(&self, mut schema: ServiceSchema) -> Result<(), BrokerError> {
        for action in schema.actions.iter_mut() {
            let mut handler = action.handler.clone();
            for mw in &self.middlewares {
                handler = mw.local_action(handler);
            }
            action.handler = handler;
        }
        for event in schema.events.iter_mut() {
            let mut handler = event.handler.clone();
            for mw in &self.middlewares {
                handler = mw.local_event(handler);
            }
            event.handler = handler;
        }

        let service_name = schema.name.clone();
        self.registry.register(schema).await;
        self.catalog.ensure_local_node().await;
        for mw in &self.middlewares {
            mw.service_created(&service_name);
        }
        self.transit.announce().await?;
        for mw in &self.middlewares {
            mw.service_started(&service_name);
        }
        Ok(())
    }

    pub async fn call(&self, action: &str, params: Value) -> Result<Value, BrokerError> {
        self.call_opts(action, params, Value::Object(Default::default()), None).await
    }

    /// As [`Self::call`], with explicit `meta` and an optional parent
    /// [`Context`] (e.g. from within another action handler making a nested call).
    pub async fn call_opts(
        &self,
        action: &str,
        params: Value,
        meta: Value,
        parent: Option<&Context>,
    ) -> Result<Value, BrokerError> {
        let ctx = match parent {
            Some(parent) => Context::child_of(parent, Some(action.to_string()), params, meta),
            None => Context::new(Some(action.to_string()), params, meta).with_timeout(self.request_timeout),
        };

        let endpoint = self
            .registry
            .get_action(action)
            .await
            .ok_or_else(|| BrokerError::ServiceNotAvailable(action.to_string()))?;

        if endpoint.is_local {
            let handler = endpoint
                .handler
                .clone()
                .ok_or_else(|| BrokerError::ServiceNotAvailable(action.to_string()))?;
            if let Some(schema) = &endpoint.params_schema {
                crate::validate::validate(schema, &ctx.params)
                    .map_err(|message| BrokerError::Validation { action: action.to_string(), message })?;
            }
            let outcome = handler.call(ctx).await?;
            Ok(outcome.data)
        } else {
            let transit = self.transit.clone();
            let mut call_fn: RemoteCall = Arc::new(move |endpoint, ctx| {
                let transit = transit.clone();
                Box::pin(async move { transit.request(&endpoint, ctx).await })
            });
            for mw in &self.middlewares {
                call_fn = mw.remote_action(call_fn);
            }
            call_fn(endpoint, ctx).await
        }
    }

    pub async fn emit(&self, event: &str, params: Value) -> Result<(), BrokerError> {
        self.publish_event(event, params, Value::Object(Default::default()), false).await
    }

    pub async fn broadcast(&self, event: &str, params: Value) -> Result<(), BrokerError> {
        self.publish_event(event, params, Value::Object(Default::default()), true).await
    }

    async fn publish_event(&self, event: &str, params: Value, meta: Value, broadcast: bool) -> Result<(), BrokerError> {
        let ctx = Context::new(None, params, meta);
        let endpoints = self.registry.get_event(event, broadcast).await;
        for endpoint in endpoints {
            if endpoint.is_local {
                if let Some(handler) = endpoint.handler.clone() {
                    handler.call(ctx.clone()).await;
                }
            } else {
                self.transit.send_event(&endpoint, &ctx, broadcast).await?;
            }
        }
        Ok(())
    }

    /// Polls local and remote service advertisements until every name in
    /// `names` is known or `timeout` elapses.
    pub async fn wait_for_services(&self, names: &[&str], timeout: Duration) -> Result<(), BrokerError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let known = self.known_service_names().await;
            let mut missing: Vec<&str> = Vec::new();
            for name in names {
                if !known.contains(*name) {
                    missing.push(*name);
                }
            }
            if missing.is_empty() {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrokerError::ServiceNotAvailable(missing.join(", ")));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn known_service_names(&self) -> std::collections::HashSet<String> {
        let mut names: std::collections::HashSet<String> = self
            .registry
            .local_service_descriptors()
            .await
            .into_iter()
            .map(|s| s.name)
            .collect();
        for node in self.catalog.all_nodes().await {
            if node.available {
                names.extend(node.services.into_iter().map(|s| s.name));
            }
        }
        names
    }
}
