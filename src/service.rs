//! The structured registration surface the [`crate::Registry`] ingests.
//!
//! The Moleculer reference discovers actions/events via attribute marking on
//! user classes at runtime. This crate re-architects that as an explicit
//! list supplied at `register()` time; a builder or macro layered on top is
//! free to produce this shape, but the registry itself only ever sees this.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::context::Context;
use crate::error::BrokerError;

pub type ActionResult = Pin<Box<dyn Future<Output = Result<ActionOutcome, BrokerError>> + Send>>;
pub type EventResult = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The result of a successful local action invocation: the response data
/// plus `ctx.meta` as it stood when the handler returned. A handler that
/// never touches `ctx.meta` simply passes it through unchanged; one that
/// mutates its local copy (e.g. to stamp an auth/trace field) returns the
/// mutated value here so the wire RESPONSE echoes it rather than the
/// pre-handler meta.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub data: Value,
    pub meta: Value,
}

impl ActionOutcome {
    pub fn new(data: Value, meta: Value) -> Self {
        Self { data, meta }
    }
}

/// A local action handler: takes the invocation [`Context`], returns the
/// result data and final meta (or an error, which becomes a wire-visible
/// error response when the call came in over the transport).
pub trait ActionHandler: Send + Sync {
    fn call(&self, ctx: Context) -> ActionResult;
}

impl<F, Fut> ActionHandler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutcome, BrokerError>> + Send + 'static,
{
    fn call(&self, ctx: Context) -> ActionResult {
        Box::pin((self)(ctx))
    }
}

/// A local event handler: fire-and-forget, no return value.
pub trait EventHandler: Send + Sync {
    fn call(&self, ctx: Context) -> EventResult;
}

impl<F, Fut> EventHandler for F
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(&self, ctx: Context) -> EventResult {
        Box::pin((self)(ctx))
    }
}

/// One action declaration within a [`ServiceSchema`].
#[derive(Clone)]
pub struct ActionDef {
    pub name: String,
    pub handler: Arc<dyn ActionHandler>,
    pub params_schema: Option<Value>,
}

impl ActionDef {
    pub fn new(name: impl Into<String>, handler: impl ActionHandler + 'static) -> Self {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
            params_schema: None,
        }
    }

    pub fn with_params_schema(mut self, schema: Value) -> Self {
        self.params_schema = Some(schema);
        self
    }
}

/// One event declaration within a [`ServiceSchema`].
#[derive(Clone)]
pub struct EventDef {
    pub name: String,
    pub pattern: String,
    pub group: Option<String>,
    pub handler: Arc<dyn EventHandler>,
}

impl EventDef {
    pub fn new(name: impl Into<String>, handler: impl EventHandler + 'static) -> Self {
        let name = name.into();
        Self {
            pattern: name.clone(),
            name,
            group: None,
            handler: Arc::new(handler),
        }
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = pattern.into();
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// A local service declaration: a name plus its actions and events.
///
/// `register(schema)` creates one local [`crate::registry::ActionEndpoint`]
/// per declared action and one [`crate::registry::EventEndpoint`] per
/// declared event. Re-registering the same service name replaces its prior
/// endpoints.
#[derive(Clone)]
pub struct ServiceSchema {
    pub name: String,
    pub settings: Value,
    pub metadata: Value,
    pub actions: Vec<ActionDef>,
    pub events: Vec<EventDef>,
}

impl ServiceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings: Value::Object(Default::default()),
            metadata: Value::Object(Default::default()),
            actions: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn action(mut self, action: ActionDef) -> Self {
        self.actions.push(action);
        self
    }

    pub fn event(mut self, event: EventDef) -> Self {
        self.events.push(event);
        self
    }

    pub fn with_settings(mut self, settings: Value) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// The fully-qualified action names this service declares, e.g. `math.add`.
    pub fn action_names(&self) -> Vec<String> {
        self.actions
            .iter()
            .map(|a| format!("{}.{}", self.name, a.name))
            .collect()
    }

    pub fn event_names(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| format!("{}.{}", self.name, e.name))
            .collect()
    }
}
