use std::sync::Arc;

use serde_json::Value;

use crate::service::{ActionHandler, EventHandler};

/// A handle pairing an action name with a specific node — the unit of
/// selection in [`crate::Registry::get_action`].
#[derive(Clone)]
pub struct ActionEndpoint {
    pub name: String,
    pub node_id: String,
    pub is_local: bool,
    pub handler: Option<Arc<dyn ActionHandler>>,
    pub params_schema: Option<Value>,
}

impl ActionEndpoint {
    pub fn local(name: impl Into<String>, node_id: impl Into<String>, handler: Arc<dyn ActionHandler>, params_schema: Option<Value>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
            is_local: true,
            handler: Some(handler),
            params_schema,
        }
    }

    pub fn remote(name: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            node_id: node_id.into(),
            is_local: false,
            handler: None,
            params_schema: None,
        }
    }
}

impl std::fmt::Debug for ActionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionEndpoint")
            .field("name", &self.name)
            .field("node_id", &self.node_id)
            .field("is_local", &self.is_local)
            .finish()
    }
}

/// As [`ActionEndpoint`], plus a wildcard `pattern` and a `group` tag used
/// to decide fan-out on `emit` (one-per-group) versus `broadcast` (all).
#[derive(Clone)]
pub struct EventEndpoint {
    pub name: String,
    pub pattern: String,
    pub group: String,
    pub node_id: String,
    pub is_local: bool,
    pub handler: Option<Arc<dyn EventHandler>>,
}

impl EventEndpoint {
    pub fn local(
        name: impl Into<String>,
        pattern: impl Into<String>,
        group: impl Into<String>,
        node_id: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            group: group.into(),
            node_id: node_id.into(),
            is_local: true,
            handler: Some(handler),
        }
    }

    pub fn remote(
        name: impl Into<String>,
        pattern: impl Into<String>,
        group: impl Into<String>,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            group: group.into(),
            node_id: node_id.into(),
            is_local: false,
            handler: None,
        }
    }
}

impl std::fmt::Debug for EventEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEndpoint")
            .field("name", &self.name)
            .field("pattern", &self.pattern)
            .field("group", &self.group)
            .field("node_id", &self.node_id)
            .field("is_local", &self.is_local)
            .finish()
    }
}
