//! The per-invocation envelope carried end-to-end across a `call`/`emit`.

use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

/// Created by the broker on every outbound `call`/`emit`, rebuilt on the
/// callee side from the REQUEST/EVENT payload, and discarded when the
/// response resolves or the request times out.
#[derive(Debug, Clone)]
pub struct Context {
    pub id: String,
    pub action: Option<String>,
    pub params: Value,
    pub meta: Value,
    pub request_id: String,
    pub parent_id: Option<String>,
    pub stream: bool,
    pub level: u32,
    pub timeout: Option<Duration>,
}

impl Context {
    /// A fresh top-level context: `level = 1`, `request_id = id`, no parent.
    pub fn new(action: Option<String>, params: Value, meta: Value) -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            request_id: id.clone(),
            id,
            action,
            params,
            meta,
            parent_id: None,
            stream: false,
            level: 1,
            timeout: None,
        }
    }

    /// A child context inheriting `request_id` and incrementing `level`,
    /// used when a handler makes a nested `call`/`emit`.
    pub fn child_of(parent: &Context, action: Option<String>, params: Value, meta: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            action,
            params,
            meta,
            request_id: parent.request_id.clone(),
            parent_id: Some(parent.id.clone()),
            stream: false,
            level: parent.level + 1,
            timeout: parent.timeout,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
