//! Wire-level packet types: the JSON payloads exchanged over `MOL.<CMD>[.<NODE_ID>]`
//! subjects, and the [`Packet`] envelope the rest of the crate works with.
//!
//! Field-name robustness (camelCase vs. legacy snake_case, unknown-field
//! tolerance) lives on the payload structs themselves via `#[serde(alias =
//! ..., default)]` rather than as a separate normalization pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

pub const PROTOCOL_VERSION: &str = "4";

/// The seven Moleculer packet types, and their `MOL.<CMD>` subject segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    Info,
    Discover,
    Heartbeat,
    Request,
    Response,
    Event,
    Disconnect,
}

impl PacketType {
    pub fn cmd(self) -> &'static str {
        match self {
            PacketType::Info => "INFO",
            PacketType::Discover => "DISCOVER",
            PacketType::Heartbeat => "HEARTBEAT",
            PacketType::Request => "REQ",
            PacketType::Response => "RES",
            PacketType::Event => "EVENT",
            PacketType::Disconnect => "DISCONNECT",
        }
    }

    /// Parses the second dot-segment of a subject (e.g. `MOL.REQ.node-a` -> `REQ`).
    pub fn from_cmd(cmd: &str) -> Option<Self> {
        match cmd {
            "INFO" => Some(PacketType::Info),
            "DISCOVER" => Some(PacketType::Discover),
            "HEARTBEAT" => Some(PacketType::Heartbeat),
            "REQ" => Some(PacketType::Request),
            "RES" => Some(PacketType::Response),
            "EVENT" => Some(PacketType::Event),
            "DISCONNECT" => Some(PacketType::Disconnect),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// `{id, action, params, meta, timeout, level, tracing, parentID, requestID, stream, sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestPayload {
    pub id: String,
    pub action: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub meta: Value,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub tracing: bool,
    #[serde(rename = "parentID", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub stream: bool,
    pub sender: String,
    pub ver: String,
}

fn default_level() -> u32 {
    1
}

/// `{id, success, data?, error?, meta, sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub meta: Value,
    pub sender: String,
    pub ver: String,
}

/// `error={name,message,code?,type?,stack?,data?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// `{id, event, data, groups?, broadcast, meta, level, tracing, parentID, requestID, needAck?, sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: String,
    pub event: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub groups: Option<Vec<String>>,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default)]
    pub meta: Value,
    #[serde(default = "default_level")]
    pub level: u32,
    #[serde(default)]
    pub tracing: bool,
    #[serde(rename = "parentID", default)]
    pub parent_id: Option<String>,
    #[serde(rename = "requestID", default)]
    pub request_id: Option<String>,
    #[serde(rename = "needAck", default)]
    pub need_ack: bool,
    pub sender: String,
    pub ver: String,
}

/// `{id, services, ipList, hostname, client, config, port, seq, metadata, instanceID, sender, ver}`
///
/// Accepts both camelCase and legacy snake_case field spellings and
/// defaults anything missing, per the field-name-robustness requirement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(rename = "ipList", alias = "ip_list", default)]
    pub ip_list: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub client: ClientDescriptor,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub seq: u64,
    #[serde(default)]
    pub metadata: Value,
    #[serde(rename = "instanceID", alias = "instance_id", default)]
    pub instance_id: Option<String>,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub cpu: f64,
    pub sender: String,
    pub ver: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientDescriptor {
    #[serde(rename = "type", default)]
    pub client_type: String,
    #[serde(rename = "langVersion", alias = "lang_version", default)]
    pub lang_version: String,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(rename = "fullName", alias = "full_name", default)]
    pub full_name: String,
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub actions: HashMap<String, ActionDescriptor>,
    #[serde(default)]
    pub events: HashMap<String, EventDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDescriptor {
    #[serde(rename = "rawName", alias = "raw_name", default)]
    pub raw_name: String,
    pub name: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDescriptor {
    #[serde(rename = "rawName", alias = "raw_name", default)]
    pub raw_name: String,
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
}

/// `{cpu, sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatPayload {
    #[serde(default)]
    pub cpu: f64,
    pub sender: String,
    pub ver: String,
}

/// `{sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverPayload {
    pub sender: String,
    pub ver: String,
}

/// `{sender, ver}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectPayload {
    pub sender: String,
    pub ver: String,
}

/// The decoded form of any of the seven payload shapes.
#[derive(Debug, Clone)]
pub enum PacketPayload {
    Info(InfoPayload),
    Discover(DiscoverPayload),
    Heartbeat(HeartbeatPayload),
    Request(RequestPayload),
    Response(ResponsePayload),
    Event(EventPayload),
    Disconnect(DisconnectPayload),
}

/// An inbound or outbound packet: a type, an optional target node id
/// (`None` means broadcast), a typed payload, and the sender node id
/// (always the local node on publish; taken from the payload on decode).
#[derive(Debug, Clone)]
pub struct Packet {
    pub ptype: PacketType,
    pub target: Option<String>,
    pub payload: PacketPayload,
    pub sender: String,
}

impl Packet {
    pub fn ptype(&self) -> PacketType {
        self.ptype
    }

    /// Serializes the payload, stamping `ver` and `sender` as required by
    /// the wire invariant, regardless of what the typed struct already carried.
    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        let mut value = match &self.payload {
            PacketPayload::Info(p) => serde_json::to_value(p),
            PacketPayload::Discover(p) => serde_json::to_value(p),
            PacketPayload::Heartbeat(p) => serde_json::to_value(p),
            PacketPayload::Request(p) => serde_json::to_value(p),
            PacketPayload::Response(p) => serde_json::to_value(p),
            PacketPayload::Event(p) => serde_json::to_value(p),
            PacketPayload::Disconnect(p) => serde_json::to_value(p),
        }?;
        if let Value::Object(map) = &mut value {
            map.insert("ver".into(), Value::String(PROTOCOL_VERSION.into()));
            map.insert("sender".into(), Value::String(self.sender.clone()));
        }
        Ok(serde_json::to_vec(&value)?)
    }

    /// Decodes a payload for `ptype`, reading `sender` from the payload body
    /// (the logical origin, independent of transport-level routing).
    pub fn decode(ptype: PacketType, target: Option<String>, bytes: &[u8]) -> Result<Self, TransportError> {
        let payload = match ptype {
            PacketType::Info => PacketPayload::Info(serde_json::from_slice(bytes)?),
            PacketType::Discover => PacketPayload::Discover(serde_json::from_slice(bytes)?),
            PacketType::Heartbeat => PacketPayload::Heartbeat(serde_json::from_slice(bytes)?),
            PacketType::Request => PacketPayload::Request(serde_json::from_slice(bytes)?),
            PacketType::Response => PacketPayload::Response(serde_json::from_slice(bytes)?),
            PacketType::Event => PacketPayload::Event(serde_json::from_slice(bytes)?),
            PacketType::Disconnect => PacketPayload::Disconnect(serde_json::from_slice(bytes)?),
        };
        let sender = match &payload {
            PacketPayload::Info(p) => p.sender.clone(),
            PacketPayload::Discover(p) => p.sender.clone(),
            PacketPayload::Heartbeat(p) => p.sender.clone(),
            PacketPayload::Request(p) => p.sender.clone(),
            PacketPayload::Response(p) => p.sender.clone(),
            PacketPayload::Event(p) => p.sender.clone(),
            PacketPayload::Disconnect(p) => p.sender.clone(),
        };
        Ok(Packet {
            ptype,
            target,
            payload,
            sender,
        })
    }

    pub fn subject(cmd: &str, namespace: &str, target: Option<&str>) -> String {
        let mut subject = if namespace.is_empty() {
            format!("MOL.{cmd}")
        } else {
            format!("{namespace}.MOL.{cmd}")
        };
        if let Some(target) = target {
            subject.push('.');
            subject.push_str(target);
        }
        subject
    }
}
