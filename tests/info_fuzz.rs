//! Property tests for INFO payload decoding: the wire format must tolerate
//! whichever field spelling and optional-field subset a peer sends, since
//! `sender`/`ver` are the only fields this core can assume are present.

use std::collections::HashMap;

use molecular_mesh::{Packet, PacketPayload, PacketType};
use proptest::prelude::*;
use serde_json::{json, Value};

fn expect_info(packet: &Packet) -> &molecular_mesh::InfoPayload {
    match &packet.payload {
        PacketPayload::Info(info) => info,
        other => panic!("expected an INFO payload, got {other:?}"),
    }
}

fn sender_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}".prop_map(|s| s)
}

fn seq_strategy() -> impl Strategy<Value = u64> {
    0u64..10_000
}

/// Builds a raw INFO JSON body using either the canonical camelCase spelling
/// or the legacy snake_case alias for every field that has one, and omits a
/// random subset of fields that carry `#[serde(default)]` on the struct.
fn arbitrary_info_json() -> impl Strategy<Value = Value> {
    (
        sender_strategy(),
        seq_strategy(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(sender, seq, use_ip_alias, use_instance_alias, include_hostname, include_port)| {
            let mut obj = serde_json::Map::new();
            obj.insert("sender".into(), json!(sender));
            obj.insert("ver".into(), json!("4"));
            obj.insert("seq".into(), json!(seq));
            obj.insert("services".into(), json!([]));

            if use_ip_alias {
                obj.insert("ip_list".into(), json!(["127.0.0.1"]));
            } else {
                obj.insert("ipList".into(), json!(["127.0.0.1"]));
            }

            if use_instance_alias {
                obj.insert("instance_id".into(), json!("abc-123"));
            } else {
                obj.insert("instanceID".into(), json!("abc-123"));
            }

            if include_hostname {
                obj.insert("hostname".into(), json!("host-1"));
            }
            if include_port {
                obj.insert("port".into(), json!(12345));
            }

            Value::Object(obj)
        })
}

proptest! {
    /// Any INFO body carrying only `sender`/`ver`/`seq` plus either field
    /// spelling for the aliased fields must decode, and the decoded
    /// `sender`/`seq` must round-trip exactly regardless of which alias or
    /// optional-field subset was used.
    #[test]
    fn info_decodes_regardless_of_field_spelling(raw in arbitrary_info_json()) {
        let sender = raw["sender"].as_str().unwrap().to_string();
        let seq = raw["seq"].as_u64().unwrap();
        let bytes = serde_json::to_vec(&raw).unwrap();

        let packet = Packet::decode(PacketType::Info, None, &bytes)
            .expect("INFO with only sender/ver required must always decode");

        let info = expect_info(&packet);

        prop_assert_eq!(&info.sender, &sender);
        prop_assert_eq!(info.seq, seq);
        prop_assert_eq!(info.ip_list.clone(), vec!["127.0.0.1".to_string()]);
        prop_assert_eq!(info.instance_id.as_deref(), Some("abc-123"));
    }

    /// Unknown extra fields a newer peer might send must never break
    /// decoding of a current-core consumer.
    #[test]
    fn info_ignores_unknown_extra_fields(raw in arbitrary_info_json(), extra_key in "[a-zA-Z]{3,10}") {
        let mut obj = raw.as_object().unwrap().clone();
        obj.insert(extra_key, json!("some-future-field"));
        let bytes = serde_json::to_vec(&Value::Object(obj)).unwrap();

        let decoded = Packet::decode(PacketType::Info, None, &bytes);
        prop_assert!(decoded.is_ok());
    }
}

#[test]
fn info_without_any_optional_fields_still_decodes_with_defaults() {
    let raw: HashMap<&str, Value> = HashMap::from([("sender", json!("bare-node")), ("ver", json!("4"))]);
    let bytes = serde_json::to_vec(&raw).unwrap();

    let packet = Packet::decode(PacketType::Info, None, &bytes).unwrap();
    let info = expect_info(&packet);

    assert_eq!(info.sender, "bare-node");
    assert_eq!(info.seq, 0);
    assert!(info.ip_list.is_empty());
    assert!(info.services.is_empty());
    assert!(info.available);
}
