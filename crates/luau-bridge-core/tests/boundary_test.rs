//! Integration tests for the host half of the boundary: wire records, the
//! transaction channel, the host registry and environment files.

use luau_bridge_core::wire::{decode_list, encode_list};
use luau_bridge_core::{
    Environment, HostCall, HostObject, HostRegistry, HostValue, MapObject, Payload, SessionConfig,
    SlotId, Tag, TransactionChannel, WireValue,
};
use std::fs;
use std::rc::Rc;
use tempfile::TempDir;

// ============================================================================
// Wire format
// ============================================================================

#[test]
fn test_wire_json_shape() {
    let values = vec![
        WireValue::number(5.0),
        WireValue::string("say \"hi\"\n"),
        WireValue::reference(Tag::HostFunction, 3),
    ];
    let json = encode_list(&values).unwrap();
    assert_eq!(
        json,
        r#"[{"type":"number","value":"5"},{"type":"string","value":"say \\\"hi\\\"\\n"},{"type":"host-function","value":"3"}]"#
    );
    assert_eq!(decode_list(&json).unwrap(), values);
}

#[test]
fn test_unknown_tag_decodes_to_nil() {
    let json = r#"[{"type":"vector","value":"1,2,3"},{"type":"boolean","value":"true"}]"#;
    let values = decode_list(json).unwrap();
    assert_eq!(values, vec![WireValue::nil(), WireValue::boolean(true)]);
}

#[test]
fn test_edge_numbers() {
    for value in [0.0, -0.0, 1e300, 5e-324, f64::INFINITY, f64::NEG_INFINITY, 0.1 + 0.2] {
        let wire = WireValue::number(value);
        let back = wire.as_number().unwrap();
        assert_eq!(back.to_bits(), value.to_bits(), "{wire}");
    }
    assert!(WireValue::number(f64::NAN).as_number().unwrap().is_nan());
}

// ============================================================================
// Transaction channel
// ============================================================================

#[test]
fn test_nested_transactions() {
    let mut channel = TransactionChannel::new();

    let outer = channel.reserve(Payload::Values(vec![WireValue::number(1.0)]));
    let inner = channel.reserve(Payload::Values(vec![WireValue::number(2.0)]));
    assert_ne!(outer, inner);

    assert_eq!(channel.take_values(inner), Some(vec![WireValue::number(2.0)]));
    let reply = channel.reserve(Payload::Text("reply".to_string()));
    assert_ne!(reply, outer);

    assert_eq!(channel.take_text(reply), Some("reply".to_string()));
    assert_eq!(channel.take_values(outer), Some(vec![WireValue::number(1.0)]));
    assert!(channel.is_empty());
    assert_eq!(channel.take(SlotId(0)), None);
}

#[test]
fn test_take_json() {
    let mut channel = TransactionChannel::new();
    let slot = channel.reserve(Payload::Values(vec![WireValue::nil()]));
    assert_eq!(
        channel.take_json(slot).unwrap(),
        Some(r#"[{"type":"nil","value":"nil"}]"#.to_string())
    );
    assert_eq!(channel.take_json(slot).unwrap(), None);
}

// ============================================================================
// Host registry
// ============================================================================

#[test]
fn test_method_keeps_parent() {
    let widget: Rc<MapObject> = Rc::new(MapObject::new("widget").with(
        "describe",
        HostValue::function("describe", |call| {
            Ok(vec![HostValue::from(call.this.is_some())])
        }),
    ));
    let parent = HostValue::Object(widget.clone());
    let describe = widget.get(&"describe".into()).unwrap().unwrap();
    let describe = describe.as_host().unwrap();

    let mut registry = HostRegistry::new();
    let key = WireValue::string("describe");
    let id = registry.register(describe, Tag::HostFunction, Some(&parent), Some(&key));
    assert_eq!(
        registry.register(describe, Tag::HostFunction, Some(&parent), Some(&key)),
        id
    );

    let handle = registry.get(id).unwrap().clone();
    assert_eq!(handle.parent, Some(parent.clone()));
    let call = HostCall {
        this: handle.parent.clone(),
        ..HostCall::new(Vec::new())
    };
    assert_eq!(handle.value.invoke(call).unwrap(), vec![HostValue::Boolean(true)]);

    assert!(registry.release(id).is_some());
    assert!(registry.get(id).is_none());
    let again = registry.register(describe, Tag::HostFunction, Some(&parent), Some(&key));
    assert_ne!(again, id);
}

// ============================================================================
// Files
// ============================================================================

#[test]
fn test_environment_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("env.toml");
    fs::write(
        &path,
        r#"
greeting = "hello"
limit = 3

[player]
name = "ada"
scores = [10, 20]
"#,
    )
    .unwrap();

    let env = Environment::load(&path).unwrap();
    assert_eq!(env.len(), 3);
    assert_eq!(env.get("greeting"), Some(&HostValue::from("hello")));
    assert_eq!(env.get("limit"), Some(&HostValue::Number(3.0)));

    let player = env.get("player").and_then(HostValue::as_host).unwrap();
    assert_eq!(player.get(&"name".into()).unwrap(), Some(HostValue::from("ada")));
    let scores = player.get(&"scores".into()).unwrap().unwrap();
    let scores = scores.as_host().unwrap();
    assert_eq!(scores.get(&HostValue::Number(2.0)).unwrap(), Some(HostValue::Number(20.0)));
}

#[test]
fn test_session_config_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("session.toml");
    fs::write(&path, "sandbox = false\nchunk_name = \"=repl\"\n").unwrap();

    let config = SessionConfig::load(&path).unwrap();
    assert!(!config.sandbox);
    assert_eq!(config.chunk_name, "=repl");
    assert!(config.traceback);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = TempDir::new().unwrap();
    let err = Environment::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, luau_bridge_core::BridgeError::Io(_)));
}
