//! Marshaling between Luau values, wire values and host values.
//!
//! All four conversions are total. Anything that cannot be represented
//! (unsupported engine types, malformed payloads, stale or foreign handles)
//! is logged and becomes nil.

use crate::proxy;
use crate::session::{error_message, SessionState};
use luau_bridge_core::wire::unescape;
use luau_bridge_core::{EngineId, HostId, HostValue, Tag, WireValue};
use mlua::Value;
use tracing::warn;

/// Encode a Luau value, registering reference values in the engine registry.
pub(crate) fn engine_to_wire(state: &SessionState, value: &Value) -> WireValue {
    match value {
        Value::Nil => WireValue::nil(),
        Value::Boolean(b) => WireValue::boolean(*b),
        Value::Integer(i) => WireValue::number(*i as f64),
        Value::Number(n) => WireValue::number(*n),
        Value::String(s) => WireValue::bytes(&s.as_bytes()),
        Value::Table(_) => register(state, value, Tag::Table),
        Value::Function(_) => register(state, value, Tag::Function),
        Value::Thread(_) => register(state, value, Tag::Thread),
        Value::Buffer(_) => register(state, value, Tag::Buffer),
        Value::UserData(userdata) => match proxy::proxy_target(userdata) {
            Some((kind, target)) => WireValue::reference(kind, target.id.get()),
            None => register(state, value, Tag::Userdata),
        },
        Value::Error(err) => WireValue::string(&error_message(err)),
        other => {
            warn!(
                session = %state.id,
                kind = other.type_name(),
                "unsupported script value; marshaling as nil"
            );
            WireValue::nil()
        }
    }
}

/// Encode a key for a host lookup. `None` for key types that cannot cross.
pub(crate) fn engine_key_to_wire(state: &SessionState, key: &Value) -> Option<WireValue> {
    match key {
        Value::Nil
        | Value::Boolean(_)
        | Value::Integer(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Table(_)
        | Value::Function(_)
        | Value::Thread(_)
        | Value::Buffer(_)
        | Value::UserData(_) => Some(engine_to_wire(state, key)),
        _ => None,
    }
}

fn register(state: &SessionState, value: &Value, kind: Tag) -> WireValue {
    let registered = state.engine.borrow_mut().register(&state.lua, value, kind);
    match registered {
        Ok(id) => WireValue::reference(kind, id.get()),
        Err(err) => {
            warn!(session = %state.id, kind = %kind, error = %err, "failed to register script value");
            WireValue::nil()
        }
    }
}

/// Decode into a Luau value. Engine handles resolve through the registry,
/// host handles become proxies.
pub(crate) fn wire_to_engine(state: &SessionState, wire: &WireValue) -> Value {
    match wire.kind {
        Tag::Nil => Value::Nil,
        Tag::Boolean => Value::Boolean(wire.payload == "true"),
        Tag::Number => match wire.as_number() {
            Some(n) => Value::Number(n),
            None => {
                warn!(session = %state.id, payload = %wire.payload, "malformed number payload");
                Value::Nil
            }
        },
        Tag::String => match state.lua.create_string(unescape(&wire.payload)) {
            Ok(s) => Value::String(s),
            Err(err) => {
                warn!(session = %state.id, error = %err, "failed to create string");
                Value::Nil
            }
        },
        Tag::Table | Tag::Function | Tag::Userdata | Tag::Thread | Tag::Buffer => {
            match wire.handle().map(EngineId) {
                Some(id) => resolve_engine(state, id, wire.kind),
                None => {
                    warn!(session = %state.id, value = %wire, "malformed engine handle");
                    Value::Nil
                }
            }
        }
        Tag::HostObject | Tag::HostFunction => match wire.handle().map(HostId) {
            Some(id) => state.host_proxy(id, wire.kind),
            None => {
                warn!(session = %state.id, value = %wire, "malformed host handle");
                Value::Nil
            }
        },
    }
}

fn resolve_engine(state: &SessionState, id: EngineId, kind: Tag) -> Value {
    let registered = state.engine.borrow().kind(id);
    match registered {
        Some(actual) if actual == kind => state.resolve(id).unwrap_or(Value::Nil),
        Some(actual) => {
            warn!(session = %state.id, handle = %id, expected = %kind, actual = %actual, "engine handle kind mismatch");
            Value::Nil
        }
        None => {
            warn!(session = %state.id, handle = %id, "stale engine handle");
            Value::Nil
        }
    }
}

/// Encode a host value. Host references are registered with the parent and
/// key they were reached through.
pub(crate) fn host_to_wire(
    state: &SessionState,
    value: &HostValue,
    parent: Option<&HostValue>,
    key: Option<&WireValue>,
) -> WireValue {
    match value {
        HostValue::Nil => WireValue::nil(),
        HostValue::Boolean(b) => WireValue::boolean(*b),
        HostValue::Number(n) => WireValue::number(*n),
        HostValue::String(s) => WireValue::string(s),
        HostValue::Object(object) => {
            let id = state
                .host
                .borrow_mut()
                .register(object, Tag::HostObject, parent, key);
            WireValue::reference(Tag::HostObject, id.get())
        }
        HostValue::Function(function) => {
            let id = state
                .host
                .borrow_mut()
                .register(function, Tag::HostFunction, parent, key);
            WireValue::reference(Tag::HostFunction, id.get())
        }
        HostValue::Engine(engine) => {
            if engine.owner() != state.id {
                warn!(
                    session = %state.id,
                    owner = %engine.owner(),
                    handle = %engine.id(),
                    "script value belongs to another session"
                );
                return WireValue::nil();
            }
            let live = !engine.is_released() && state.engine.borrow().contains(engine.id());
            if !live {
                warn!(session = %state.id, handle = %engine.id(), "released script value");
                return WireValue::nil();
            }
            WireValue::reference(engine.kind(), engine.id().get())
        }
    }
}

/// Decode into a host value. Engine handles come back as RAII wrappers.
pub(crate) fn wire_to_host(state: &SessionState, wire: &WireValue) -> HostValue {
    match wire.kind {
        Tag::Nil => HostValue::Nil,
        Tag::Boolean => HostValue::Boolean(wire.payload == "true"),
        Tag::Number => match wire.as_number() {
            Some(n) => HostValue::Number(n),
            None => {
                warn!(session = %state.id, payload = %wire.payload, "malformed number payload");
                HostValue::Nil
            }
        },
        Tag::String => HostValue::String(wire.as_string().unwrap_or_default()),
        Tag::Table | Tag::Function | Tag::Userdata | Tag::Thread | Tag::Buffer => {
            let engine = wire.handle().map(EngineId).and_then(|id| state.engine_ref(id));
            match engine {
                Some(engine) => HostValue::Engine(engine),
                None => {
                    warn!(session = %state.id, value = %wire, "stale engine handle");
                    HostValue::Nil
                }
            }
        }
        Tag::HostObject | Tag::HostFunction => {
            let handle = wire
                .handle()
                .map(HostId)
                .and_then(|id| state.host_handle(id))
                .filter(|handle| handle.kind == wire.kind);
            match handle {
                Some(handle) => handle.to_value(),
                None => {
                    warn!(session = %state.id, value = %wire, "stale host handle");
                    HostValue::Nil
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use luau_bridge_core::{MapObject, SessionConfig};
    use mlua::LightUserData;

    fn session() -> Session {
        Session::new(SessionConfig::default()).unwrap()
    }

    #[test]
    fn test_value_kinds_roundtrip_through_engine() {
        let session = session();
        let state = session.state();
        for wire in [
            WireValue::nil(),
            WireValue::boolean(false),
            WireValue::number(-0.0),
            WireValue::number(1e300),
            WireValue::number(f64::NEG_INFINITY),
            WireValue::string("quote \" slash \\ bell \u{7}"),
            WireValue::bytes(&[0xff, 0x00, b'a']),
        ] {
            let value = wire_to_engine(state, &wire);
            assert_eq!(engine_to_wire(state, &value), wire);
        }
    }

    #[test]
    fn test_light_userdata_is_unsupported() {
        let session = session();
        let value = Value::LightUserData(LightUserData(std::ptr::null_mut()));
        assert!(engine_to_wire(session.state(), &value).is_nil());
        assert!(engine_key_to_wire(session.state(), &value).is_none());
    }

    #[test]
    fn test_stale_engine_handle_decodes_to_nil() {
        let session = session();
        let wire = WireValue::reference(Tag::Table, 1234);
        assert!(wire_to_engine(session.state(), &wire).is_nil());
        assert!(wire_to_host(session.state(), &wire).is_nil());
    }

    #[test]
    fn test_host_object_roundtrip_preserves_identity() {
        let session = session();
        let state = session.state();
        let object = HostValue::from(MapObject::new("thing"));

        let wire = host_to_wire(state, &object, None, None);
        assert_eq!(wire.kind, Tag::HostObject);

        let proxy = wire_to_engine(state, &wire);
        assert!(matches!(proxy, Value::UserData(_)));
        assert_eq!(wire_to_engine(state, &wire), proxy);

        let back = engine_to_wire(state, &proxy);
        assert_eq!(back, wire);
        assert_eq!(wire_to_host(state, &back), object);
    }

    #[test]
    fn test_engine_table_wrapper_is_shared() {
        let session = session();
        let state = session.state();
        let table = Value::Table(state.lua.create_table().unwrap());

        let wire = engine_to_wire(state, &table);
        let first = wire_to_host(state, &wire);
        let second = wire_to_host(state, &wire);
        let (HostValue::Engine(a), HostValue::Engine(b)) = (&first, &second) else {
            panic!("expected engine values");
        };
        assert!(a.ptr_eq(b));

        drop(first);
        drop(second);
        assert_eq!(session.engine_handles(), 0);
    }

    #[test]
    fn test_foreign_engine_value_is_rejected() {
        let a = session();
        let b = session();
        let table = Value::Table(a.state().lua.create_table().unwrap());
        let wire = engine_to_wire(a.state(), &table);
        let value = wire_to_host(a.state(), &wire);

        assert!(host_to_wire(b.state(), &value, None, None).is_nil());
    }
}
