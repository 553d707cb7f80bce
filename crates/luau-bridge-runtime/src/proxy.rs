//! Proxies for host values inside Luau, and the trampolines behind them.
//!
//! A host object crosses into Luau as a `HostObject` userdata; a host
//! function as a `HostFunction` userdata, the only kind with `__call`. Both
//! carry the host id and a weak link to their session. Each metamethod is a
//! Rust trampoline that returns `(ok, ...)`, wrapped in a small Luau function
//! that re-raises `error(message, 0)`, so scripts see exactly the host's
//! error text instead of a wrapped callback error.

use crate::codec;
use crate::session::{InvokeStatus, SessionState};
use luau_bridge_core::{HostCall, HostHandle, HostId, HostValue, Payload, SlotId, Tag, WireValue};
use mlua::{
    AnyUserData, FromLuaMulti, Function, Lua, MetaMethod, MultiValue, UserData, UserDataFields,
    UserDataMethods, Value,
};
use std::rc::Weak;
use tracing::{debug, warn};

const RAISE_SHIM: &str = r#"
local trampoline = ...
local error, pack, unpack = error, table.pack, table.unpack
return function(...)
    local result = pack(trampoline(...))
    if result[1] then
        return unpack(result, 2, result.n)
    end
    error(result[2], 0)
end
"#;

#[derive(Clone)]
pub(crate) struct ProxyTarget {
    pub(crate) id: HostId,
    session: Weak<SessionState>,
}

pub(crate) struct HostObjectProxy(ProxyTarget);

pub(crate) struct HostFunctionProxy(ProxyTarget);

impl UserData for HostObjectProxy {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_meta_field("__type", "HostObject");
        fields.add_meta_field_with("__index", |lua| raising(lua, index_trampoline));
        fields.add_meta_field_with("__newindex", |lua| raising(lua, new_index_trampoline));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("HostObject: {}", this.0.id))
        });
    }
}

impl UserData for HostFunctionProxy {
    fn add_fields<F: UserDataFields<Self>>(fields: &mut F) {
        fields.add_meta_field("__type", "HostFunction");
        fields.add_meta_field_with("__index", |lua| raising(lua, index_trampoline));
        fields.add_meta_field_with("__newindex", |lua| raising(lua, new_index_trampoline));
        fields.add_meta_field_with("__call", |lua| raising(lua, call_trampoline));
    }

    fn add_methods<M: UserDataMethods<Self>>(methods: &mut M) {
        methods.add_meta_method(MetaMethod::ToString, |_, this, ()| {
            Ok(format!("HostFunction: {}", this.0.id))
        });
    }
}

/// Host id behind a proxy, or `None` for any other userdata.
pub(crate) fn proxy_target(userdata: &AnyUserData) -> Option<(Tag, ProxyTarget)> {
    if let Ok(proxy) = userdata.borrow::<HostObjectProxy>() {
        return Some((Tag::HostObject, proxy.0.clone()));
    }
    if let Ok(proxy) = userdata.borrow::<HostFunctionProxy>() {
        return Some((Tag::HostFunction, proxy.0.clone()));
    }
    None
}

fn raising<F, A>(lua: &Lua, trampoline: F) -> mlua::Result<Function>
where
    F: Fn(&Lua, A) -> mlua::Result<MultiValue> + 'static,
    A: FromLuaMulti,
{
    let trampoline = lua.create_function(trampoline)?;
    lua.load(RAISE_SHIM)
        .set_name("=trampoline")
        .call::<Function>(trampoline)
}

/// `(true, values...)` or `(false, message)` for the raise shim.
fn reply(lua: &Lua, outcome: Result<Vec<Value>, String>) -> mlua::Result<MultiValue> {
    let values = match outcome {
        Ok(values) => std::iter::once(Value::Boolean(true)).chain(values).collect(),
        Err(message) => vec![
            Value::Boolean(false),
            Value::String(lua.create_string(&message)?),
        ],
    };
    Ok(MultiValue::from_vec(values))
}

fn target(proxy: &AnyUserData) -> mlua::Result<ProxyTarget> {
    proxy_target(proxy)
        .map(|(_, target)| target)
        .ok_or(mlua::Error::UserDataTypeMismatch)
}

pub(crate) fn index_trampoline(lua: &Lua, (proxy, key): (AnyUserData, Value)) -> mlua::Result<MultiValue> {
    let target = target(&proxy)?;
    let Some(state) = target.session.upgrade() else {
        return reply(lua, Ok(Vec::new()));
    };
    let Some(key) = codec::engine_key_to_wire(&state, &key) else {
        warn!(
            session = %state.id,
            host = %target.id,
            kind = key.type_name(),
            "unsupported key type for host index"
        );
        return reply(lua, Ok(Vec::new()));
    };

    match state.host_get(target.id, &key) {
        Some(host_reply) => state.receive(lua, host_reply),
        None => reply(lua, Ok(Vec::new())),
    }
}

fn new_index_trampoline(
    lua: &Lua,
    (proxy, key, value): (AnyUserData, Value, Value),
) -> mlua::Result<MultiValue> {
    let target = target(&proxy)?;
    let Some(state) = target.session.upgrade() else {
        return reply(lua, Ok(Vec::new()));
    };
    let Some(key) = codec::engine_key_to_wire(&state, &key) else {
        warn!(
            session = %state.id,
            host = %target.id,
            kind = key.type_name(),
            "unsupported key type for host assignment"
        );
        return reply(lua, Ok(Vec::new()));
    };
    let value = codec::engine_to_wire(&state, &value);

    let outcome = match state.host_set(target.id, &key, &value) {
        Some(message) => Err(message),
        None => Ok(Vec::new()),
    };
    reply(lua, outcome)
}

fn call_trampoline(lua: &Lua, (proxy, args): (AnyUserData, MultiValue)) -> mlua::Result<MultiValue> {
    let target = target(&proxy)?;
    let Some(state) = target.session.upgrade() else {
        return reply(lua, Ok(Vec::new()));
    };

    let args = args
        .iter()
        .map(|arg| codec::engine_to_wire(&state, arg))
        .collect();
    let slot = state.reserve(Payload::Values(args));
    let host_reply = state.host_call(target.id, slot);
    state.receive(lua, host_reply)
}

/// Host half of a trampoline hop. `retained` keeps the encoded host values
/// (and any engine wrappers among them) alive until the engine half has
/// decoded the slot.
pub(crate) struct HostReply {
    status: InvokeStatus,
    slot: SlotId,
    retained: Vec<HostValue>,
}

impl SessionState {
    pub(crate) fn host_handle(&self, id: HostId) -> Option<HostHandle> {
        self.host.borrow().get(id).cloned()
    }

    /// Cached proxy for a host handle, created on first use.
    pub(crate) fn host_proxy(&self, id: HostId, kind: Tag) -> Value {
        let cached = self
            .proxies
            .borrow()
            .get(&id)
            .map(|key| self.lua.registry_value::<Value>(key));
        if let Some(Ok(proxy)) = cached {
            return proxy;
        }

        let registered = self.host.borrow().get(id).map(|handle| handle.kind);
        match registered {
            Some(actual) if actual == kind => {}
            Some(actual) => {
                warn!(session = %self.id, host = %id, expected = %kind, actual = %actual, "host handle kind mismatch");
                return Value::Nil;
            }
            None => {
                warn!(session = %self.id, host = %id, "stale host handle");
                return Value::Nil;
            }
        }

        let target = ProxyTarget {
            id,
            session: self.me.clone(),
        };
        let created = match kind {
            Tag::HostFunction => self.lua.create_userdata(HostFunctionProxy(target)),
            _ => self.lua.create_userdata(HostObjectProxy(target)),
        };
        let proxy = match created {
            Ok(proxy) => proxy,
            Err(err) => {
                warn!(session = %self.id, host = %id, error = %err, "failed to create proxy");
                return Value::Nil;
            }
        };
        match self.lua.create_registry_value(proxy.clone()) {
            Ok(key) => {
                self.proxies.borrow_mut().insert(id, key);
            }
            Err(err) => {
                warn!(session = %self.id, host = %id, error = %err, "failed to cache proxy");
            }
        }
        Value::UserData(proxy)
    }

    pub(crate) fn release_host(&self, id: HostId) -> bool {
        let handle = self.host.borrow_mut().release(id);
        let proxy = self.proxies.borrow_mut().remove(&id);
        if let Some(key) = proxy {
            if let Err(err) = self.lua.remove_registry_value(key) {
                warn!(session = %self.id, host = %id, error = %err, "failed to drop cached proxy");
            }
        }
        match handle {
            Some(handle) => {
                drop(handle);
                true
            }
            None => {
                warn!(session = %self.id, host = %id, "release of stale host handle");
                false
            }
        }
    }

    fn host_reply(&self, status: InvokeStatus, values: Vec<HostValue>) -> HostReply {
        let wires = values
            .iter()
            .map(|value| codec::host_to_wire(self, value, None, None))
            .collect();
        HostReply {
            status,
            slot: self.reserve(Payload::Values(wires)),
            retained: values,
        }
    }

    fn host_error(&self, message: String) -> HostReply {
        self.host_reply(InvokeStatus::Error, vec![HostValue::String(message)])
    }

    /// Call a host function with the arguments parked in `args_slot`,
    /// binding the handle's parent as `this`.
    fn host_call(&self, id: HostId, args_slot: SlotId) -> HostReply {
        let args = self.take_values(args_slot).unwrap_or_default();
        let args = args
            .iter()
            .map(|wire| codec::wire_to_host(self, wire))
            .collect();

        let Some(handle) = self.host_handle(id) else {
            warn!(session = %self.id, host = %id, "call through stale host handle");
            return self.host_reply(InvokeStatus::Ok, Vec::new());
        };
        let call = HostCall {
            this: handle.parent.clone(),
            args,
            env: self.env,
        };
        match handle.value.invoke(call) {
            Ok(results) => self.host_reply(InvokeStatus::Ok, results),
            Err(err) => {
                debug!(session = %self.id, host = %id, error = %err, "host function raised");
                self.host_error(err.message().to_string())
            }
        }
    }

    /// `object[key]` on the host. `None` when the property is absent.
    fn host_get(&self, id: HostId, key: &WireValue) -> Option<HostReply> {
        let host_key = codec::wire_to_host(self, key);
        let Some(handle) = self.host_handle(id) else {
            warn!(session = %self.id, host = %id, "index through stale host handle");
            return None;
        };

        match handle.value.get(&host_key) {
            Ok(Some(value)) => {
                let parent = handle.to_value();
                let wire = codec::host_to_wire(self, &value, Some(&parent), Some(key));
                Some(HostReply {
                    status: InvokeStatus::Ok,
                    slot: self.reserve(Payload::Values(vec![wire])),
                    retained: vec![value],
                })
            }
            Ok(None) => None,
            Err(err) => Some(self.host_error(err.message().to_string())),
        }
    }

    /// `object[key] = value` on the host. Returns the host error, if any.
    fn host_set(&self, id: HostId, key: &WireValue, value: &WireValue) -> Option<String> {
        let host_key = codec::wire_to_host(self, key);
        let host_value = codec::wire_to_host(self, value);
        let Some(handle) = self.host_handle(id) else {
            warn!(session = %self.id, host = %id, "assignment through stale host handle");
            return None;
        };
        handle
            .value
            .set(&host_key, host_value)
            .err()
            .map(|err| err.message().to_string())
    }

    /// Engine half of a trampoline hop: decode the reply slot into Luau.
    fn receive(&self, lua: &Lua, host_reply: HostReply) -> mlua::Result<MultiValue> {
        let wires = self.take_values(host_reply.slot).unwrap_or_default();
        let outcome = match host_reply.status {
            InvokeStatus::Ok => Ok(wires
                .iter()
                .map(|wire| codec::wire_to_engine(self, wire))
                .collect()),
            InvokeStatus::Error => Err(wires
                .first()
                .and_then(WireValue::as_string)
                .unwrap_or_default()),
        };
        drop(host_reply.retained);
        reply(lua, outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use luau_bridge_core::{EnvId, Environment, MapObject, SessionConfig};

    fn session_with(env: Environment) -> Session {
        Session::with_environment(SessionConfig::default(), EnvId(1), &env).unwrap()
    }

    fn object_proxy(session: &Session) -> AnyUserData {
        let globals = session.state().lua.globals();
        match globals.get::<Value>("obj").unwrap() {
            Value::UserData(proxy) => proxy,
            other => panic!("expected proxy, got {other:?}"),
        }
    }

    #[test]
    fn test_absent_vs_nil() {
        let env = Environment::new().with("obj", MapObject::new("obj").with("present", HostValue::Nil));
        let session = session_with(env);
        let lua = &session.state().lua;
        let proxy = object_proxy(&session);

        let present = index_trampoline(lua, (proxy.clone(), Value::String(lua.create_string("present").unwrap()))).unwrap();
        assert_eq!(present.len(), 2);
        assert_eq!(present[0], Value::Boolean(true));
        assert!(present[1].is_nil());

        let absent = index_trampoline(lua, (proxy, Value::String(lua.create_string("missing").unwrap()))).unwrap();
        assert_eq!(absent.len(), 1);
        assert_eq!(session.pending_slots(), 0);
    }

    #[test]
    fn test_proxy_typeof_and_tostring() {
        let env = Environment::new()
            .with("obj", MapObject::new("obj"))
            .with("f", HostValue::function("f", |_| Ok(Vec::new())));
        let session = session_with(env);
        let results = session
            .exec("return typeof(obj), typeof(f), type(f), string.sub(tostring(f), 1, 13)")
            .unwrap();
        assert_eq!(
            results,
            vec![
                HostValue::from("HostObject"),
                HostValue::from("HostFunction"),
                HostValue::from("userdata"),
                HostValue::from("HostFunction:"),
            ]
        );
    }

    #[test]
    fn test_host_object_is_not_callable() {
        let env = Environment::new().with("obj", MapObject::new("obj"));
        let session = session_with(env);
        let err = session.exec("return obj()").unwrap_err();
        assert!(err.to_string().contains("attempt to call"));
    }

    #[test]
    fn test_assignment_through_proxy() {
        let map = std::rc::Rc::new(MapObject::new("settings"));
        let env = Environment::new().with("settings", HostValue::Object(map.clone()));
        let session = session_with(env);

        session.exec("settings.volume = 11").unwrap();
        assert_eq!(
            map.property(&"volume".into()),
            Some(HostValue::Number(11.0))
        );
    }

    #[test]
    fn test_assignment_to_frozen_object_raises() {
        let env = Environment::new().with("consts", MapObject::new("consts").frozen());
        let session = session_with(env);
        let results = session
            .exec("local ok, err = pcall(function() consts.x = 1 end) return ok, err")
            .unwrap();
        assert_eq!(
            results,
            vec![
                HostValue::Boolean(false),
                HostValue::from("attempt to modify frozen consts"),
            ]
        );
    }
}
