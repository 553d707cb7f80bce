//! Script sessions and the host-driven boundary entry points.
//!
//! A [`Session`] owns one Luau state together with the engine registry, the
//! host registry, the transaction channel and the proxy caches. Nothing is
//! global: sessions are independent and may coexist.

use crate::codec;
use crate::engine_ref::EngineHandle;
use crate::engine_registry::{EngineRegistry, Release};
use luau_bridge_core::{
    BridgeError, BridgeResult, EngineId, EngineRef, EnvId, Environment, HostId, HostRegistry,
    HostValue, Payload, SessionConfig, SessionId, SlotId, Tag, TransactionChannel, WireValue,
};
use mlua::{Compiler, Function, Lua, MultiValue, RegistryKey, Table, Thread, ThreadStatus, Value};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, info, warn};

static NEXT_SESSION: AtomicU32 = AtomicU32::new(1);

/// Outcome of a protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvokeStatus {
    /// The result slot holds the returned values.
    Ok,
    /// The result slot holds a single string: the error message.
    Error,
}

/// Status plus the slot holding results or the error message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Invocation {
    pub status: InvokeStatus,
    pub slot: SlotId,
}

impl Invocation {
    pub fn is_ok(&self) -> bool {
        self.status == InvokeStatus::Ok
    }
}

/// Shared state behind a [`Session`]. Proxies and engine handles hold it
/// weakly; RefCell borrows are never held across a call into Lua or host code.
pub(crate) struct SessionState {
    pub(crate) id: SessionId,
    pub(crate) env: EnvId,
    pub(crate) config: SessionConfig,
    pub(crate) me: Weak<SessionState>,
    pub(crate) engine: RefCell<EngineRegistry>,
    pub(crate) host: RefCell<HostRegistry>,
    pub(crate) channel: RefCell<TransactionChannel>,
    /// One proxy per host handle, so identity survives repeated crossings.
    pub(crate) proxies: RefCell<HashMap<HostId, RegistryKey>>,
    /// Live host-side wrappers per engine handle.
    pub(crate) views: RefCell<HashMap<EngineId, Weak<EngineHandle>>>,
    /// Environment globals the compiler must not fold into constant imports.
    mutable_globals: Vec<String>,
    /// `debug.traceback` as it was before any script ran.
    traceback: Option<RegistryKey>,
    // Dropped last, after every registry key above.
    pub(crate) lua: Lua,
}

impl SessionState {
    pub(crate) fn reserve(&self, payload: Payload) -> SlotId {
        self.channel.borrow_mut().reserve(payload)
    }

    pub(crate) fn take_values(&self, slot: SlotId) -> Option<Vec<WireValue>> {
        let values = self.channel.borrow_mut().take_values(slot);
        if values.is_none() {
            warn!(session = %self.id, slot = %slot, "missing transaction slot");
        }
        values
    }

    fn take_text(&self, slot: SlotId) -> Option<String> {
        let text = self.channel.borrow_mut().take_text(slot);
        if text.is_none() {
            warn!(session = %self.id, slot = %slot, "missing transaction slot");
        }
        text
    }

    pub(crate) fn resolve(&self, id: EngineId) -> Option<Value> {
        self.engine.borrow().resolve(&self.lua, id)
    }

    fn compiler(&self) -> Compiler {
        Compiler::new()
            .set_optimization_level(self.config.optimization_level)
            .set_debug_level(self.config.debug_level)
            .set_mutable_globals(self.mutable_globals.clone())
    }

    pub(crate) fn load(&self, source_slot: SlotId, chunk_name_slot: SlotId) -> BridgeResult<EngineId> {
        let source = self.take_text(source_slot);
        let chunk_name = self.take_text(chunk_name_slot);
        let source = source.ok_or(BridgeError::MissingSlot(source_slot))?;
        let chunk_name = chunk_name.ok_or(BridgeError::MissingSlot(chunk_name_slot))?;

        let function = self
            .lua
            .load(source)
            .set_name(chunk_name.as_str())
            .set_compiler(self.compiler())
            .into_function()
            .map_err(|err| BridgeError::Compile(error_message(&err)))?;

        let id = self
            .engine
            .borrow_mut()
            .register(&self.lua, &Value::Function(function), Tag::Function)
            .map_err(engine_error)?;
        debug!(session = %self.id, chunk = %chunk_name, handle = %id, "loaded chunk");
        Ok(id)
    }

    pub(crate) fn invoke(&self, handle: EngineId, args_slot: SlotId) -> Invocation {
        let Some(args) = self.take_values(args_slot) else {
            return self.failure(format!("missing transaction slot {args_slot}"));
        };
        let function = match self.resolve(handle) {
            Some(Value::Function(function)) => function,
            Some(other) => {
                return self.failure(format!("attempt to call a {} value", other.type_name()));
            }
            None => {
                warn!(session = %self.id, handle = %handle, "invoke on stale engine handle");
                return self.failure(format!("stale engine handle {handle}"));
            }
        };

        let args: MultiValue = args
            .iter()
            .map(|wire| codec::wire_to_engine(self, wire))
            .collect();

        match self.run(function, args) {
            Ok(results) => {
                let results = results
                    .iter()
                    .map(|value| codec::engine_to_wire(self, value))
                    .collect();
                Invocation {
                    status: InvokeStatus::Ok,
                    slot: self.reserve(Payload::Values(results)),
                }
            }
            Err(message) => {
                debug!(session = %self.id, handle = %handle, error = %message, "script call failed");
                self.failure(message)
            }
        }
    }

    fn failure(&self, message: String) -> Invocation {
        Invocation {
            status: InvokeStatus::Error,
            slot: self.reserve(Payload::Values(vec![WireValue::string(&message)])),
        }
    }

    /// Run `function` on a fresh thread. A thread left suspended counts as an
    /// error.
    fn run(&self, function: Function, args: MultiValue) -> Result<MultiValue, String> {
        let thread = self
            .lua
            .create_thread(function)
            .map_err(|err| error_message(&err))?;

        match thread.resume::<MultiValue>(args) {
            Ok(_) if matches!(thread.status(), ThreadStatus::Resumable) => {
                Err(self.with_backtrace(&thread, "thread yielded unexpectedly".to_string()))
            }
            Ok(results) => Ok(results),
            Err(err) => Err(self.with_backtrace(&thread, error_message(&err))),
        }
    }

    fn with_backtrace(&self, thread: &Thread, message: String) -> String {
        if !self.config.traceback {
            return message;
        }
        match self.traceback(thread) {
            Some(trace) if !trace.trim().is_empty() => {
                format!("{message}\nstack backtrace:\n{}", trace.trim_end())
            }
            _ => message,
        }
    }

    fn traceback(&self, thread: &Thread) -> Option<String> {
        let traceback: Function = self.lua.registry_value(self.traceback.as_ref()?).ok()?;
        traceback.call::<String>(thread.clone()).ok()
    }

    pub(crate) fn index(&self, handle: EngineId, key: &WireValue) -> SlotId {
        let value = self.raw_get(handle, key);
        self.reserve(Payload::Values(vec![value]))
    }

    fn raw_get(&self, handle: EngineId, key: &WireValue) -> WireValue {
        let Some(table) = self.table(handle, "index") else {
            return WireValue::nil();
        };
        let key = codec::wire_to_engine(self, key);
        match table.raw_get::<Value>(key) {
            Ok(value) => codec::engine_to_wire(self, &value),
            Err(err) => {
                warn!(session = %self.id, handle = %handle, error = %err, "raw get failed");
                WireValue::nil()
            }
        }
    }

    pub(crate) fn new_index(&self, handle: EngineId, key: &WireValue, value: &WireValue) -> bool {
        let Some(table) = self.table(handle, "new_index") else {
            return false;
        };
        if table.is_readonly() {
            debug!(session = %self.id, handle = %handle, "refusing write to read-only table");
            return false;
        }

        let key = codec::wire_to_engine(self, key);
        if key.is_nil() {
            warn!(session = %self.id, handle = %handle, "new_index with nil key");
            return false;
        }
        let value = codec::wire_to_engine(self, value);
        match table.raw_set(key, value) {
            Ok(()) => true,
            Err(err) => {
                warn!(session = %self.id, handle = %handle, error = %err, "raw set failed");
                false
            }
        }
    }

    fn table(&self, handle: EngineId, operation: &str) -> Option<Table> {
        match self.resolve(handle) {
            Some(Value::Table(table)) => Some(table),
            Some(other) => {
                warn!(
                    session = %self.id,
                    handle = %handle,
                    operation,
                    kind = other.type_name(),
                    "target is not a table"
                );
                None
            }
            None => {
                warn!(session = %self.id, handle = %handle, operation, "stale engine handle");
                None
            }
        }
    }

    pub(crate) fn clone_handle(&self, handle: EngineId) -> Option<EngineId> {
        let cloned = self.engine.borrow_mut().clone_handle(&self.lua, handle);
        match cloned {
            Ok(Some(id)) => Some(id),
            Ok(None) => {
                warn!(session = %self.id, handle = %handle, "clone of stale engine handle");
                None
            }
            Err(err) => {
                warn!(session = %self.id, handle = %handle, error = %err, "clone failed");
                None
            }
        }
    }

    /// Give the raw-protocol host a hold on every engine handle in `slot`.
    fn hold_slot(&self, slot: SlotId) {
        let ids: Vec<EngineId> = match self.channel.borrow().get(slot) {
            Some(Payload::Values(values)) => values
                .iter()
                .filter(|wire| wire.kind.is_engine_ref())
                .filter_map(WireValue::handle)
                .map(EngineId)
                .collect(),
            _ => return,
        };
        let mut engine = self.engine.borrow_mut();
        for id in ids {
            engine.hold(id);
        }
    }

    fn hold(&self, id: EngineId) {
        self.engine.borrow_mut().hold(id);
    }

    /// Drop the raw-protocol hold on `handle`. Wrappers still alive keep the
    /// value pinned.
    pub(crate) fn release_handle(&self, handle: EngineId) -> bool {
        let released = self.engine.borrow_mut().release(handle);
        match released {
            Release::NotHeld => {
                warn!(session = %self.id, handle = %handle, "release of stale engine handle");
                false
            }
            Release::Kept => true,
            Release::Freed(key) => {
                self.unpin(handle, key);
                true
            }
        }
    }

    /// Drop the guard of a wrapper that is being released.
    pub(crate) fn drop_guard(&self, handle: EngineId) {
        let view = self.views.borrow_mut().remove(&handle);
        drop(view);

        let released = self.engine.borrow_mut().unguard(handle);
        if let Release::Freed(key) = released {
            self.unpin(handle, key);
        }
    }

    fn unpin(&self, handle: EngineId, key: RegistryKey) {
        if let Err(err) = self.lua.remove_registry_value(key) {
            warn!(session = %self.id, handle = %handle, error = %err, "failed to unpin value");
        }
    }

    /// Host-side wrapper for `id`, shared with any wrapper still alive. A new
    /// wrapper takes a guard on the handle.
    pub(crate) fn engine_ref(&self, id: EngineId) -> Option<EngineRef> {
        let cached = self.views.borrow().get(&id).and_then(Weak::upgrade);
        if let Some(handle) = cached {
            return Some(EngineRef::new(handle));
        }

        let kind = self.engine.borrow_mut().guard(id)?;
        let handle = Rc::new(EngineHandle::new(id, kind, self.id, self.me.clone()));
        self.views.borrow_mut().insert(id, Rc::downgrade(&handle));
        Some(EngineRef::new(handle))
    }
}

/// Message carried by an mlua error, without mlua's own decoration.
pub(crate) fn error_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::RuntimeError(message) => match message.rfind("\nstack traceback:") {
            Some(end) => message[..end].to_string(),
            None => message.clone(),
        },
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::CallbackError { cause, .. } => error_message(cause),
        mlua::Error::ExternalError(inner) => inner.to_string(),
        other => other.to_string(),
    }
}

pub(crate) fn engine_error(err: mlua::Error) -> BridgeError {
    BridgeError::Engine(error_message(&err))
}

/// One Luau state and everything needed to exchange values with it.
pub struct Session {
    state: Rc<SessionState>,
}

impl Session {
    /// Session without environment globals.
    pub fn new(config: SessionConfig) -> BridgeResult<Self> {
        Self::create(config, EnvId::NONE, None)
    }

    /// Session whose globals are seeded from `env`.
    pub fn with_environment(
        config: SessionConfig,
        env_id: EnvId,
        env: &Environment,
    ) -> BridgeResult<Self> {
        Self::create(config, env_id, Some(env))
    }

    fn create(config: SessionConfig, env_id: EnvId, env: Option<&Environment>) -> BridgeResult<Self> {
        config.validate()?;
        let id = SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed));
        let lua = Lua::new();
        // Captured before scripts can replace the `debug` global.
        let traceback = lua
            .globals()
            .raw_get::<Table>("debug")
            .and_then(|debug| debug.raw_get::<Function>("traceback"))
            .and_then(|traceback| lua.create_registry_value(traceback))
            .ok();
        let mutable_globals: Vec<String> = env
            .map(|env| env.iter().map(|(name, _)| name.to_string()).collect())
            .unwrap_or_default();

        let state = Rc::new_cyclic(|me| SessionState {
            id,
            env: env_id,
            config,
            me: me.clone(),
            engine: RefCell::new(EngineRegistry::new()),
            host: RefCell::new(HostRegistry::new()),
            channel: RefCell::new(TransactionChannel::new()),
            proxies: RefCell::new(HashMap::new()),
            views: RefCell::new(HashMap::new()),
            mutable_globals,
            traceback,
            lua,
        });

        // Globals go in before sandboxing makes the global table read-only.
        if let Some(env) = env {
            let globals = state.lua.globals();
            for (name, value) in env.iter() {
                let key = WireValue::string(name);
                let wire = codec::host_to_wire(&state, value, None, Some(&key));
                let value = codec::wire_to_engine(&state, &wire);
                globals.raw_set(name, value).map_err(engine_error)?;
            }
        }
        if state.config.sandbox {
            state.lua.sandbox(true).map_err(engine_error)?;
        }

        info!(
            session = %id,
            env = %env_id,
            globals = env.map_or(0, Environment::len),
            sandbox = state.config.sandbox,
            "created script session"
        );
        Ok(Self { state })
    }

    pub fn id(&self) -> SessionId {
        self.state.id
    }

    pub fn env_id(&self) -> EnvId {
        self.state.env
    }

    pub fn config(&self) -> &SessionConfig {
        &self.state.config
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> &SessionState {
        &self.state
    }

    /// Park a payload in the transaction channel.
    pub fn reserve(&self, payload: Payload) -> SlotId {
        self.state.reserve(payload)
    }

    /// Read and delete a slot.
    pub fn take(&self, slot: SlotId) -> Option<Payload> {
        self.state.channel.borrow_mut().take(slot)
    }

    /// Read and delete a slot, JSON-encoded.
    pub fn take_json(&self, slot: SlotId) -> BridgeResult<Option<String>> {
        self.state.channel.borrow_mut().take_json(slot)
    }

    /// Populated transaction slots. Zero between top-level calls.
    pub fn pending_slots(&self) -> usize {
        self.state.channel.borrow().len()
    }

    /// Live engine handles.
    pub fn engine_handles(&self) -> usize {
        self.state.engine.borrow().len()
    }

    /// Live host handles.
    pub fn host_handles(&self) -> usize {
        self.state.host.borrow().len()
    }

    /// Compile the source in `source_slot` under the chunk name in
    /// `chunk_name_slot`. Both slots are consumed. The returned handle must be
    /// released with [`release_handle`](Self::release_handle).
    pub fn load(&self, source_slot: SlotId, chunk_name_slot: SlotId) -> BridgeResult<EngineId> {
        let id = self.state.load(source_slot, chunk_name_slot)?;
        self.state.hold(id);
        Ok(id)
    }

    /// Protected call of a function handle with the arguments in `args_slot`.
    /// Engine handles among the results are held until released.
    pub fn invoke(&self, handle: EngineId, args_slot: SlotId) -> Invocation {
        let invocation = self.state.invoke(handle, args_slot);
        self.state.hold_slot(invocation.slot);
        invocation
    }

    /// Raw `table[key]`; the slot holds exactly one value.
    pub fn index(&self, handle: EngineId, key: &WireValue) -> SlotId {
        let slot = self.state.index(handle, key);
        self.state.hold_slot(slot);
        slot
    }

    /// Raw `table[key] = value`. Returns false when the table is read-only or
    /// the write was otherwise not applied.
    pub fn new_index(&self, handle: EngineId, key: &WireValue, value: &WireValue) -> bool {
        self.state.new_index(handle, key, value)
    }

    pub fn clone_handle(&self, handle: EngineId) -> Option<EngineId> {
        let clone = self.state.clone_handle(handle)?;
        self.state.hold(clone);
        Some(clone)
    }

    pub fn release_handle(&self, handle: EngineId) -> bool {
        self.state.release_handle(handle)
    }

    /// Drop a host handle. Proxies already handed to scripts go stale.
    pub fn release_host_handle(&self, id: HostId) -> bool {
        self.state.release_host(id)
    }

    /// Adopt a raw handle into an RAII wrapper that releases it on drop. The
    /// raw hold passes to the wrapper.
    pub fn engine_ref(&self, handle: EngineId) -> Option<EngineRef> {
        let engine = self.state.engine_ref(handle)?;
        let released = self.state.engine.borrow_mut().release(handle);
        if let Release::Freed(key) = released {
            self.state.unpin(handle, key);
        }
        Some(engine)
    }

    /// Compile `source` into a callable wrapper.
    pub fn compile(&self, source: &str, chunk_name: &str) -> BridgeResult<EngineRef> {
        let source_slot = self.reserve(Payload::Text(source.to_string()));
        let name_slot = self.reserve(Payload::Text(chunk_name.to_string()));
        let id = self.state.load(source_slot, name_slot)?;
        self.state
            .engine_ref(id)
            .ok_or_else(|| BridgeError::StaleHandle(id.to_string()))
    }

    /// Compile and run `source` under the configured chunk name.
    pub fn exec(&self, source: &str) -> BridgeResult<Vec<HostValue>> {
        let chunk = self.compile(source, &self.state.config.chunk_name)?;
        chunk.call(Vec::new())
    }

    /// Tear the session down. Wrappers still held by the host fail with
    /// `SessionClosed` afterwards.
    pub fn close(self) {
        let leaked = self.state.channel.borrow_mut().clear();
        if leaked > 0 {
            warn!(session = %self.state.id, leaked, "closing session with unread transaction slots");
        }
        info!(session = %self.state.id, "closed script session");
    }
}
