//! RAII wrapper for script values held by the host.

use crate::codec;
use crate::session::SessionState;
use luau_bridge_core::{
    BridgeError, BridgeResult, EngineId, EngineObject, EngineRef, HostValue, Payload, SessionId,
    Tag, WireValue,
};
use std::cell::Cell;
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::trace;

/// Host-side view of one engine handle.
///
/// All [`EngineRef`] clones share one `EngineHandle`; the engine handle is
/// released when the last clone is dropped, or earlier through
/// [`EngineObject::release`]. Once released, or once the session is closed,
/// every operation fails instead of touching the engine.
pub struct EngineHandle {
    id: EngineId,
    kind: Tag,
    owner: SessionId,
    session: Weak<SessionState>,
    released: Cell<bool>,
}

impl EngineHandle {
    pub(crate) fn new(id: EngineId, kind: Tag, owner: SessionId, session: Weak<SessionState>) -> Self {
        Self {
            id,
            kind,
            owner,
            session,
            released: Cell::new(false),
        }
    }

    fn session(&self) -> BridgeResult<Rc<SessionState>> {
        if self.released.get() {
            return Err(BridgeError::StaleHandle(self.id.to_string()));
        }
        self.session.upgrade().ok_or(BridgeError::SessionClosed)
    }

    fn key(&self, state: &SessionState, key: &HostValue) -> WireValue {
        codec::host_to_wire(state, key, None, None)
    }
}

impl EngineObject for EngineHandle {
    fn id(&self) -> EngineId {
        self.id
    }

    fn kind(&self) -> Tag {
        self.kind
    }

    fn owner(&self) -> SessionId {
        self.owner
    }

    fn is_released(&self) -> bool {
        self.released.get()
    }

    fn call(&self, args: Vec<HostValue>) -> BridgeResult<Vec<HostValue>> {
        let state = self.session()?;
        let wires = args
            .iter()
            .map(|arg| codec::host_to_wire(&state, arg, None, None))
            .collect();
        let args_slot = state.reserve(Payload::Values(wires));
        let invocation = state.invoke(self.id, args_slot);
        // Arguments stay alive until the call has decoded them.
        drop(args);

        let results = state
            .take_values(invocation.slot)
            .ok_or(BridgeError::MissingSlot(invocation.slot))?;
        if !invocation.is_ok() {
            let message = results
                .first()
                .and_then(WireValue::as_string)
                .unwrap_or_default();
            return Err(BridgeError::Script(message));
        }
        Ok(results
            .iter()
            .map(|wire| codec::wire_to_host(&state, wire))
            .collect())
    }

    fn get(&self, key: &HostValue) -> BridgeResult<HostValue> {
        let state = self.session()?;
        let key = self.key(&state, key);
        let slot = state.index(self.id, &key);
        let values = state
            .take_values(slot)
            .ok_or(BridgeError::MissingSlot(slot))?;
        Ok(values
            .first()
            .map(|wire| codec::wire_to_host(&state, wire))
            .unwrap_or(HostValue::Nil))
    }

    fn set(&self, key: &HostValue, value: &HostValue) -> BridgeResult<bool> {
        let state = self.session()?;
        let key = self.key(&state, key);
        let value = codec::host_to_wire(&state, value, None, None);
        Ok(state.new_index(self.id, &key, &value))
    }

    fn clone_handle(&self) -> BridgeResult<EngineRef> {
        let state = self.session()?;
        let stale = || BridgeError::StaleHandle(self.id.to_string());
        let id = state.clone_handle(self.id).ok_or_else(stale)?;
        state.engine_ref(id).ok_or_else(stale)
    }

    fn release(&self) {
        if self.released.replace(true) {
            return;
        }
        let Some(state) = self.session.upgrade() else {
            return;
        };
        trace!(session = %self.owner, handle = %self.id, "releasing script value");
        state.drop_guard(self.id);
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("released", &self.released.get())
            .finish()
    }
}
