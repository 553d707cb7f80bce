//! Registry of script values held on behalf of the host.
//!
//! Each entry pins its value in the Lua registry so the collector cannot
//! reclaim it until every hold on the handle is gone. An entry has two kinds
//! of hold: the raw hold of a host that received the id through a boundary
//! call and must release it explicitly, and one guard per live host-side
//! wrapper. Values are deduplicated by address: the same table crossing
//! twice yields the same id while the entry is live. Clones get a fresh id
//! that is not part of the identity map, so releasing one never invalidates
//! the other.

use luau_bridge_core::{EngineId, Tag};
use mlua::{Lua, RegistryKey, Value};
use std::collections::HashMap;
use tracing::{debug, trace};

struct Entry {
    key: RegistryKey,
    kind: Tag,
    identity: usize,
    raw: bool,
    guards: u32,
}

/// Result of dropping one hold on an entry.
#[derive(Debug)]
pub enum Release {
    /// The hold did not exist.
    NotHeld,
    /// Other holds keep the entry alive.
    Kept,
    /// Last hold gone. The key should be removed from the Lua registry by the
    /// caller.
    Freed(RegistryKey),
}

/// Engine-side reference registry.
pub struct EngineRegistry {
    next_id: u32,
    entries: HashMap<EngineId, Entry>,
    identities: HashMap<usize, EngineId>,
}

impl EngineRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
            identities: HashMap::new(),
        }
    }

    /// Register `value` or return the id it already has. A new entry starts
    /// without holds; whoever consumes the id must [`hold`](Self::hold) or
    /// [`guard`](Self::guard) it.
    pub fn register(&mut self, lua: &Lua, value: &Value, kind: Tag) -> mlua::Result<EngineId> {
        let identity = value.to_pointer() as usize;
        if let Some(&id) = self.identities.get(&identity) {
            return Ok(id);
        }

        let key = lua.create_registry_value(value.clone())?;
        let id = self.insert(key, kind, identity);
        self.identities.insert(identity, id);
        trace!(id = %id, kind = %kind, "registered engine handle");
        Ok(id)
    }

    /// Second, independently releasable handle to the value behind `id`.
    pub fn clone_handle(&mut self, lua: &Lua, id: EngineId) -> mlua::Result<Option<EngineId>> {
        let Some(entry) = self.entries.get(&id) else {
            return Ok(None);
        };
        let value: Value = lua.registry_value(&entry.key)?;
        let (kind, identity) = (entry.kind, entry.identity);

        let key = lua.create_registry_value(value)?;
        let clone = self.insert(key, kind, identity);
        trace!(id = %id, clone = %clone, "cloned engine handle");
        Ok(Some(clone))
    }

    pub fn resolve(&self, lua: &Lua, id: EngineId) -> Option<Value> {
        let entry = self.entries.get(&id)?;
        lua.registry_value(&entry.key).ok()
    }

    pub fn kind(&self, id: EngineId) -> Option<Tag> {
        self.entries.get(&id).map(|entry| entry.kind)
    }

    pub fn contains(&self, id: EngineId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Give the raw-protocol host a hold on `id`. Repeated crossings of the
    /// same value share one hold.
    pub fn hold(&mut self, id: EngineId) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.raw = true;
                true
            }
            None => false,
        }
    }

    /// Add a wrapper guard. Returns the kind, or `None` for an unknown id.
    pub fn guard(&mut self, id: EngineId) -> Option<Tag> {
        let entry = self.entries.get_mut(&id)?;
        entry.guards += 1;
        Some(entry.kind)
    }

    /// Drop the raw hold on `id`.
    pub fn release(&mut self, id: EngineId) -> Release {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.raw => {
                entry.raw = false;
                self.collect(id)
            }
            _ => Release::NotHeld,
        }
    }

    /// Drop one wrapper guard on `id`.
    pub fn unguard(&mut self, id: EngineId) -> Release {
        match self.entries.get_mut(&id) {
            Some(entry) if entry.guards > 0 => {
                entry.guards -= 1;
                self.collect(id)
            }
            _ => Release::NotHeld,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn collect(&mut self, id: EngineId) -> Release {
        let held = self
            .entries
            .get(&id)
            .is_some_and(|entry| entry.raw || entry.guards > 0);
        if held {
            return Release::Kept;
        }
        let Some(entry) = self.entries.remove(&id) else {
            return Release::NotHeld;
        };
        if self.identities.get(&entry.identity) == Some(&id) {
            self.identities.remove(&entry.identity);
        }
        debug!(id = %id, kind = %entry.kind, "released engine handle");
        Release::Freed(entry.key)
    }

    fn insert(&mut self, key: RegistryKey, kind: Tag, identity: usize) -> EngineId {
        let id = EngineId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                key,
                kind,
                identity,
                raw: false,
                guards: 0,
            },
        );
        id
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::new()
    }
}
