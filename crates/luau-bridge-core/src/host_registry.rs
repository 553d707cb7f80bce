//! Registry of host values exposed to the script engine.
//!
//! Each entry remembers the parent it was read from and the key used, so a
//! later call through the proxy can bind the parent as `this`. The reverse
//! map is keyed by `(value, parent)` identity: the same object reached
//! through the same parent always gets the same id while it is registered.

use crate::host::{HostRef, HostValue};
use crate::ids::HostId;
use crate::wire::{Tag, WireValue};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{debug, trace};

/// One registered host value.
#[derive(Clone)]
pub struct HostHandle {
    pub id: HostId,
    /// `HostObject` or `HostFunction`.
    pub kind: Tag,
    pub value: HostRef,
    /// Value the handle was reached through.
    pub parent: Option<HostValue>,
    /// Key used on `parent`.
    pub key: Option<WireValue>,
}

impl HostHandle {
    /// The registered value as a [`HostValue`] of the right kind.
    pub fn to_value(&self) -> HostValue {
        match self.kind {
            Tag::HostFunction => HostValue::Function(Rc::clone(&self.value)),
            _ => HostValue::Object(Rc::clone(&self.value)),
        }
    }
}

type Identity = (usize, usize);

/// Host-side reference registry.
pub struct HostRegistry {
    next_id: u32,
    handles: HashMap<HostId, HostHandle>,
    reverse: HashMap<Identity, HostId>,
}

impl HostRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            next_id: 1,
            handles: HashMap::new(),
            reverse: HashMap::new(),
        }
    }

    /// Register `value`, reusing the id of an earlier crossing through the
    /// same parent.
    pub fn register(
        &mut self,
        value: &HostRef,
        kind: Tag,
        parent: Option<&HostValue>,
        key: Option<&WireValue>,
    ) -> HostId {
        let identity = (address(value), parent.map_or(0, value_address));
        if let Some(&id) = self.reverse.get(&identity) {
            return id;
        }

        let id = HostId(self.next_id);
        self.next_id += 1;
        self.handles.insert(
            id,
            HostHandle {
                id,
                kind,
                value: Rc::clone(value),
                parent: parent.cloned(),
                key: key.cloned(),
            },
        );
        self.reverse.insert(identity, id);
        trace!(id = %id, kind = %kind, "registered host handle");
        id
    }

    pub fn get(&self, id: HostId) -> Option<&HostHandle> {
        self.handles.get(&id)
    }

    pub fn contains(&self, id: HostId) -> bool {
        self.handles.contains_key(&id)
    }

    /// Drop the handle and its reverse mapping. The id is never handed out
    /// again.
    pub fn release(&mut self, id: HostId) -> Option<HostHandle> {
        let handle = self.handles.remove(&id)?;
        let identity = (
            address(&handle.value),
            handle.parent.as_ref().map_or(0, value_address),
        );
        if self.reverse.get(&identity) == Some(&id) {
            self.reverse.remove(&identity);
        }
        debug!(id = %id, "released host handle");
        Some(handle)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn address(value: &HostRef) -> usize {
    Rc::as_ptr(value) as *const () as usize
}

fn value_address(value: &HostValue) -> usize {
    value.as_host().map_or(0, address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MapObject;

    fn object(name: &str) -> HostRef {
        Rc::new(MapObject::new(name))
    }

    #[test]
    fn test_same_identity_same_id() {
        let mut registry = HostRegistry::new();
        let value = object("a");
        let first = registry.register(&value, Tag::HostObject, None, None);
        let second = registry.register(&value, Tag::HostObject, None, None);
        assert_eq!(first, second);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_parent_distinguishes_handles() {
        let mut registry = HostRegistry::new();
        let method = object("method");
        let left = HostValue::Object(object("left"));
        let right = HostValue::Object(object("right"));
        let key = WireValue::string("m");

        let a = registry.register(&method, Tag::HostFunction, Some(&left), Some(&key));
        let b = registry.register(&method, Tag::HostFunction, Some(&right), Some(&key));
        assert_ne!(a, b);
        assert_eq!(registry.get(a).unwrap().parent.as_ref(), Some(&left));
        assert_eq!(registry.get(b).unwrap().key.as_ref(), Some(&key));
    }

    #[test]
    fn test_release_is_terminal() {
        let mut registry = HostRegistry::new();
        let value = object("a");
        let id = registry.register(&value, Tag::HostObject, None, None);

        assert!(registry.release(id).is_some());
        assert!(registry.release(id).is_none());
        assert!(!registry.contains(id));

        let fresh = registry.register(&value, Tag::HostObject, None, None);
        assert_ne!(fresh, id);
    }

    #[test]
    fn test_to_value_keeps_kind() {
        let mut registry = HostRegistry::new();
        let value = object("f");
        let id = registry.register(&value, Tag::HostFunction, None, None);
        assert!(matches!(
            registry.get(id).unwrap().to_value(),
            HostValue::Function(_)
        ));
    }
}
