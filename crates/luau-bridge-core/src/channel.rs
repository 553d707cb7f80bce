//! Single-use side buffer for composite payloads.
//!
//! A boundary call that needs more than a few scalars parks its payload in a
//! slot and passes the slot index instead. The receiver takes the payload,
//! which deletes the slot. Indices are handed out at the current length and
//! only reused once every slot above them has been taken, so a slot is never
//! reused while still populated.

use crate::error::BridgeResult;
use crate::ids::SlotId;
use crate::wire::{encode_list, WireValue};
use tracing::{trace, warn};

/// Contents of one slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Source text, chunk names.
    Text(String),
    /// Argument lists, result lists, index keys and values.
    Values(Vec<WireValue>),
}

impl Payload {
    pub fn to_json(&self) -> BridgeResult<String> {
        match self {
            Payload::Text(text) => Ok(serde_json::to_string(text)?),
            Payload::Values(values) => encode_list(values),
        }
    }
}

#[derive(Debug, Default)]
pub struct TransactionChannel {
    slots: Vec<Option<Payload>>,
    populated: usize,
}

impl TransactionChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Park a payload and return its slot.
    pub fn reserve(&mut self, payload: Payload) -> SlotId {
        let index = self.slots.len();
        self.slots.push(Some(payload));
        self.populated += 1;
        trace!(slot = index, populated = self.populated, "reserved transaction slot");
        SlotId(index as u32)
    }

    /// Remove and return the payload in `slot`.
    /// Look at a slot without consuming it.
    pub fn get(&self, slot: SlotId) -> Option<&Payload> {
        self.slots.get(slot.index())?.as_ref()
    }

    pub fn take(&mut self, slot: SlotId) -> Option<Payload> {
        let payload = self.slots.get_mut(slot.index())?.take()?;
        self.populated -= 1;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        trace!(slot = %slot, populated = self.populated, "took transaction slot");
        Some(payload)
    }

    /// Take a value list. A text payload in the slot is consumed and rejected.
    pub fn take_values(&mut self, slot: SlotId) -> Option<Vec<WireValue>> {
        match self.take(slot)? {
            Payload::Values(values) => Some(values),
            Payload::Text(_) => {
                warn!(slot = %slot, "expected a value list in transaction slot, found text");
                None
            }
        }
    }

    /// Take a text payload. A value list in the slot is consumed and rejected.
    pub fn take_text(&mut self, slot: SlotId) -> Option<String> {
        match self.take(slot)? {
            Payload::Text(text) => Some(text),
            Payload::Values(_) => {
                warn!(slot = %slot, "expected text in transaction slot, found a value list");
                None
            }
        }
    }

    /// Take a payload JSON-encoded.
    pub fn take_json(&mut self, slot: SlotId) -> BridgeResult<Option<String>> {
        self.take(slot).map(|payload| payload.to_json()).transpose()
    }

    /// Number of populated slots.
    pub fn len(&self) -> usize {
        self.populated
    }

    pub fn is_empty(&self) -> bool {
        self.populated == 0
    }

    /// Drop every slot, returning how many were still populated.
    pub fn clear(&mut self) -> usize {
        let leaked = self.populated;
        self.slots.clear();
        self.populated = 0;
        leaked
    }
}
