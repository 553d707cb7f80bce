//! # luau-bridge-core
//!
//! Engine-independent half of the Luau value bridge.
//!
//! This crate provides:
//! - Tagged ids for engine handles, host handles, slots, environments and sessions
//! - The `{type, value}` wire format every value crosses the boundary in
//! - The transaction channel used for composite payloads
//! - The host value model (`HostValue`, `HostObject`, `EngineObject`)
//! - The host-side reference registry with parent/key provenance
//! - Environments and session configuration
//!
//! ## Value Flow
//!
//! A host value is encoded into a [`WireValue`]. Value kinds (nil, booleans,
//! numbers, strings) travel by value; reference kinds are registered in the
//! owning side's registry and travel as a handle id. Lists of wire values are
//! parked in the [`TransactionChannel`] and handed over by slot index.
//!
//! The script-engine half lives in `luau-bridge-runtime`.

pub mod channel;
pub mod config;
pub mod environment;
pub mod error;
pub mod host;
pub mod host_registry;
pub mod ids;
pub mod wire;

pub use channel::{Payload, TransactionChannel};
pub use config::SessionConfig;
pub use environment::{Environment, Environments};
pub use error::{BridgeError, BridgeResult};
pub use host::{
    EngineObject, EngineRef, HostCall, HostError, HostObject, HostRef, HostResult, HostValue,
    MapObject, NativeFunction, PropertyKey,
};
pub use host_registry::{HostHandle, HostRegistry};
pub use ids::{EngineId, EnvId, HostId, SessionId, SlotId};
pub use wire::{Tag, WireValue};
