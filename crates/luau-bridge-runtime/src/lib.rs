//! # luau-bridge-runtime
//!
//! Luau side of the value bridge.
//!
//! This crate provides:
//! - `Session`: one Luau state plus its registries and transaction channel
//! - The boundary entry points the host uses to drive scripts
//!   (`load`, `invoke`, `index`, `new_index`, `clone_handle`, `release_handle`)
//! - Proxy userdata whose metamethods trampoline back into host objects
//! - RAII `EngineRef` handles for script values held by the host
//! - `Bridge`: the host environment that owns environments and opens sessions
//!
//! ## Re-entrancy
//!
//! Calls are synchronous. A host call into a script may call a host function,
//! which may call back into a script, to any depth. Every hop carries its own
//! transaction slot and no registry borrow is held across a call, so nested
//! hops never observe each other's state.

mod bridge;
mod codec;
mod engine_ref;
mod engine_registry;
mod proxy;
mod session;

pub use bridge::Bridge;
pub use engine_ref::EngineHandle;
pub use engine_registry::{EngineRegistry, Release};
pub use session::{Invocation, InvokeStatus, Session};

pub use luau_bridge_core::*;
