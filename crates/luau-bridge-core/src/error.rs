//! Error types for the value bridge.

use crate::ids::{EnvId, SlotId};
use thiserror::Error;

/// Errors that can occur while driving the bridge.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Source text failed to compile.
    #[error("Compile error: {0}")]
    Compile(String),

    /// A script-engine call raised or yielded. Displays the bare message so it
    /// can be re-raised unchanged.
    #[error("{0}")]
    Script(String),

    /// A handle was used after release.
    #[error("Stale handle: {0}")]
    StaleHandle(String),

    /// A transaction slot was read twice or never written.
    #[error("Missing transaction slot: {0}")]
    MissingSlot(SlotId),

    /// No environment is registered under the id.
    #[error("Unknown environment: {0}")]
    UnknownEnvironment(EnvId),

    /// The owning session has been closed.
    #[error("Session closed")]
    SessionClosed,

    /// The script engine rejected an internal operation.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration failed validation.
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for bridge operations.
pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
