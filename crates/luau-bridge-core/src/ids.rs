//! Tagged integer ids.
//!
//! Every namespace gets its own newtype so an engine handle can never be
//! resolved through the host registry (or the other way round). All ids
//! display as the bare integer, which is also their wire payload.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! tagged_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u32);

        impl $name {
            /// The raw integer.
            pub fn get(self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

tagged_id!(
    /// Handle for a script-engine reference value held by the engine registry.
    EngineId
);
tagged_id!(
    /// Handle for a host object or function exposed to the script engine.
    HostId
);
tagged_id!(
    /// Index into the transaction channel.
    SlotId
);
tagged_id!(
    /// Host environment whose globals are injected into a session.
    EnvId
);
tagged_id!(
    /// Identifies one script session.
    SessionId
);

impl EnvId {
    /// No environment.
    pub const NONE: EnvId = EnvId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl SlotId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_bare_integer() {
        assert_eq!(EngineId(42).to_string(), "42");
        assert_eq!(HostId(7).to_string(), "7");
    }

    #[test]
    fn test_env_none() {
        assert!(EnvId::NONE.is_none());
        assert!(!EnvId(3).is_none());
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&SlotId(5)).unwrap();
        assert_eq!(json, "5");
        let id: HostId = serde_json::from_str("9").unwrap();
        assert_eq!(id, HostId(9));
    }
}
