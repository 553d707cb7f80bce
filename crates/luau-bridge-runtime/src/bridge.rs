//! # Bridge
//!
//! The host environment: owns the registered environments and opens
//! sessions against them.
//!
//! Sessions copy an environment's globals when they are created, so removing
//! or re-registering an environment never affects sessions already open.

use crate::session::Session;
use luau_bridge_core::{BridgeError, BridgeResult, EnvId, Environment, Environments, SessionConfig};
use tracing::info;

/// Factory for script sessions.
///
/// # Example
///
/// ```no_run
/// use luau_bridge_runtime::{Bridge, Environment, HostValue};
///
/// let mut bridge = Bridge::default();
/// let env = bridge.register_environment(
///     Environment::new().with("greeting", HostValue::from("hello")),
/// );
/// let session = bridge.create_session(env).unwrap();
/// let results = session.exec("return greeting").unwrap();
/// println!("{}", results[0]);
/// ```
pub struct Bridge {
    config: SessionConfig,
    environments: Environments,
}

impl Bridge {
    /// Create a bridge whose sessions use `config`.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            environments: Environments::new(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Register an environment and return its id.
    pub fn register_environment(&mut self, env: Environment) -> EnvId {
        self.environments.register(env)
    }

    pub fn remove_environment(&mut self, id: EnvId) -> Option<Environment> {
        self.environments.remove(id)
    }

    pub fn environments(&self) -> &Environments {
        &self.environments
    }

    /// Open a session. [`EnvId::NONE`] gives a session with no host globals.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::UnknownEnvironment`] when `env` was never
    /// registered or has been removed.
    pub fn create_session(&self, env: EnvId) -> BridgeResult<Session> {
        if env.is_none() {
            return Session::new(self.config.clone());
        }
        let environment = self
            .environments
            .get(env)
            .ok_or(BridgeError::UnknownEnvironment(env))?;
        Session::with_environment(self.config.clone(), env, environment)
    }

    /// Close a session, logging any slots it leaked.
    pub fn close_session(&self, session: Session) {
        let id = session.id();
        session.close();
        info!(session = %id, "session closed by bridge");
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luau_bridge_core::HostValue;

    #[test]
    fn test_create_session_without_environment() {
        let bridge = Bridge::default();
        let session = bridge.create_session(EnvId::NONE).unwrap();
        assert_eq!(session.env_id(), EnvId::NONE);
        assert_eq!(session.exec("return 1 + 1").unwrap(), vec![HostValue::Number(2.0)]);
    }

    #[test]
    fn test_unknown_environment() {
        let bridge = Bridge::default();
        let err = bridge.create_session(EnvId(9)).err().unwrap();
        assert!(matches!(err, BridgeError::UnknownEnvironment(EnvId(9))));
    }

    #[test]
    fn test_sessions_are_independent() {
        let mut bridge = Bridge::default();
        let env = bridge.register_environment(Environment::new().with("base", 10));
        let a = bridge.create_session(env).unwrap();
        let b = bridge.create_session(env).unwrap();
        assert_ne!(a.id(), b.id());

        a.exec("counter = base + 1").ok();
        let results = b.exec("return counter, base").unwrap();
        assert_eq!(results, vec![HostValue::Nil, HostValue::Number(10.0)]);

        bridge.close_session(a);
        bridge.close_session(b);
    }

    #[test]
    fn test_removed_environment_keeps_open_sessions() {
        let mut bridge = Bridge::default();
        let env = bridge.register_environment(Environment::new().with("name", "kept"));
        let session = bridge.create_session(env).unwrap();

        assert!(bridge.remove_environment(env).is_some());
        assert!(bridge.create_session(env).is_err());
        assert_eq!(session.exec("return name").unwrap(), vec![HostValue::from("kept")]);
    }
}
