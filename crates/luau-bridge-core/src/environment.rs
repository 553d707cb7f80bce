//! Host environments.
//!
//! An environment is the set of globals injected into a session when it is
//! created. Environments are registered once and referenced by [`EnvId`];
//! id 0 means "no environment".

use crate::error::BridgeResult;
use crate::host::{HostValue, MapObject};
use crate::ids::EnvId;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Global name to value map.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    globals: BTreeMap<String, HostValue>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<HostValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<HostValue>) {
        self.globals.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&HostValue> {
        self.globals.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.globals.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.globals.is_empty()
    }

    /// Parse globals from a TOML document. Top-level keys become globals;
    /// tables and arrays become read-write host objects.
    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let table: toml::Table = toml::from_str(content)?;
        let mut env = Self::new();
        for (name, value) in table {
            let value = from_toml(&name, value);
            env.insert(name, value);
        }
        Ok(env)
    }

    /// Load globals from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let env = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), globals = env.len(), "loaded environment");
        Ok(env)
    }
}

fn from_toml(name: &str, value: toml::Value) -> HostValue {
    match value {
        toml::Value::String(s) => HostValue::String(s),
        toml::Value::Integer(i) => HostValue::Number(i as f64),
        toml::Value::Float(f) => HostValue::Number(f),
        toml::Value::Boolean(b) => HostValue::Boolean(b),
        toml::Value::Datetime(dt) => HostValue::String(dt.to_string()),
        toml::Value::Array(items) => {
            let object = MapObject::new(name);
            for (index, item) in items.into_iter().enumerate() {
                object.insert(index as i64 + 1, from_toml(name, item));
            }
            object.into()
        }
        toml::Value::Table(table) => {
            let object = MapObject::new(name);
            for (key, item) in table {
                let item = from_toml(&key, item);
                object.insert(key, item);
            }
            object.into()
        }
    }
}

/// Registered environments of one host.
#[derive(Debug)]
pub struct Environments {
    next_id: u32,
    environments: HashMap<EnvId, Environment>,
}

impl Environments {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            environments: HashMap::new(),
        }
    }

    pub fn register(&mut self, env: Environment) -> EnvId {
        let id = EnvId(self.next_id);
        self.next_id += 1;
        debug!(env = %id, globals = env.len(), "registered environment");
        self.environments.insert(id, env);
        id
    }

    pub fn get(&self, id: EnvId) -> Option<&Environment> {
        self.environments.get(&id)
    }

    pub fn remove(&mut self, id: EnvId) -> Option<Environment> {
        let env = self.environments.remove(&id);
        if env.is_none() {
            warn!(env = %id, "removing unknown environment");
        }
        env
    }

    pub fn len(&self) -> usize {
        self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.environments.is_empty()
    }
}

impl Default for Environments {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostObject, PropertyKey};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_missing_file_error_can_be_unwrapped() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = Environment::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, crate::error::BridgeError::Io(_)));

        let env = Environment::from_toml_str("name = \"demo\"").unwrap();
        assert!(format!("{env:?}").contains("name"));
    }

    #[test]
    fn test_from_toml_scalars() {
        let env = Environment::from_toml_str(
            r#"
name = "demo"
answer = 42
ratio = 0.5
enabled = true
"#,
        )
        .unwrap();

        assert_eq!(env.len(), 4);
        assert_eq!(env.get("name"), Some(&HostValue::from("demo")));
        assert_eq!(env.get("answer"), Some(&HostValue::Number(42.0)));
        assert_eq!(env.get("ratio"), Some(&HostValue::Number(0.5)));
        assert_eq!(env.get("enabled"), Some(&HostValue::Boolean(true)));
    }

    #[test]
    fn test_from_toml_nested() {
        let env = Environment::from_toml_str(
            r#"
tags = ["a", "b"]

[server]
port = 8080
"#,
        )
        .unwrap();

        let tags = env.get("tags").and_then(HostValue::as_host).unwrap();
        assert_eq!(
            tags.get(&HostValue::Number(1.0)).unwrap(),
            Some(HostValue::from("a"))
        );

        let server = env.get("server").and_then(HostValue::as_host).unwrap();
        assert_eq!(
            server.get(&"port".into()).unwrap(),
            Some(HostValue::Number(8080.0))
        );
        assert_eq!(server.type_name(), "server");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"greeting = \"hello\"\n").unwrap();

        let env = Environment::load(file.path()).unwrap();
        assert_eq!(env.get("greeting"), Some(&HostValue::from("hello")));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(Environment::from_toml_str("= nope").is_err());
    }

    #[test]
    fn test_environment_ids_start_at_one() {
        let mut envs = Environments::new();
        let first = envs.register(Environment::new());
        let second = envs.register(Environment::new().with("x", 1));
        assert_eq!(first, EnvId(1));
        assert_eq!(second, EnvId(2));
        assert!(envs.get(EnvId::NONE).is_none());
        assert_eq!(envs.remove(second).unwrap().len(), 1);
        assert_eq!(envs.len(), 1);
    }

    #[test]
    fn test_property_key_for_array_index() {
        assert_eq!(
            PropertyKey::from_value(&HostValue::Number(2.0)),
            Some(PropertyKey::Index(2))
        );
    }
}
