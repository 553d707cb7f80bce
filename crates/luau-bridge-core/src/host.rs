//! Host value model.
//!
//! The bridge never inspects host objects directly. Anything the host wants
//! to expose implements [`HostObject`], and anything the script engine hands
//! back to the host arrives as an [`EngineRef`] implementing [`EngineObject`].

use crate::error::{BridgeError, BridgeResult};
use crate::ids::{EngineId, EnvId, SessionId};
use crate::wire::{format_number, Tag};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use thiserror::Error;

/// Shared reference to a host object or function.
pub type HostRef = Rc<dyn HostObject>;

/// Result type for host callbacks.
pub type HostResult<T> = std::result::Result<T, HostError>;

/// Error raised by host code. Surfaces in the script engine as an error whose
/// message is exactly [`HostError::message`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct HostError {
    message: String,
}

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<BridgeError> for HostError {
    fn from(err: BridgeError) -> Self {
        Self::new(err.to_string())
    }
}

/// A host object or function visible to scripts.
pub trait HostObject {
    /// Name used in error messages and `tostring`.
    fn type_name(&self) -> &str {
        "object"
    }

    /// Look up a property. `Ok(None)` means the property is absent, which
    /// scripts observe differently from `Ok(Some(HostValue::Nil))`.
    fn get(&self, key: &HostValue) -> HostResult<Option<HostValue>>;

    /// Assign a property.
    fn set(&self, key: &HostValue, value: HostValue) -> HostResult<()> {
        let _ = value;
        Err(HostError::new(format!(
            "cannot assign to '{}' on {}",
            key,
            self.type_name()
        )))
    }

    /// Call the object. `call.this` is the object it was reached through.
    fn invoke(&self, call: HostCall) -> HostResult<Vec<HostValue>> {
        let _ = call;
        Err(HostError::new(format!(
            "attempt to call a {} value",
            self.type_name()
        )))
    }
}

/// Arguments of one host call.
#[derive(Debug, Clone)]
pub struct HostCall {
    /// Parent the callee was read from, bound as call context.
    pub this: Option<HostValue>,
    /// Positional arguments, including a script-side `self` for method calls.
    pub args: Vec<HostValue>,
    /// Environment of the calling session.
    pub env: EnvId,
}

impl HostCall {
    pub fn new(args: Vec<HostValue>) -> Self {
        Self {
            this: None,
            args,
            env: EnvId::NONE,
        }
    }

    /// Argument at `index`, nil when missing.
    pub fn arg(&self, index: usize) -> HostValue {
        self.args.get(index).cloned().unwrap_or(HostValue::Nil)
    }

    pub fn number(&self, index: usize) -> HostResult<f64> {
        self.args
            .get(index)
            .and_then(HostValue::as_number)
            .ok_or_else(|| self.bad_argument(index, "number"))
    }

    pub fn string(&self, index: usize) -> HostResult<String> {
        self.args
            .get(index)
            .and_then(HostValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| self.bad_argument(index, "string"))
    }

    fn bad_argument(&self, index: usize, expected: &str) -> HostError {
        HostError::new(format!(
            "bad argument #{} ({} expected, got {})",
            index + 1,
            expected,
            self.arg(index).type_name()
        ))
    }
}

/// Script-engine reference value as seen from the host.
///
/// Implemented by the runtime's RAII handle: dropping the last clone of an
/// [`EngineRef`] releases the underlying engine handle.
pub trait EngineObject {
    fn id(&self) -> EngineId;
    fn kind(&self) -> Tag;
    fn owner(&self) -> SessionId;
    fn is_released(&self) -> bool;

    /// Call a script function.
    fn call(&self, args: Vec<HostValue>) -> BridgeResult<Vec<HostValue>>;

    /// Raw read of a table field.
    fn get(&self, key: &HostValue) -> BridgeResult<HostValue>;

    /// Raw write of a table field. `Ok(false)` when the table is read-only.
    fn set(&self, key: &HostValue, value: &HostValue) -> BridgeResult<bool>;

    /// Independent handle to the same value.
    fn clone_handle(&self) -> BridgeResult<EngineRef>;

    /// Release early. Later use fails with a stale-handle error.
    fn release(&self);
}

#[derive(Clone)]
pub struct EngineRef(Rc<dyn EngineObject>);

impl EngineRef {
    pub fn new(object: Rc<dyn EngineObject>) -> Self {
        Self(object)
    }

    /// Same wrapper, not merely the same engine value.
    pub fn ptr_eq(&self, other: &EngineRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Deref for EngineRef {
    type Target = dyn EngineObject;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl fmt::Debug for EngineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRef")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .field("owner", &self.owner())
            .finish()
    }
}

/// A value on the host side of the boundary.
#[derive(Clone)]
pub enum HostValue {
    /// Host null/undefined.
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Object(HostRef),
    Function(HostRef),
    Engine(EngineRef),
}

impl HostValue {
    /// Wrap a closure as a host function.
    pub fn function<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HostCall) -> HostResult<Vec<HostValue>> + 'static,
    {
        HostValue::Function(Rc::new(NativeFunction::new(name, func)))
    }

    pub fn object(object: impl HostObject + 'static) -> Self {
        HostValue::Object(Rc::new(object))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, HostValue::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            HostValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_engine(&self) -> Option<&EngineRef> {
        match self {
            HostValue::Engine(engine) => Some(engine),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            HostValue::Object(object) | HostValue::Function(object) => Some(object),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            HostValue::Nil => "nil",
            HostValue::Boolean(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Object(object) => object.type_name(),
            HostValue::Function(_) => "function",
            HostValue::Engine(engine) => engine.kind().as_str(),
        }
    }
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostValue::Nil, HostValue::Nil) => true,
            (HostValue::Boolean(a), HostValue::Boolean(b)) => a == b,
            (HostValue::Number(a), HostValue::Number(b)) => a == b,
            (HostValue::String(a), HostValue::String(b)) => a == b,
            (HostValue::Object(a), HostValue::Object(b))
            | (HostValue::Function(a), HostValue::Function(b)) => Rc::ptr_eq(a, b),
            (HostValue::Engine(a), HostValue::Engine(b)) => {
                a.owner() == b.owner() && a.id() == b.id()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("Nil"),
            HostValue::Boolean(b) => write!(f, "Boolean({b})"),
            HostValue::Number(n) => write!(f, "Number({n})"),
            HostValue::String(s) => write!(f, "String({s:?})"),
            HostValue::Object(object) => write!(f, "Object({})", object.type_name()),
            HostValue::Function(function) => write!(f, "Function({})", function.type_name()),
            HostValue::Engine(engine) => write!(f, "Engine({engine:?})"),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::Nil => f.write_str("nil"),
            HostValue::Boolean(b) => write!(f, "{b}"),
            HostValue::Number(n) => f.write_str(&format_number(*n)),
            HostValue::String(s) => f.write_str(s),
            HostValue::Object(object) | HostValue::Function(object) => {
                write!(f, "{}: {:p}", object.type_name(), Rc::as_ptr(object))
            }
            HostValue::Engine(engine) => write!(f, "{}: {}", engine.kind(), engine.id()),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Boolean(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}

impl From<EngineRef> for HostValue {
    fn from(value: EngineRef) -> Self {
        HostValue::Engine(value)
    }
}

impl From<MapObject> for HostValue {
    fn from(value: MapObject) -> Self {
        HostValue::Object(Rc::new(value))
    }
}

impl From<NativeFunction> for HostValue {
    fn from(value: NativeFunction) -> Self {
        HostValue::Function(Rc::new(value))
    }
}

type NativeFn = dyn Fn(HostCall) -> HostResult<Vec<HostValue>>;

/// Host function backed by a Rust closure.
pub struct NativeFunction {
    name: String,
    func: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(HostCall) -> HostResult<Vec<HostValue>> + 'static,
    {
        Self {
            name: name.into(),
            func: Box::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl HostObject for NativeFunction {
    fn type_name(&self) -> &str {
        "function"
    }

    fn get(&self, _key: &HostValue) -> HostResult<Option<HostValue>> {
        Ok(None)
    }

    fn invoke(&self, call: HostCall) -> HostResult<Vec<HostValue>> {
        (self.func)(call)
    }
}

/// Key of a [`MapObject`] property.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyKey {
    Index(i64),
    Name(String),
}

impl PropertyKey {
    /// Integral numbers become indices, other numbers use their wire text.
    pub fn from_value(key: &HostValue) -> Option<Self> {
        match key {
            HostValue::String(s) => Some(PropertyKey::Name(s.clone())),
            HostValue::Number(n) if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 => {
                Some(PropertyKey::Index(*n as i64))
            }
            HostValue::Number(n) if !n.is_nan() => Some(PropertyKey::Name(format_number(*n))),
            _ => None,
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(value: &str) -> Self {
        PropertyKey::Name(value.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(value: String) -> Self {
        PropertyKey::Name(value)
    }
}

impl From<i64> for PropertyKey {
    fn from(value: i64) -> Self {
        PropertyKey::Index(value)
    }
}

/// Host object backed by an ordered property map.
pub struct MapObject {
    name: String,
    properties: RefCell<BTreeMap<PropertyKey, HostValue>>,
    frozen: bool,
}

impl MapObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: RefCell::new(BTreeMap::new()),
            frozen: false,
        }
    }

    /// Builder-style insert.
    pub fn with(self, key: impl Into<PropertyKey>, value: impl Into<HostValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Reject assignments from scripts.
    pub fn frozen(mut self) -> Self {
        self.frozen = true;
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn insert(
        &self,
        key: impl Into<PropertyKey>,
        value: impl Into<HostValue>,
    ) -> Option<HostValue> {
        self.properties
            .borrow_mut()
            .insert(key.into(), value.into())
    }

    pub fn property(&self, key: &PropertyKey) -> Option<HostValue> {
        self.properties.borrow().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.properties.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.borrow().is_empty()
    }
}

impl HostObject for MapObject {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &HostValue) -> HostResult<Option<HostValue>> {
        Ok(PropertyKey::from_value(key).and_then(|key| self.property(&key)))
    }

    fn set(&self, key: &HostValue, value: HostValue) -> HostResult<()> {
        if self.frozen {
            return Err(HostError::new(format!(
                "attempt to modify frozen {}",
                self.name
            )));
        }
        let key = PropertyKey::from_value(key).ok_or_else(|| {
            HostError::new(format!("invalid key '{}' for {}", key, self.name))
        })?;
        // Replaced value is dropped after the map borrow ends.
        let previous = self.insert(key, value);
        drop(previous);
        Ok(())
    }
}
