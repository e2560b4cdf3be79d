//! Model of the external client's object graph.
//!
//! The client exposes its classes under obfuscated symbols that appear
//! asynchronously while it boots. Each [`ClassObject`] carries an instance
//! method table (its prototype) and a static method table; either entry can
//! be patched in place, which is how interception is installed without
//! touching the client's own code.

pub mod mock;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Errors raised by the client's own methods.
///
/// Interception never rewrites these: whatever the original body returns
/// reaches the caller unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("{0}")]
    Thrown(String),

    #[error("{class} has no method '{method}'")]
    MissingMethod { class: String, method: String },
}

impl TargetError {
    pub fn thrown(message: impl Into<String>) -> Self {
        Self::Thrown(message.into())
    }
}

/// A callable method table entry.
pub type Method = Arc<dyn Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync>;

/// Wrap a closure as a [`Method`].
pub fn method<F>(f: F) -> Method
where
    F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which method table a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodScope {
    Instance,
    Static,
}

impl fmt::Display for MethodScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Instance => write!(f, "instance"),
            Self::Static => write!(f, "static"),
        }
    }
}

pub type ClassRef = Arc<ClassObject>;

/// The `this` of a call: the class itself for statics, an instance otherwise.
#[derive(Clone)]
pub enum Receiver {
    Static(ClassRef),
    Instance(Arc<Instance>),
}

impl Receiver {
    pub fn class(&self) -> &ClassRef {
        match self {
            Self::Static(class) => class,
            Self::Instance(instance) => &instance.class,
        }
    }

    pub fn instance(&self) -> Option<&Arc<Instance>> {
        match self {
            Self::Static(_) => None,
            Self::Instance(instance) => Some(instance),
        }
    }
}

struct MethodSlot {
    current: Method,
    wraps: usize,
}

impl MethodSlot {
    fn new(current: Method) -> Self {
        Self { current, wraps: 0 }
    }
}

pub struct ClassObject {
    name: String,
    prototype: RwLock<HashMap<String, MethodSlot>>,
    statics: RwLock<HashMap<String, MethodSlot>>,
}

impl fmt::Debug for ClassObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassObject")
            .field("name", &self.name)
            .field("methods", &self.prototype.read().len())
            .field("statics", &self.statics.read().len())
            .finish()
    }
}

impl ClassObject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prototype: RwLock::new(HashMap::new()),
            statics: RwLock::new(HashMap::new()),
        }
    }

    /// Builder form of [`ClassObject::define`] for instance methods.
    pub fn with_method<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        self.define(MethodScope::Instance, name, method(f));
        self
    }

    /// Builder form of [`ClassObject::define`] for static methods.
    pub fn with_static<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        self.define(MethodScope::Static, name, method(f));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn table(&self, scope: MethodScope) -> &RwLock<HashMap<String, MethodSlot>> {
        match scope {
            MethodScope::Instance => &self.prototype,
            MethodScope::Static => &self.statics,
        }
    }

    /// Define (or redefine) a method. Redefinition resets the wrap counter,
    /// matching a fresh assignment on the client side.
    pub fn define(&self, scope: MethodScope, name: &str, method: Method) {
        self.table(scope)
            .write()
            .insert(name.to_string(), MethodSlot::new(method));
    }

    pub fn has_method(&self, scope: MethodScope, name: &str) -> bool {
        self.table(scope).read().contains_key(name)
    }

    pub fn method(&self, scope: MethodScope, name: &str) -> Option<Method> {
        self.table(scope)
            .read()
            .get(name)
            .map(|slot| Arc::clone(&slot.current))
    }

    /// Replace a method with the wrapper built from its current body.
    pub fn patch<F>(&self, scope: MethodScope, name: &str, wrap: F) -> Result<(), TargetError>
    where
        F: FnOnce(Method) -> Method,
    {
        let mut table = self.table(scope).write();
        let slot = table
            .get_mut(name)
            .ok_or_else(|| TargetError::MissingMethod {
                class: self.name.clone(),
                method: name.to_string(),
            })?;
        slot.current = wrap(Arc::clone(&slot.current));
        slot.wraps += 1;
        Ok(())
    }

    /// How many wrappers have been layered over a method.
    pub fn wrap_count(&self, scope: MethodScope, name: &str) -> usize {
        self.table(scope).read().get(name).map_or(0, |slot| slot.wraps)
    }

    fn invoke(&self, scope: MethodScope, receiver: &Receiver, name: &str, args: &[Value]) -> Result<Value, TargetError> {
        // Clone the entry out so no lock is held while the body runs.
        let body = self.method(scope, name).ok_or_else(|| TargetError::MissingMethod {
            class: self.name.clone(),
            method: name.to_string(),
        })?;
        body(receiver, args)
    }

    pub fn call_static(self: &Arc<Self>, name: &str, args: &[Value]) -> Result<Value, TargetError> {
        let receiver = Receiver::Static(Arc::clone(self));
        self.invoke(MethodScope::Static, &receiver, name, args)
    }

    pub fn instantiate(self: &Arc<Self>, state: Value) -> Arc<Instance> {
        Arc::new(Instance {
            class: Arc::clone(self),
            state: Mutex::new(state),
        })
    }
}

/// An object created from a [`ClassObject`]. Method lookup happens on the
/// class at call time, so patches installed later still apply.
pub struct Instance {
    class: ClassRef,
    state: Mutex<Value>,
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("class", &self.class.name)
            .finish_non_exhaustive()
    }
}

impl Instance {
    pub fn class(&self) -> &ClassRef {
        &self.class
    }

    pub fn state(&self) -> Value {
        self.state.lock().clone()
    }

    pub fn set_state(&self, state: Value) {
        *self.state.lock() = state;
    }

    pub fn call(self: &Arc<Self>, name: &str, args: &[Value]) -> Result<Value, TargetError> {
        let receiver = Receiver::Instance(Arc::clone(self));
        self.class
            .invoke(MethodScope::Instance, &receiver, name, args)
    }
}

/// The client's top-level namespace: obfuscated symbol → class or constant.
#[derive(Default)]
pub struct Namespace {
    classes: RwLock<HashMap<String, ClassRef>>,
    values: RwLock<HashMap<String, Value>>,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("classes", &self.classes.read().len())
            .field("values", &self.values.read().len())
            .finish()
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define_class(&self, symbol: &str, class: ClassObject) -> ClassRef {
        let class = Arc::new(class);
        self.classes
            .write()
            .insert(symbol.to_string(), Arc::clone(&class));
        class
    }

    pub fn class(&self, symbol: &str) -> Option<ClassRef> {
        self.classes.read().get(symbol).cloned()
    }

    pub fn define_value(&self, symbol: &str, value: Value) {
        self.values.write().insert(symbol.to_string(), value);
    }

    pub fn value(&self, symbol: &str) -> Option<Value> {
        self.values.read().get(symbol).cloned()
    }
}
