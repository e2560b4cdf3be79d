use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::target::{MethodScope, Receiver};

/// Canonical event name for a hooked method: `<alias>_<method>`, with the
/// method's single leading underscore (private by convention) dropped.
///
/// `("LoginScreen", "_handleHomeButtonClicked")` → `"LoginScreen_handleHomeButtonClicked"`.
pub fn event_name(alias: &str, method: &str) -> String {
    let method = method.strip_prefix('_').unwrap_or(method);
    format!("{alias}_{method}")
}

/// The (alias, method, scope) triple a hook is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct HookTarget {
    pub alias: String,
    pub method: String,
    pub scope: MethodScope,
}

impl HookTarget {
    pub fn instance(alias: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            method: method.into(),
            scope: MethodScope::Instance,
        }
    }

    pub fn static_method(alias: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            method: method.into(),
            scope: MethodScope::Static,
        }
    }

    pub fn is_static(&self) -> bool {
        self.scope == MethodScope::Static
    }

    pub fn event_name(&self) -> String {
        event_name(&self.alias, &self.method)
    }
}

impl fmt::Display for HookTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scope {
            MethodScope::Instance => write!(f, "{}.{}", self.alias, self.method),
            MethodScope::Static => write!(f, "{}::{}", self.alias, self.method),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Observe,
    Override,
    Transform,
}

/// Event delivered to plugins after an Observe or Override firing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HookEvent {
    pub class_alias: String,
    pub method_name: String,
    pub payload: Vec<Value>,
}

impl HookEvent {
    pub fn name(&self) -> String {
        event_name(&self.class_alias, &self.method_name)
    }
}

/// What an Observe handler sees once the call has completed.
pub struct HookCall<'a> {
    pub target: &'a HookTarget,
    pub receiver: &'a Receiver,
    pub args: &'a [Value],
    pub result: &'a Value,
}

pub type ObserveFn = dyn Fn(&HookCall<'_>) -> anyhow::Result<()> + Send + Sync;
/// Receives the canonical event name and the call arguments.
pub type OverrideFn = dyn Fn(&str, &[Value]) -> anyhow::Result<Value> + Send + Sync;
/// Receives the value produced so far and the call arguments.
pub type TransformFn = dyn Fn(Value, &[Value]) -> anyhow::Result<Value> + Send + Sync;

/// A handler plus the identity it is logged under.
pub struct Named<F: ?Sized> {
    pub name: String,
    pub func: Arc<F>,
}

impl<F: ?Sized> Clone for Named<F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

impl<F: ?Sized> fmt::Debug for Named<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Named").field(&self.name).finish()
    }
}

impl<F: ?Sized> Named<F> {
    pub fn new(name: impl Into<String>, func: Arc<F>) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

/// Receiver of the implicit `<alias>_<method>` events.
pub trait PluginDispatch: Send + Sync {
    fn dispatch(&self, event: &HookEvent);
}

/// Dispatcher that drops every event; used before plugins exist and in tests.
#[derive(Debug, Default)]
pub struct NoDispatch;

impl PluginDispatch for NoDispatch {
    fn dispatch(&self, _event: &HookEvent) {}
}
