use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, warn};

use crate::target::{Method, Receiver, TargetError};
use crate::util::{isolate, Fault};

use super::traits::{
    HookCall, HookEvent, HookTarget, Named, ObserveFn, OverrideFn, PluginDispatch, TransformFn,
};

#[derive(Clone, Default)]
pub(crate) struct PatchHandlers {
    pub observe: Vec<Named<ObserveFn>>,
    /// Set by any Observe or Override registration, with or without a handler.
    pub dispatch: bool,
    pub replace: Option<Named<OverrideFn>>,
    pub transform: Vec<Named<TransformFn>>,
}

/// Handler lists for one hooked method.
///
/// The wrapper installed on the class reads these lists on every call, so
/// registering another handler after installation only appends here and
/// never wraps the method a second time.
pub struct ActivePatch {
    target: HookTarget,
    handlers: RwLock<PatchHandlers>,
}

impl ActivePatch {
    pub(crate) fn new(target: HookTarget) -> Self {
        Self {
            target,
            handlers: RwLock::new(PatchHandlers::default()),
        }
    }

    pub fn target(&self) -> &HookTarget {
        &self.target
    }

    pub fn observer_count(&self) -> usize {
        self.handlers.read().observe.len()
    }

    pub fn transform_count(&self) -> usize {
        self.handlers.read().transform.len()
    }

    pub fn has_override(&self) -> bool {
        self.handlers.read().replace.is_some()
    }

    pub(crate) fn update<R>(&self, f: impl FnOnce(&mut PatchHandlers) -> R) -> R {
        f(&mut self.handlers.write())
    }

    /// Build the method that replaces `original` on the class.
    pub(crate) fn wrap(self: &Arc<Self>, original: Method, dispatcher: Arc<dyn PluginDispatch>) -> Method {
        let patch = Arc::clone(self);
        Arc::new(move |receiver: &Receiver, args: &[Value]| {
            patch.invoke(&original, dispatcher.as_ref(), receiver, args)
        })
    }

    fn invoke(
        &self,
        original: &Method,
        dispatcher: &dyn PluginDispatch,
        receiver: &Receiver,
        args: &[Value],
    ) -> Result<Value, TargetError> {
        // Snapshot so handlers can register more hooks without deadlocking.
        let handlers = self.handlers.read().clone();

        let mut result = match &handlers.replace {
            Some(handler) => self.run_override(handler, args),
            None => original(receiver, args)?,
        };

        for handler in &handlers.transform {
            result = self.run_transform(handler, result, args);
        }

        let call = HookCall {
            target: &self.target,
            receiver,
            args,
            result: &result,
        };
        for handler in &handlers.observe {
            self.run_observe(handler, &call);
        }

        if handlers.dispatch {
            dispatcher.dispatch(&HookEvent {
                class_alias: self.target.alias.clone(),
                method_name: self.target.method.clone(),
                payload: args.to_vec(),
            });
        }

        Ok(result)
    }

    fn run_override(&self, handler: &Named<OverrideFn>, args: &[Value]) -> Value {
        let event = self.target.event_name();
        match isolate(|| (handler.func)(&event, args)) {
            Ok(value) => value,
            Err(fault) => {
                self.report(&handler.name, "override", &fault);
                Value::Null
            }
        }
    }

    fn run_transform(&self, handler: &Named<TransformFn>, input: Value, args: &[Value]) -> Value {
        let fallback = input.clone();
        match isolate(|| (handler.func)(input, args)) {
            Ok(value) => value,
            Err(fault) => {
                self.report(&handler.name, "transform", &fault);
                fallback
            }
        }
    }

    fn run_observe(&self, handler: &Named<ObserveFn>, call: &HookCall<'_>) {
        if let Err(fault) = isolate(|| (handler.func)(call)) {
            self.report(&handler.name, "observe", &fault);
        }
    }

    fn report(&self, handler: &str, kind: &str, fault: &Fault) {
        match fault {
            Fault::Error(e) => warn!(
                alias = %self.target.alias,
                method = %self.target.method,
                handler,
                kind,
                error = %e,
                "hook handler failed"
            ),
            Fault::Panic(msg) => error!(
                alias = %self.target.alias,
                method = %self.target.method,
                handler,
                kind,
                panic = %msg,
                "hook handler panicked"
            ),
        }
    }
}
