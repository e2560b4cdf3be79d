use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::HookError;
use crate::resolver::{ClassResolver, PollOutcome, Resolution};

use super::patch::ActivePatch;
use super::traits::{
    HookCall, HookKind, HookTarget, Named, ObserveFn, OverrideFn, PluginDispatch, TransformFn,
};

/// Introspection record for one registration.
#[derive(Debug, Clone, Serialize)]
pub struct HookRegistration {
    pub target: HookTarget,
    pub kind: HookKind,
    /// `None` for dispatch-only hooks.
    pub handler: Option<String>,
    pub order: u64,
}

enum Handler {
    Observe(Option<Named<ObserveFn>>),
    Override(Named<OverrideFn>),
    Transform(Named<TransformFn>),
}

impl Handler {
    fn kind(&self) -> HookKind {
        match self {
            Self::Observe(_) => HookKind::Observe,
            Self::Override(_) => HookKind::Override,
            Self::Transform(_) => HookKind::Transform,
        }
    }

    fn name(&self) -> Option<String> {
        match self {
            Self::Observe(handler) => handler.as_ref().map(|h| h.name.clone()),
            Self::Override(h) => Some(h.name.clone()),
            Self::Transform(h) => Some(h.name.clone()),
        }
    }
}

struct PatchSlot {
    patch: Arc<ActivePatch>,
    installed: bool,
    missing_reported: bool,
}

#[derive(Default)]
struct HookState {
    next_order: u64,
    registrations: Vec<HookRegistration>,
    /// Keyed in first-registration order so installation is deterministic.
    order: Vec<HookTarget>,
    patches: HashMap<HookTarget, PatchSlot>,
}

/// Installs Observe/Override/Transform wrappers on resolved classes and
/// forwards the implicit `<alias>_<method>` events to plugins.
///
/// Registration may happen long before the client defines the class; the
/// wrapper goes in as soon as the alias resolves, whether that is at
/// registration time or during a later [`HookManager::poll`].
pub struct HookManager {
    resolver: Arc<ClassResolver>,
    dispatcher: Arc<dyn PluginDispatch>,
    state: Mutex<HookState>,
}

impl HookManager {
    pub fn new(resolver: Arc<ClassResolver>, dispatcher: Arc<dyn PluginDispatch>) -> Self {
        Self {
            resolver,
            dispatcher,
            state: Mutex::new(HookState::default()),
        }
    }

    pub fn resolver(&self) -> &Arc<ClassResolver> {
        &self.resolver
    }

    /// Dispatch-only hook: plugins receive `<alias>_<method>` after each call.
    pub fn register_hook(&self, alias: &str, method: &str) {
        self.add(HookTarget::instance(alias, method), Handler::Observe(None));
    }

    /// Static variant of [`HookManager::register_hook`].
    pub fn register_static_hook(&self, alias: &str, method: &str) {
        self.add(HookTarget::static_method(alias, method), Handler::Observe(None));
    }

    /// Run `handler` after every completed call of `target`.
    pub fn observe<F>(&self, target: HookTarget, name: &str, handler: F)
    where
        F: Fn(&HookCall<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Arc<ObserveFn> = Arc::new(handler);
        self.add(target, Handler::Observe(Some(Named::new(name, handler))));
    }

    /// Replace the body of `target`. Only one override per target; a second
    /// one is rejected and the first stays active.
    pub fn override_method<F>(&self, target: HookTarget, name: &str, handler: F) -> Result<(), HookError>
    where
        F: Fn(&str, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler: Arc<OverrideFn> = Arc::new(handler);
        if self.add(target.clone(), Handler::Override(Named::new(name, handler))) {
            return Ok(());
        }
        warn!(hook = %target, handler = name, "rejected second override handler");
        Err(HookError::DuplicateOverride {
            alias: target.alias,
            method: target.method,
        })
    }

    /// Append `handler` to the result pipeline of `target`.
    pub fn transform<F>(&self, target: HookTarget, name: &str, handler: F)
    where
        F: Fn(Value, &[Value]) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        let handler: Arc<TransformFn> = Arc::new(handler);
        self.add(target, Handler::Transform(Named::new(name, handler)));
    }

    /// Record a registration and install the wrapper if the alias already
    /// resolves. Returns `false` only for a rejected duplicate override.
    fn add(&self, target: HookTarget, handler: Handler) -> bool {
        let mut state = self.state.lock();

        if !state.patches.contains_key(&target) {
            state.order.push(target.clone());
        }
        let patch = Arc::clone(
            &state
                .patches
                .entry(target.clone())
                .or_insert_with(|| PatchSlot {
                    patch: Arc::new(ActivePatch::new(target.clone())),
                    installed: false,
                    missing_reported: false,
                })
                .patch,
        );

        let kind = handler.kind();
        let name = handler.name();
        let accepted = patch.update(|h| match handler {
            Handler::Observe(handler) => {
                h.dispatch = true;
                h.observe.extend(handler);
                true
            }
            Handler::Override(_) if h.replace.is_some() => false,
            Handler::Override(handler) => {
                h.dispatch = true;
                h.replace = Some(handler);
                true
            }
            Handler::Transform(handler) => {
                h.transform.push(handler);
                true
            }
        });
        if !accepted {
            return false;
        }

        let order = state.next_order;
        state.next_order += 1;
        state.registrations.push(HookRegistration {
            target: target.clone(),
            kind,
            handler: name,
            order,
        });
        debug!(hook = %target, ?kind, order, "hook registered");

        self.install(&mut state, &target);
        true
    }

    fn install(&self, state: &mut HookState, target: &HookTarget) {
        let Some(slot) = state.patches.get_mut(target) else {
            return;
        };
        if slot.installed {
            return;
        }
        let Resolution::Resolved(class) = self.resolver.resolve(&target.alias) else {
            return;
        };
        if !class.has_method(target.scope, &target.method) {
            if !slot.missing_reported {
                warn!(hook = %target, class = class.name(), "hooked method not found; hook stays inactive");
                slot.missing_reported = true;
            }
            return;
        }

        let patch = Arc::clone(&slot.patch);
        let dispatcher = Arc::clone(&self.dispatcher);
        match class.patch(target.scope, &target.method, |original| patch.wrap(original, dispatcher)) {
            Ok(()) => {
                slot.installed = true;
                info!(hook = %target, "hook installed");
            }
            Err(e) => warn!(hook = %target, error = %e, "failed to install hook"),
        }
    }

    /// Try to install every registered-but-inactive hook.
    pub fn install_pending(&self) -> usize {
        let mut state = self.state.lock();
        let targets: Vec<HookTarget> = state
            .order
            .iter()
            .filter(|t| state.patches.get(*t).is_some_and(|slot| !slot.installed))
            .cloned()
            .collect();

        let mut installed = 0;
        for target in &targets {
            self.install(&mut state, target);
            if state.patches.get(target).is_some_and(|slot| slot.installed) {
                installed += 1;
            }
        }
        installed
    }

    /// One resolver polling round followed by installation of anything that
    /// became resolvable.
    pub fn poll(&self) -> PollOutcome {
        let outcome = self.resolver.poll();
        self.install_pending();
        outcome
    }

    pub fn is_installed(&self, target: &HookTarget) -> bool {
        self.state
            .lock()
            .patches
            .get(target)
            .is_some_and(|slot| slot.installed)
    }

    /// Number of installed wrappers across all targets.
    pub fn patch_count(&self) -> usize {
        self.state
            .lock()
            .patches
            .values()
            .filter(|slot| slot.installed)
            .count()
    }

    pub fn patch(&self, target: &HookTarget) -> Option<Arc<ActivePatch>> {
        self.state
            .lock()
            .patches
            .get(target)
            .map(|slot| Arc::clone(&slot.patch))
    }

    pub fn registrations(&self) -> Vec<HookRegistration> {
        self.state.lock().registrations.clone()
    }
}
