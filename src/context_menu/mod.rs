//! Context-menu assembly on top of Transform hooks.
//!
//! The client builds an action list whenever the player right-clicks an
//! inventory item or something in the game world. Plugins contribute to
//! that list through [`ContextMenuManager::contribute`]; contributions for
//! one context run in registration order, each seeing the previous one's
//! output. A second transform on the static action-resolution entry point
//! applies [`Pin`] requests so a plugin can force its action into a slot.

mod sorting;

pub use sorting::{apply_placements, Pin, Placement};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::hooks::{HookManager, HookTarget};
use crate::util::{isolate, Fault};

/// One selectable action. `action` is whatever the client uses to name it
/// (a string, or a number from its action table). Fields the client sets
/// beyond `action`/`label` ride along untouched in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MenuEntry {
    pub action: Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl MenuEntry {
    pub fn new(action: impl Into<Value>, label: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            label: label.into(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MenuContext {
    Inventory,
    GameWorld,
}

impl fmt::Display for MenuContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inventory => f.write_str("inventory"),
            Self::GameWorld => f.write_str("game_world"),
        }
    }
}

/// Receives the entries built so far and the context target (the item or
/// entity under the cursor).
pub type MenuFn = dyn Fn(Vec<MenuEntry>, &Value) -> anyhow::Result<Vec<MenuEntry>> + Send + Sync;

#[derive(Clone)]
struct Contribution {
    context: MenuContext,
    name: String,
    func: Arc<MenuFn>,
}

#[derive(Default)]
struct MenuState {
    contributions: Vec<Contribution>,
    pins: Vec<Pin>,
    bindings: Vec<(MenuContext, HookTarget)>,
    sorting: Option<HookTarget>,
    /// Hooks whose result already failed to decode once.
    undecodable: HashSet<HookTarget>,
}

pub struct ContextMenuManager {
    hooks: Arc<HookManager>,
    state: Arc<RwLock<MenuState>>,
}

impl ContextMenuManager {
    pub fn new(hooks: Arc<HookManager>) -> Self {
        Self {
            hooks,
            state: Arc::new(RwLock::new(MenuState::default())),
        }
    }

    /// Bind `context` to the (instance) method that builds its entry list.
    /// Contributions registered before or after binding both apply.
    pub fn register_context_hook(&self, alias: &str, method: &str, context: MenuContext) {
        let target = HookTarget::instance(alias, method);
        {
            let mut state = self.state.write();
            if state.bindings.iter().any(|(c, t)| *c == context && *t == target) {
                return;
            }
            state.bindings.push((context, target.clone()));
        }

        let state = Arc::clone(&self.state);
        let hook = target.clone();
        self.hooks
            .transform(target.clone(), &format!("context_menu:{context}"), move |value, args| {
                Ok(apply_contributions(&state, &hook, context, value, args))
            });
        info!(hook = %target, %context, "context menu bound");
    }

    /// Bind pin handling to the static method that returns the final
    /// candidate list for a click.
    pub fn register_action_sorting(&self, alias: &str, method: &str) {
        let target = HookTarget::static_method(alias, method);
        {
            let mut state = self.state.write();
            if state.sorting.is_some() {
                warn!(hook = %target, "action sorting already bound; ignoring");
                return;
            }
            state.sorting = Some(target.clone());
        }

        let state = Arc::clone(&self.state);
        let hook = target.clone();
        self.hooks.transform(target, "context_menu:action_sorting", move |value, _args| {
            let pins = state.read().pins.clone();
            if pins.is_empty() {
                return Ok(value);
            }
            Ok(match decode(&state, &hook, &value) {
                Some(entries) => encode(apply_placements(entries, &pins)),
                None => value,
            })
        });
    }

    /// Add a contribution for `context`. Runs after every earlier one.
    pub fn contribute<F>(&self, context: MenuContext, name: &str, f: F)
    where
        F: Fn(Vec<MenuEntry>, &Value) -> anyhow::Result<Vec<MenuEntry>> + Send + Sync + 'static,
    {
        self.state.write().contributions.push(Contribution {
            context,
            name: name.to_string(),
            func: Arc::new(f),
        });
        debug!(%context, contribution = name, "context menu contribution added");
    }

    /// Drop every contribution and pin registered under `name`.
    pub fn remove(&self, name: &str) -> usize {
        let mut state = self.state.write();
        let before = state.contributions.len() + state.pins.len();
        state.contributions.retain(|c| c.name != name);
        state.pins.retain(|p| p.owner != name);
        before - state.contributions.len() - state.pins.len()
    }

    pub fn pin_action(&self, owner: &str, action: impl Into<Value>, placement: Placement) {
        self.state.write().pins.push(Pin {
            owner: owner.to_string(),
            action: action.into(),
            placement,
        });
    }

    pub fn pins(&self) -> Vec<Pin> {
        self.state.read().pins.clone()
    }

    pub fn contribution_count(&self, context: MenuContext) -> usize {
        self.state
            .read()
            .contributions
            .iter()
            .filter(|c| c.context == context)
            .count()
    }

    pub fn bindings(&self) -> Vec<(MenuContext, HookTarget)> {
        self.state.read().bindings.clone()
    }
}

fn decode(state: &RwLock<MenuState>, hook: &HookTarget, value: &Value) -> Option<Vec<MenuEntry>> {
    match serde_json::from_value::<Vec<MenuEntry>>(value.clone()) {
        Ok(entries) => Some(entries),
        Err(e) => {
            if state.write().undecodable.insert(hook.clone()) {
                warn!(%hook, error = %e, "result is not a menu entry list; menu changes skipped");
            } else {
                debug!(%hook, error = %e, "result is not a menu entry list; passing through");
            }
            None
        }
    }
}

fn encode(entries: Vec<MenuEntry>) -> Value {
    Value::Array(
        entries
            .into_iter()
            .filter_map(|entry| serde_json::to_value(entry).ok())
            .collect(),
    )
}

fn apply_contributions(
    state: &RwLock<MenuState>,
    hook: &HookTarget,
    context: MenuContext,
    value: Value,
    args: &[Value],
) -> Value {
    // Snapshot so a contribution may register others without deadlocking.
    let contributions: Vec<Contribution> = state
        .read()
        .contributions
        .iter()
        .filter(|c| c.context == context)
        .cloned()
        .collect();
    if contributions.is_empty() {
        return value;
    }
    let Some(mut entries) = decode(state, hook, &value) else {
        return value;
    };

    let target = args.first().unwrap_or(&Value::Null);
    for contribution in &contributions {
        let input = entries.clone();
        match isolate(|| (contribution.func)(input, target)) {
            Ok(next) => entries = next,
            Err(fault @ Fault::Error(_)) => {
                warn!(%hook, %context, contribution = %contribution.name, error = %fault, "context menu contribution failed; skipped");
            }
            Err(fault @ Fault::Panic(_)) => {
                error!(%hook, %context, contribution = %contribution.name, error = %fault, "context menu contribution panicked; skipped");
            }
        }
    }
    encode(entries)
}
