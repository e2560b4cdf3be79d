use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::context_menu::ContextMenuManager;
use crate::hooks::{HookEvent, HookManager};
use crate::resolver::ClassResolver;
use crate::storage::Storage;

use super::settings::Settings;

/// Handles a plugin receives for every lifecycle call.
///
/// Replaces a process-wide namespace: everything a plugin may touch is
/// reachable from here, and nothing here points back at the plugin manager.
#[derive(Clone)]
pub struct PluginContext {
    pub resolver: Arc<ClassResolver>,
    pub hooks: Arc<HookManager>,
    pub context_menu: Arc<ContextMenuManager>,
    pub storage: Arc<dyn Storage>,
}

impl fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginContext")
            .field("aliases", &self.resolver.aliases().len())
            .field("patches", &self.hooks.patch_count())
            .finish_non_exhaustive()
    }
}

/// Contract every plugin implements.
///
/// Event subscription is declarative: a plugin lists the canonical
/// `<alias>_<method>` names it handles in [`Plugin::event_handlers`] and
/// receives matching events through [`Plugin::on_event`] while Started.
pub trait Plugin: Send {
    fn name(&self) -> &str;

    fn author(&self) -> &str;

    /// Shared handle to this plugin's settings. Cloned once at registration.
    fn settings(&self) -> Settings {
        Settings::default()
    }

    /// Canonical event names this plugin handles. Read once at registration.
    fn event_handlers(&self) -> Vec<String> {
        Vec::new()
    }

    /// Register hooks and settings. Runs once.
    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn post_init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn start(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn stop(&mut self, ctx: &PluginContext) -> anyhow::Result<()>;

    fn on_event(&mut self, _event: &HookEvent) -> anyhow::Result<()> {
        Ok(())
    }

    /// Re-derive settings presentation from current plugin state.
    fn refresh_settings(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginState {
    Constructed,
    Initialized,
    PostInitialized,
    Started,
    Stopped,
    Failed,
}

impl PluginState {
    /// Only Started plugins receive hook-derived events.
    pub fn receives_events(self) -> bool {
        self == Self::Started
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Constructed => "constructed",
            Self::Initialized => "initialized",
            Self::PostInitialized => "post_initialized",
            Self::Started => "started",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Identity and state of one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub author: String,
    pub state: PluginState,
    pub event_handlers: Vec<String>,
}
