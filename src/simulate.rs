//! Scripted session against the mock client, used by `highlite simulate`.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::context_menu::{MenuContext, MenuEntry, Placement};
use crate::framework::{Highlite, DEFAULT_HOOKS, DEFAULT_STATIC_HOOKS};
use crate::hooks::{event_name, HookEvent};
use crate::plugins::builtin::AccountSettings;
use crate::plugins::{Plugin, PluginContext};
use crate::storage::MemoryStorage;
use crate::target::mock::MockClient;

/// Plugin that records every default event it receives.
struct EventLog {
    seen: Arc<Mutex<Vec<String>>>,
}

impl Plugin for EventLog {
    fn name(&self) -> &str {
        "Event Log"
    }

    fn author(&self) -> &str {
        "Highlite"
    }

    fn event_handlers(&self) -> Vec<String> {
        DEFAULT_HOOKS
            .iter()
            .chain(DEFAULT_STATIC_HOOKS)
            .map(|(alias, method)| event_name(alias, method))
            .collect()
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        ctx.context_menu
            .contribute(MenuContext::Inventory, self.name(), |mut entries, item| {
                let name = item.get("name").and_then(Value::as_str).unwrap_or("item");
                entries.push(MenuEntry::new("log", format!("Log {name}")));
                Ok(entries)
            });
        ctx.context_menu
            .pin_action(self.name(), "attack", Placement::First);
        Ok(())
    }

    fn start(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<()> {
        self.seen.lock().push(event.name());
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Event names delivered to plugins, in order.
    pub events: Vec<String>,
    /// Original client bodies that ran, as `<symbol>.<method>`.
    pub original_calls: Vec<String>,
    pub patches: usize,
    pub inventory_menu: Value,
    pub mouse_actions: Value,
    pub visible_account_settings: Vec<String>,
}

/// Boot the mock client in two waves around a plugin session: login screen,
/// home button, game boot, login, a few game ticks, menus, then a
/// stop/reload cycle.
pub async fn run(config: Config) -> anyhow::Result<SimulationReport> {
    let client = MockClient::new();
    let highlite = Highlite::new(config, client.namespace(), Arc::new(MemoryStorage::new()))?;

    let seen = Arc::new(Mutex::new(Vec::new()));
    highlite.register_plugin(Box::new(EventLog {
        seen: Arc::clone(&seen),
    }))?;
    let account = AccountSettings::default();
    let mut loads = account.loads();
    let account_name = account.name().to_string();
    if highlite.config().plugins.account_settings {
        highlite.register_plugin(Box::new(account))?;
    }
    highlite.start()?;

    let login = client.boot_login_screen();
    highlite.poll();
    login
        .instantiate(Value::Null)
        .call("_handleHomeButtonClicked", &[])?;

    client.boot_game();
    highlite.poll();
    let ns = client.namespace();
    let class = |symbol: &str| {
        ns.class(symbol)
            .ok_or_else(|| anyhow::anyhow!("mock client did not define {symbol}"))
    };

    let socket = class("$G")?.instantiate(Value::Null);
    socket.call("_loggedIn", &[json!({"username": "zezima"})])?;
    if highlite.config().plugins.account_settings {
        let wait = loads.wait_for(|n| *n >= 1);
        if tokio::time::timeout(std::time::Duration::from_secs(2), wait).await.is_err() {
            anyhow::bail!("account settings did not finish loading");
        }
    }

    let game_loop = class("SW")?.instantiate(Value::Null);
    game_loop.call("_update", &[json!(16)])?;
    class("aH")?
        .instantiate(Value::Null)
        .call("addChatMessage", &[json!("hello")])?;

    let menus = class("cz")?.instantiate(Value::Null);
    let inventory_menu = menus.call(
        "_createInventoryItemContextMenuItems",
        &[json!({"name": "Bronze axe"})],
    )?;
    let mouse_actions = class("GV")?.call_static("getActionsAndEntitiesAtMousePointer", &[])?;

    highlite.stop();
    game_loop.call("_update", &[json!(16)])?;
    highlite.reload();
    game_loop.call("_draw", &[])?;

    let visible_account_settings = highlite
        .plugins()
        .settings_view(&account_name)
        .map(|view| view.into_iter().map(|s| s.key).collect())
        .unwrap_or_default();

    let report = SimulationReport {
        events: seen.lock().clone(),
        original_calls: client.calls(),
        patches: highlite.hooks().patch_count(),
        inventory_menu,
        mouse_actions,
        visible_account_settings,
    };
    info!(events = report.events.len(), patches = report.patches, "simulation finished");
    Ok(report)
}
