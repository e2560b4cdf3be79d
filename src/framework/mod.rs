//! The framework context object.
//!
//! [`Highlite`] owns one resolver, hook manager, context-menu manager and
//! plugin manager, wires the default alias table and hooks at construction
//! time, and drives the plugin lifecycle.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::Config;
use crate::context_menu::{ContextMenuManager, MenuContext};
use crate::error::{HookError, PluginError};
use crate::hooks::{spawn_poller, HookManager, HookTarget, PluginDispatch};
use crate::plugins::{PhaseReport, Plugin, PluginContext, PluginManager};
use crate::resolver::{ClassResolver, PollOutcome};
use crate::storage::Storage;
use crate::target::Namespace;

/// Something that can show a URL to the player.
pub trait LinkOpener: Send + Sync {
    fn open(&self, url: &str) -> anyhow::Result<()>;
}

/// Opener that only logs. Used when no browser is attached.
#[derive(Debug, Default)]
pub struct LogLinkOpener;

impl LinkOpener for LogLinkOpener {
    fn open(&self, url: &str) -> anyhow::Result<()> {
        info!(url, "open link");
        Ok(())
    }
}

/// Dispatch-only hooks registered for every session: (alias, method).
pub const DEFAULT_HOOKS: &[(&str, &str)] = &[
    ("GameLoop", "_update"),
    ("GameLoop", "_draw"),
    ("PrivateChatMessageList", "addChatMessage"),
    ("SocketManager", "_loggedIn"),
    ("SocketManager", "_handleLoggedOut"),
    ("SocketManager", "_handleEnteredIdleStateAction"),
    ("SocketManager", "_handleTradeRequestedPacket"),
    ("SocketManager", "_handleInvokedInventoryItemActionPacket"),
    ("SocketManager", "_handleForcedSkillCurrentLevelChangedPacket"),
    ("SocketManager", "_handleHealthRestoredPacket"),
    ("SocketManager", "_handleRestoredStatsPacket"),
    ("ScreenMask", "initializeControls"),
    ("BankUIManager", "showBankMenu"),
    ("BankUIManager", "_handleCenterMenuWillBeRemoved"),
    ("SpellMenuManager", "_handleSpellItemPointerOver"),
    ("SpellMenuManager", "_handleSpellItemPointerOut"),
];

/// Static dispatch-only hooks: (alias, method).
pub const DEFAULT_STATIC_HOOKS: &[(&str, &str)] = &[("TargetActionManager", "handleTargetAction")];

const LOGIN_SCREEN: &str = "LoginScreen";
const CONTEXT_MENU: &str = "ContextMenuItemManager";
const TARGET_ACTIONS: &str = "TargetActionManager";

pub struct Highlite {
    config: Config,
    resolver: Arc<ClassResolver>,
    hooks: Arc<HookManager>,
    context_menu: Arc<ContextMenuManager>,
    plugins: Arc<PluginManager>,
    storage: Arc<dyn Storage>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl Highlite {
    pub fn new(config: Config, namespace: Arc<Namespace>, storage: Arc<dyn Storage>) -> Result<Self, HookError> {
        Self::with_link_opener(config, namespace, storage, Arc::new(LogLinkOpener))
    }

    pub fn with_link_opener(
        config: Config,
        namespace: Arc<Namespace>,
        storage: Arc<dyn Storage>,
        links: Arc<dyn LinkOpener>,
    ) -> Result<Self, HookError> {
        let resolver = Arc::new(ClassResolver::new(namespace, config.resolver.max_attempts));
        for (alias, symbol) in &config.aliases {
            resolver.register_alias(alias, symbol)?;
        }
        for (name, symbol) in &config.lookups {
            resolver.register_lookup(name, symbol)?;
        }

        let plugins = Arc::new(PluginManager::new());
        let dispatcher: Arc<dyn PluginDispatch> = plugins.clone();
        let hooks = Arc::new(HookManager::new(Arc::clone(&resolver), dispatcher));
        let context_menu = Arc::new(ContextMenuManager::new(Arc::clone(&hooks)));

        let highlite = Self {
            config,
            resolver,
            hooks,
            context_menu,
            plugins,
            storage,
            poller: Mutex::new(None),
        };
        highlite.register_login_overrides(links)?;
        highlite.register_default_hooks();
        highlite.bind_context_menus();
        info!(
            aliases = highlite.resolver.aliases().len(),
            hooks = highlite.hooks.registrations().len(),
            "highlite initialized"
        );
        Ok(highlite)
    }

    fn register_login_overrides(&self, links: Arc<dyn LinkOpener>) -> Result<(), HookError> {
        let register_url = self.config.links.register_url.clone();
        let home_url = self.config.links.home_url.clone();
        let handler = move |event: &str, _args: &[serde_json::Value]| -> anyhow::Result<serde_json::Value> {
            let url = match event {
                "LoginScreen_handleRegisterButtonClicked" => &register_url,
                "LoginScreen_handleHomeButtonClicked" => &home_url,
                other => anyhow::bail!("no link for {other}"),
            };
            links.open(url)?;
            Ok(serde_json::Value::Null)
        };
        let handler = Arc::new(handler);

        for method in ["_handleRegisterButtonClicked", "_handleHomeButtonClicked"] {
            let handler = Arc::clone(&handler);
            self.hooks.override_method(
                HookTarget::instance(LOGIN_SCREEN, method),
                "login_links",
                move |event, args| handler(event, args),
            )?;
        }
        Ok(())
    }

    fn register_default_hooks(&self) {
        for (alias, method) in DEFAULT_HOOKS {
            self.hooks.register_hook(alias, method);
        }
        for (alias, method) in DEFAULT_STATIC_HOOKS {
            self.hooks.register_static_hook(alias, method);
        }
    }

    fn bind_context_menus(&self) {
        self.context_menu.register_context_hook(
            CONTEXT_MENU,
            "_createInventoryItemContextMenuItems",
            MenuContext::Inventory,
        );
        self.context_menu.register_context_hook(
            CONTEXT_MENU,
            "_createGameWorldContextMenuItems",
            MenuContext::GameWorld,
        );
        self.context_menu
            .register_action_sorting(TARGET_ACTIONS, "getActionsAndEntitiesAtMousePointer");
    }

    /// Add a plugin. Only meaningful before [`Highlite::start`].
    pub fn register_plugin(&self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        self.plugins.register(plugin)
    }

    pub fn context(&self) -> PluginContext {
        PluginContext {
            resolver: Arc::clone(&self.resolver),
            hooks: Arc::clone(&self.hooks),
            context_menu: Arc::clone(&self.context_menu),
            storage: Arc::clone(&self.storage),
        }
    }

    /// Run every lifecycle phase, then keep resolving aliases in the
    /// background while any are pending.
    pub fn start(&self) -> Result<Vec<PhaseReport>, PluginError> {
        info!("highlite starting");
        let ctx = self.context();
        let mut reports = vec![self.plugins.init_all(&ctx)];
        reports.push(self.plugins.post_init_all(&ctx)?);
        reports.push(self.plugins.start_all(&ctx));

        self.hooks.install_pending();
        self.spawn_poller();
        Ok(reports)
    }

    fn spawn_poller(&self) {
        let mut poller = self.poller.lock();
        if poller.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        if !self.resolver.has_pending() {
            return;
        }
        if tokio::runtime::Handle::try_current().is_err() {
            warn!("no async runtime; aliases resolve only on explicit poll");
            return;
        }
        let interval = Duration::from_millis(self.config.resolver.poll_interval_ms.max(1));
        *poller = Some(spawn_poller(Arc::clone(&self.hooks), interval));
    }

    /// Close every plugin's dispatch gate. Patches stay installed.
    pub fn stop(&self) -> PhaseReport {
        info!("highlite stopping");
        self.plugins.stop_all(&self.context())
    }

    /// Stop, then start again without re-running init.
    pub fn reload(&self) -> PhaseReport {
        let stopped = self.stop();
        if !stopped.failed.is_empty() {
            warn!(failed = stopped.failed.len(), "plugins failed to stop during reload");
        }
        self.plugins.start_all(&self.context())
    }

    /// One synchronous resolution round; the background poller does the
    /// same on a timer.
    pub fn poll(&self) -> PollOutcome {
        self.hooks.poll()
    }

    /// Wait for the background poller to finish. Returns immediately when
    /// none is running.
    pub async fn settle(&self) {
        let handle = self.poller.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "resolver poller ended abnormally");
            }
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ClassResolver> {
        &self.resolver
    }

    pub fn hooks(&self) -> &Arc<HookManager> {
        &self.hooks
    }

    pub fn context_menu(&self) -> &Arc<ContextMenuManager> {
        &self.context_menu
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }
}

impl Drop for Highlite {
    fn drop(&mut self) {
        if let Some(handle) = self.poller.get_mut().take() {
            handle.abort();
        }
    }
}
