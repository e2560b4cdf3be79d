use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::PluginError;
use crate::hooks::{HookEvent, PluginDispatch};
use crate::util::{isolate, Fault};

use super::settings::{SettingValue, SettingView, Settings};
use super::traits::{Plugin, PluginContext, PluginInfo, PluginState};

/// One lifecycle step driven across every plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Init,
    PostInit,
    Start,
    Stop,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PostInit => "post_init",
            Self::Start => "start",
            Self::Stop => "stop",
        }
    }

    fn applies_to(self, state: PluginState) -> bool {
        match self {
            Self::Init => state == PluginState::Constructed,
            Self::PostInit => state == PluginState::Initialized,
            Self::Start => matches!(state, PluginState::PostInitialized | PluginState::Stopped),
            Self::Stop => state == PluginState::Started,
        }
    }

    fn next_state(self) -> PluginState {
        match self {
            Self::Init => PluginState::Initialized,
            Self::PostInit => PluginState::PostInitialized,
            Self::Start => PluginState::Started,
            Self::Stop => PluginState::Stopped,
        }
    }

    fn run(self, plugin: &mut dyn Plugin, ctx: &PluginContext) -> anyhow::Result<()> {
        match self {
            Self::Init => plugin.init(ctx),
            Self::PostInit => plugin.post_init(ctx),
            Self::Start => plugin.start(ctx),
            Self::Stop => plugin.stop(ctx),
        }
    }
}

/// Outcome of one `*_all` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub advanced: Vec<String>,
    pub failed: Vec<String>,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            advanced: Vec::new(),
            failed: Vec::new(),
        }
    }
}

struct PluginSlot {
    name: String,
    author: String,
    handlers: HashSet<String>,
    settings: Settings,
    state: Mutex<PluginState>,
    plugin: Mutex<Box<dyn Plugin>>,
}

impl PluginSlot {
    fn state(&self) -> PluginState {
        *self.state.lock()
    }

    fn set_state(&self, state: PluginState) {
        *self.state.lock() = state;
    }

    fn info(&self) -> PluginInfo {
        let mut event_handlers: Vec<String> = self.handlers.iter().cloned().collect();
        event_handlers.sort();
        PluginInfo {
            name: self.name.clone(),
            author: self.author.clone(),
            state: self.state(),
            event_handlers,
        }
    }
}

/// Ordered plugin registry and lifecycle driver.
///
/// Also the [`PluginDispatch`] sink of the hook layer: each hook firing is
/// routed to the Started plugins that declared its canonical event name.
#[derive(Default)]
pub struct PluginManager {
    slots: RwLock<Vec<Arc<PluginSlot>>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a plugin in the Constructed state. The capability table and
    /// settings handle are captured here, once.
    pub fn register(&self, plugin: Box<dyn Plugin>) -> Result<(), PluginError> {
        let name = plugin.name().to_string();
        let mut slots = self.slots.write();
        if slots.iter().any(|slot| slot.name == name) {
            return Err(PluginError::DuplicatePlugin(name));
        }

        let slot = PluginSlot {
            author: plugin.author().to_string(),
            handlers: plugin.event_handlers().into_iter().collect(),
            settings: plugin.settings(),
            state: Mutex::new(PluginState::Constructed),
            plugin: Mutex::new(plugin),
            name,
        };
        debug!(plugin = %slot.name, handlers = slot.handlers.len(), "plugin registered");
        slots.push(Arc::new(slot));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    fn slot(&self, name: &str) -> Result<Arc<PluginSlot>, PluginError> {
        self.slots
            .read()
            .iter()
            .find(|slot| slot.name == name)
            .cloned()
            .ok_or_else(|| PluginError::UnknownPlugin(name.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<PluginSlot>> {
        self.slots.read().clone()
    }

    pub fn state(&self, name: &str) -> Option<PluginState> {
        self.slot(name).ok().map(|slot| slot.state())
    }

    pub fn plugins(&self) -> Vec<PluginInfo> {
        self.snapshot().iter().map(|slot| slot.info()).collect()
    }

    pub fn init_all(&self, ctx: &PluginContext) -> PhaseReport {
        self.run_phase(Phase::Init, ctx)
    }

    /// Refuses to run while any plugin has not been through `init`.
    pub fn post_init_all(&self, ctx: &PluginContext) -> Result<PhaseReport, PluginError> {
        if let Some(slot) = self
            .snapshot()
            .into_iter()
            .find(|slot| slot.state() == PluginState::Constructed)
        {
            return Err(PluginError::PhaseOrder {
                phase: Phase::PostInit.label(),
                plugin: slot.name.clone(),
            });
        }
        Ok(self.run_phase(Phase::PostInit, ctx))
    }

    pub fn start_all(&self, ctx: &PluginContext) -> PhaseReport {
        self.run_phase(Phase::Start, ctx)
    }

    /// Closes the dispatch gate. Installed patches stay in place.
    pub fn stop_all(&self, ctx: &PluginContext) -> PhaseReport {
        self.run_phase(Phase::Stop, ctx)
    }

    fn run_phase(&self, phase: Phase, ctx: &PluginContext) -> PhaseReport {
        let mut report = PhaseReport::new(phase);

        for slot in self.snapshot() {
            if !phase.applies_to(slot.state()) {
                continue;
            }

            let outcome = {
                let mut plugin = slot.plugin.lock();
                isolate(|| phase.run(&mut **plugin, ctx))
            };
            match outcome {
                Ok(()) => {
                    slot.set_state(phase.next_state());
                    debug!(plugin = %slot.name, phase = phase.label(), "plugin advanced");
                    report.advanced.push(slot.name.clone());
                }
                Err(fault) => {
                    slot.set_state(PluginState::Failed);
                    match &fault {
                        Fault::Error(_) => {
                            warn!(plugin = %slot.name, phase = phase.label(), error = %fault, "plugin failed; disabled for this session");
                        }
                        Fault::Panic(_) => {
                            error!(plugin = %slot.name, phase = phase.label(), error = %fault, "plugin panicked; disabled for this session");
                        }
                    }
                    report.failed.push(slot.name.clone());
                }
            }
        }

        info!(
            phase = phase.label(),
            advanced = report.advanced.len(),
            failed = report.failed.len(),
            "plugin phase complete"
        );
        report
    }

    /// Visible settings of `plugin`, after letting it refresh them.
    pub fn settings_view(&self, plugin: &str) -> Result<Vec<SettingView>, PluginError> {
        let slot = self.slot(plugin)?;
        // A plugin mid-call keeps its current presentation.
        if let Some(mut instance) = slot.plugin.try_lock() {
            instance.refresh_settings();
        }
        Ok(slot.settings.view())
    }

    /// UI write path. Fires the setting's change callback synchronously;
    /// a failing callback is logged and the write still stands.
    pub fn update_setting(&self, plugin: &str, key: &str, value: SettingValue) -> Result<(), PluginError> {
        let slot = self.slot(plugin)?;
        if let Some(fault) = slot.settings.write(key, value)? {
            report_setting_fault(&slot.name, key, &fault);
        }
        Ok(())
    }

    pub fn press_button(&self, plugin: &str, key: &str) -> Result<(), PluginError> {
        let slot = self.slot(plugin)?;
        if let Some(fault) = slot.settings.trigger(key)? {
            report_setting_fault(&slot.name, key, &fault);
        }
        Ok(())
    }
}

fn report_setting_fault(plugin: &str, key: &str, fault: &Fault) {
    match fault {
        Fault::Error(_) => {
            warn!(plugin, setting = key, error = %fault, "plugin setting callback failed");
        }
        Fault::Panic(_) => {
            error!(plugin, setting = key, error = %fault, "plugin setting callback panicked");
        }
    }
}

impl PluginDispatch for PluginManager {
    fn dispatch(&self, event: &HookEvent) {
        let name = event.name();
        let targets: Vec<Arc<PluginSlot>> = self
            .slots
            .read()
            .iter()
            .filter(|slot| slot.handlers.contains(&name))
            .cloned()
            .collect();

        for slot in targets {
            if !slot.state().receives_events() {
                continue;
            }
            let Some(mut plugin) = slot.plugin.try_lock() else {
                debug!(plugin = %slot.name, event = %name, "plugin already handling a call; skipping re-entrant event");
                continue;
            };
            match isolate(|| plugin.on_event(event)) {
                Ok(()) => {}
                Err(fault @ Fault::Error(_)) => {
                    warn!(plugin = %slot.name, event = %name, error = %fault, "plugin event handler failed");
                }
                Err(fault @ Fault::Panic(_)) => {
                    error!(plugin = %slot.name, event = %name, error = %fault, "plugin event handler panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context_menu::ContextMenuManager;
    use crate::hooks::{HookManager, NoDispatch};
    use crate::plugins::settings::SettingDescriptor;
    use crate::resolver::ClassResolver;
    use crate::storage::MemoryStorage;
    use crate::target::Namespace;
    use serde_json::json;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        name: &'static str,
        log: Log,
        fail_on: Option<Phase>,
        panic_on_event: bool,
        settings: Settings,
    }

    impl Scripted {
        fn new(name: &'static str, log: &Log) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                fail_on: None,
                panic_on_event: false,
                settings: Settings::new(),
            }
        }

        fn failing(mut self, phase: Phase) -> Self {
            self.fail_on = Some(phase);
            self
        }

        fn step(&self, phase: Phase) -> anyhow::Result<()> {
            self.log.lock().push(format!("{}:{}", self.name, phase.label()));
            if self.fail_on == Some(phase) {
                anyhow::bail!("{} refuses to {}", self.name, phase.label());
            }
            Ok(())
        }
    }

    impl Plugin for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        fn author(&self) -> &str {
            "tests"
        }

        fn settings(&self) -> Settings {
            self.settings.clone()
        }

        fn event_handlers(&self) -> Vec<String> {
            vec!["SocketManager_loggedIn".into()]
        }

        fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.step(Phase::Init)
        }

        fn post_init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.step(Phase::PostInit)
        }

        fn start(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.step(Phase::Start)
        }

        fn stop(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            self.step(Phase::Stop)
        }

        fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<()> {
            assert!(!self.panic_on_event, "{} blew up", self.name);
            self.log.lock().push(format!("{}:event:{}", self.name, event.name()));
            Ok(())
        }
    }

    fn context() -> PluginContext {
        let resolver = Arc::new(ClassResolver::new(Arc::new(Namespace::new()), 5));
        let hooks = Arc::new(HookManager::new(Arc::clone(&resolver), Arc::new(NoDispatch)));
        PluginContext {
            context_menu: Arc::new(ContextMenuManager::new(Arc::clone(&hooks))),
            resolver,
            hooks,
            storage: Arc::new(MemoryStorage::new()),
        }
    }

    fn logged_in() -> HookEvent {
        HookEvent {
            class_alias: "SocketManager".into(),
            method_name: "_loggedIn".into(),
            payload: vec![json!({"username": "zezima"})],
        }
    }

    #[test]
    fn failed_init_is_excluded_from_later_phases_and_events() {
        let log = Log::default();
        let manager = PluginManager::new();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();
        manager
            .register(Box::new(Scripted::new("B", &log).failing(Phase::Init)))
            .unwrap();
        manager.register(Box::new(Scripted::new("C", &log))).unwrap();
        let ctx = context();

        let report = manager.init_all(&ctx);
        assert_eq!(report.advanced, vec!["A", "C"]);
        assert_eq!(report.failed, vec!["B"]);

        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);
        manager.dispatch(&logged_in());

        let log = log.lock();
        assert!(!log.iter().any(|entry| entry.starts_with("B:") && entry != "B:init"));
        assert!(log.contains(&"A:event:SocketManager_loggedIn".to_string()));
        assert!(log.contains(&"C:event:SocketManager_loggedIn".to_string()));
        assert_eq!(manager.state("B"), Some(PluginState::Failed));
    }

    #[test]
    fn post_init_requires_every_plugin_initialized() {
        let log = Log::default();
        let manager = PluginManager::new();
        let ctx = context();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();
        manager.init_all(&ctx);
        manager.register(Box::new(Scripted::new("Late", &log))).unwrap();

        let err = manager.post_init_all(&ctx).unwrap_err();
        assert_eq!(
            err,
            PluginError::PhaseOrder {
                phase: "post_init",
                plugin: "Late".into()
            }
        );
        assert_eq!(manager.state("A"), Some(PluginState::Initialized));
    }

    #[test]
    fn phases_run_in_order_per_plugin() {
        let log = Log::default();
        let manager = PluginManager::new();
        let ctx = context();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();

        // Nothing to start before post_init.
        assert!(manager.start_all(&ctx).advanced.is_empty());
        manager.init_all(&ctx);
        assert!(manager.start_all(&ctx).advanced.is_empty());
        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);

        assert_eq!(*log.lock(), vec!["A:init", "A:post_init", "A:start"]);
        assert_eq!(manager.state("A"), Some(PluginState::Started));
    }

    #[test]
    fn stop_closes_gate_and_is_idempotent() {
        let log = Log::default();
        let manager = PluginManager::new();
        let ctx = context();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();
        manager.init_all(&ctx);
        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);

        assert_eq!(manager.stop_all(&ctx).advanced, vec!["A"]);
        assert!(manager.stop_all(&ctx).advanced.is_empty());
        manager.dispatch(&logged_in());
        assert!(!log.lock().iter().any(|e| e.contains("event")));

        manager.start_all(&ctx);
        manager.dispatch(&logged_in());
        assert_eq!(log.lock().iter().filter(|e| e.contains("event")).count(), 1);
    }

    #[test]
    fn panicking_event_handler_does_not_block_siblings() {
        let log = Log::default();
        let manager = PluginManager::new();
        let ctx = context();
        let mut bad = Scripted::new("Bad", &log);
        bad.panic_on_event = true;
        manager.register(Box::new(bad)).unwrap();
        manager.register(Box::new(Scripted::new("Good", &log))).unwrap();
        manager.init_all(&ctx);
        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);

        manager.dispatch(&logged_in());
        manager.dispatch(&logged_in());
        let events = log.lock().iter().filter(|e| e.starts_with("Good:event")).count();
        assert_eq!(events, 2);
        // Event faults are isolated; the plugin stays Started.
        assert_eq!(manager.state("Bad"), Some(PluginState::Started));
    }

    #[test]
    fn undeclared_events_are_not_delivered() {
        let log = Log::default();
        let manager = PluginManager::new();
        let ctx = context();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();
        manager.init_all(&ctx);
        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);

        manager.dispatch(&HookEvent {
            class_alias: "GameLoop".into(),
            method_name: "_update".into(),
            payload: vec![],
        });
        assert!(!log.lock().iter().any(|e| e.contains("event")));
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let log = Log::default();
        let manager = PluginManager::new();
        manager.register(Box::new(Scripted::new("A", &log))).unwrap();
        let err = manager.register(Box::new(Scripted::new("A", &log))).unwrap_err();
        assert_eq!(err, PluginError::DuplicatePlugin("A".into()));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn settings_are_reachable_by_plugin_name() {
        let log = Log::default();
        let manager = PluginManager::new();
        let plugin = Scripted::new("A", &log);
        plugin
            .settings
            .insert("enabled", SettingDescriptor::checkbox("Enabled", true));
        plugin
            .settings
            .insert("secret", SettingDescriptor::text("Secret", "x").hidden());
        manager.register(Box::new(plugin)).unwrap();

        let view = manager.settings_view("A").unwrap();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].key, "enabled");

        manager
            .update_setting("A", "enabled", SettingValue::Checkbox(false))
            .unwrap();
        assert_eq!(
            manager.settings_view("A").unwrap()[0].value,
            SettingValue::Checkbox(false)
        );
        assert!(matches!(
            manager.settings_view("Nope"),
            Err(PluginError::UnknownPlugin(_))
        ));
    }

    #[test]
    fn panicking_setting_callback_stays_inside_the_manager() {
        let log = Log::default();
        let manager = PluginManager::new();
        let plugin = Scripted::new("A", &log);
        plugin.settings.insert(
            "k",
            SettingDescriptor::checkbox("K", false).on_change(|_, _| panic!("plugin bug")),
        );
        plugin
            .settings
            .insert("go", SettingDescriptor::button("Go").on_change(|_, _| panic!("plugin bug")));
        manager.register(Box::new(plugin)).unwrap();

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            manager.update_setting("A", "k", SettingValue::Checkbox(true))
        }));
        assert_eq!(outcome.ok(), Some(Ok(())));
        assert_eq!(
            manager.settings_view("A").unwrap()[0].value,
            SettingValue::Checkbox(true)
        );
        assert_eq!(manager.press_button("A", "go"), Ok(()));
    }

    struct Reentrant {
        log: Log,
        manager: Arc<Mutex<Option<Arc<PluginManager>>>>,
    }

    impl Plugin for Reentrant {
        fn name(&self) -> &str {
            "Reentrant"
        }

        fn author(&self) -> &str {
            "tests"
        }

        fn event_handlers(&self) -> Vec<String> {
            vec!["SocketManager_loggedIn".into()]
        }

        fn init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn start(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn stop(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
            Ok(())
        }

        fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<()> {
            self.log.lock().push("Reentrant:event".into());
            // Same hook fires again while this plugin is still running.
            let manager = self.manager.lock().clone();
            if let Some(manager) = manager {
                manager.dispatch(event);
            }
            Ok(())
        }
    }

    #[test]
    fn reentrant_event_skips_the_running_plugin_only() {
        let log = Log::default();
        let manager = Arc::new(PluginManager::new());
        let handle = Arc::new(Mutex::new(None));
        manager
            .register(Box::new(Reentrant {
                log: Arc::clone(&log),
                manager: Arc::clone(&handle),
            }))
            .unwrap();
        manager.register(Box::new(Scripted::new("Other", &log))).unwrap();
        *handle.lock() = Some(Arc::clone(&manager));

        let ctx = context();
        manager.init_all(&ctx);
        manager.post_init_all(&ctx).unwrap();
        manager.start_all(&ctx);
        manager.dispatch(&logged_in());
        // Break the test-only cycle.
        handle.lock().take();

        let log = log.lock();
        let count = |prefix: &str| log.iter().filter(|e| e.starts_with(prefix)).count();
        assert_eq!(count("Reentrant:event"), 1);
        assert_eq!(count("Other:event"), 2);
        assert_eq!(manager.state("Reentrant"), Some(PluginState::Started));
    }
}
