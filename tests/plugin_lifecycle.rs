use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use highlite::hooks::{HookEvent, HookTarget};
use highlite::plugins::{Plugin, PluginContext, PluginState, SettingDescriptor, SettingValue, Settings};
use highlite::storage::MemoryStorage;
use highlite::target::mock::MockClient;
use highlite::target::MethodScope;
use highlite::{Config, Highlite, PluginError};

type Journal = Arc<Mutex<Vec<String>>>;

struct Recorder {
    name: String,
    journal: Journal,
    fail_init: bool,
    settings: Settings,
}

impl Recorder {
    fn new(name: &str, journal: &Journal) -> Self {
        Self {
            name: name.to_string(),
            journal: Arc::clone(journal),
            fail_init: false,
            settings: Settings::new(),
        }
    }

    fn note(&self, what: &str) {
        self.journal.lock().push(format!("{}:{what}", self.name));
    }
}

impl Plugin for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn author(&self) -> &str {
        "integration"
    }

    fn settings(&self) -> Settings {
        self.settings.clone()
    }

    fn event_handlers(&self) -> Vec<String> {
        vec!["GameLoop_update".into()]
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.note("init");
        if self.fail_init {
            anyhow::bail!("init failed on purpose");
        }
        ctx.hooks.register_hook("GameLoop", "_update");
        Ok(())
    }

    fn post_init(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.note("post_init");
        Ok(())
    }

    fn start(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.note("start");
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        self.note("stop");
        Ok(())
    }

    fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<()> {
        self.note(&format!("event:{}", event.name()));
        Ok(())
    }
}

fn boot() -> (MockClient, Highlite) {
    let client = MockClient::new();
    let mut config = Config::default();
    config.plugins.account_settings = false;
    let highlite = Highlite::new(config, client.namespace(), Arc::new(MemoryStorage::new())).unwrap();
    (client, highlite)
}

fn entries(journal: &Journal, plugin: &str) -> Vec<String> {
    journal
        .lock()
        .iter()
        .filter_map(|e| e.strip_prefix(&format!("{plugin}:")).map(str::to_string))
        .collect()
}

#[tokio::test]
async fn phases_are_ordered_and_failed_init_is_excluded() {
    let journal = Journal::default();
    let (client, highlite) = boot();
    highlite.register_plugin(Box::new(Recorder::new("Good", &journal))).unwrap();
    let mut bad = Recorder::new("Bad", &journal);
    bad.fail_init = true;
    highlite.register_plugin(Box::new(bad)).unwrap();

    let reports = highlite.start().unwrap();
    assert_eq!(reports[0].failed, vec!["Bad"]);

    client.boot_game();
    highlite.poll();
    client
        .namespace()
        .class("SW")
        .unwrap()
        .instantiate(Value::Null)
        .call("_update", &[json!(16)])
        .unwrap();

    assert_eq!(
        entries(&journal, "Good"),
        vec!["init", "post_init", "start", "event:GameLoop_update"]
    );
    assert_eq!(entries(&journal, "Bad"), vec!["init"]);
    assert_eq!(highlite.plugins().state("Bad"), Some(PluginState::Failed));
}

#[tokio::test]
async fn stop_then_start_reenables_without_rewrapping() {
    let journal = Journal::default();
    let (client, highlite) = boot();
    highlite.register_plugin(Box::new(Recorder::new("P", &journal))).unwrap();
    highlite.start().unwrap();
    client.boot_game();
    highlite.poll();

    let game_loop_class = client.namespace().class("SW").unwrap();
    let game_loop = game_loop_class.instantiate(Value::Null);
    let patches_before = highlite.hooks().patch_count();

    highlite.stop();
    highlite.stop();
    game_loop.call("_update", &[]).unwrap();
    assert!(!entries(&journal, "P").iter().any(|e| e.starts_with("event")));

    highlite.reload();
    game_loop.call("_update", &[]).unwrap();

    assert_eq!(highlite.hooks().patch_count(), patches_before);
    assert_eq!(game_loop_class.wrap_count(MethodScope::Instance, "_update"), 1);
    assert!(highlite.hooks().is_installed(&HookTarget::instance("GameLoop", "_update")));
    assert_eq!(
        entries(&journal, "P"),
        vec!["init", "post_init", "start", "stop", "start", "event:GameLoop_update"]
    );
}

#[tokio::test]
async fn settings_round_trip_through_the_manager() {
    let journal = Journal::default();
    let (_client, highlite) = boot();
    let recorder = Recorder::new("P", &journal);
    let changes = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&changes);
    recorder.settings.insert(
        "volume",
        SettingDescriptor::text("Volume", "5").on_change(move |key: &str, value: &SettingValue| {
            sink.lock().push(format!("{key}={value}"));
        }),
    );
    highlite.register_plugin(Box::new(recorder)).unwrap();

    highlite
        .plugins()
        .update_setting("P", "volume", SettingValue::Text("7".into()))
        .unwrap();
    assert_eq!(*changes.lock(), vec!["volume=7"]);

    let err = highlite
        .plugins()
        .update_setting("P", "volume", SettingValue::Checkbox(true))
        .unwrap_err();
    assert!(matches!(err, PluginError::SettingKindMismatch { .. }));
    assert_eq!(
        highlite.plugins().update_setting("Nobody", "volume", SettingValue::Button),
        Err(PluginError::UnknownPlugin("Nobody".into()))
    );
}

#[tokio::test]
async fn duplicate_plugin_names_are_rejected() {
    let journal = Journal::default();
    let (_client, highlite) = boot();
    highlite.register_plugin(Box::new(Recorder::new("P", &journal))).unwrap();
    assert_eq!(
        highlite.register_plugin(Box::new(Recorder::new("P", &journal))),
        Err(PluginError::DuplicatePlugin("P".into()))
    );
}
