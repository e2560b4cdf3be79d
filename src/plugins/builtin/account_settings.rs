use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::hooks::HookEvent;
use crate::plugins::settings::{SettingDescriptor, SettingValue, Settings};
use crate::plugins::traits::{Plugin, PluginContext};
use crate::storage::Storage;

const STORE: &str = "settings";
const LOGIN_MESSAGE: &str = "login_message";
const ACCOUNT_ID: &str = "account_id";
const LOGGED_IN: &str = "SocketManager_loggedIn";
const LOGGED_OUT: &str = "SocketManager_handleLoggedOut";

#[derive(Default)]
struct Session {
    logged_in: bool,
    username: String,
    /// Bumped on every login and logout so a late load can tell it is stale.
    generation: u64,
    storage: Option<Arc<dyn Storage>>,
}

struct Shared {
    prefix: String,
    settings: Settings,
    session: Mutex<Session>,
    /// Defaults for every persisted key, in declaration order.
    defaults: Mutex<Vec<(String, SettingValue)>>,
    loads: watch::Sender<u64>,
}

impl Shared {
    fn storage_key(&self, username: &str, key: &str) -> String {
        format!("{}_{username}_{key}", self.prefix)
    }

    fn update_visibility(&self) {
        let (logged_in, username) = {
            let session = self.session.lock();
            (session.logged_in, session.username.clone())
        };
        for (key, _) in self.defaults.lock().iter() {
            if key != ACCOUNT_ID {
                self.settings.set_hidden(key, !logged_in);
            }
        }
        self.settings.edit(LOGIN_MESSAGE, |p| {
            p.hidden = false;
            p.text = if logged_in {
                format!("Logged in as: {username}")
            } else {
                "Log in...".into()
            };
        });
    }

    fn restore(&self, key: &str, value: SettingValue) {
        if let Err(e) = self.settings.restore(key, value) {
            warn!(setting = key, error = %e, "could not restore setting");
        }
    }

    fn reset_to_defaults(&self) {
        for (key, value) in self.defaults.lock().clone() {
            self.restore(&key, value);
        }
    }

    /// Change callback for every persisted key.
    fn persist(self: &Arc<Self>, key: &str, value: &SettingValue) {
        let (storage, username) = {
            let session = self.session.lock();
            if !session.logged_in {
                debug!(setting = key, "not logged in; change not saved");
                return;
            }
            (session.storage.clone(), session.username.clone())
        };
        let Some(storage) = storage else {
            warn!(setting = key, "no storage available; change not saved");
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(setting = key, "no async runtime; change not saved");
            return;
        };

        let storage_key = self.storage_key(&username, key);
        let value = value.to_json();
        let setting = key.to_string();
        runtime.spawn(async move {
            match storage.put(STORE, value, &storage_key).await {
                Ok(()) => debug!(setting, "setting saved"),
                Err(e) => warn!(setting, error = %e, "failed to save setting"),
            }
        });
    }

    async fn load(self: Arc<Self>, storage: Arc<dyn Storage>, username: String, generation: u64) {
        let defaults = self.defaults.lock().clone();
        let reads = defaults.iter().map(|(key, _)| {
            let storage = Arc::clone(&storage);
            let storage_key = self.storage_key(&username, key);
            async move { storage.get(STORE, &storage_key).await }
        });
        let results = join_all(reads).await;

        let mut values = Vec::with_capacity(defaults.len());
        for ((key, default), result) in defaults.iter().zip(results) {
            let value = match result {
                Ok(Some(stored)) => default.from_json_like(&stored).unwrap_or_else(|| {
                    warn!(setting = %key, "stored value has the wrong type; using default");
                    default.clone()
                }),
                Ok(None) => {
                    debug!(setting = %key, "no saved value; using default");
                    default.clone()
                }
                Err(e) => {
                    warn!(setting = %key, error = %e, "failed to load setting; using default");
                    default.clone()
                }
            };
            values.push((key.clone(), value));
        }

        // Checked and applied under one lock: a logout lands either before
        // (this load is dropped) or after (its reset wins).
        let new_id = {
            let session = self.session.lock();
            if !session.logged_in || session.generation != generation {
                debug!(username, "discarding stale settings load");
                return;
            }
            for (key, value) in values {
                self.restore(&key, value);
            }
            self.assign_account_id()
        };

        if let Some(id) = new_id {
            let key = self.storage_key(&username, ACCOUNT_ID);
            if let Err(e) = storage.put(STORE, Value::String(id), &key).await {
                warn!(error = %e, "failed to save account id");
            }
        }
        info!(username, "account settings loaded");
        self.loads.send_modify(|n| *n += 1);
    }

    /// Generate an id when the account has none yet. Returns it for saving.
    fn assign_account_id(&self) -> Option<String> {
        let existing = self.settings.value(ACCOUNT_ID)?;
        if existing.as_str().is_some_and(|id| !id.is_empty()) {
            return None;
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.restore(ACCOUNT_ID, SettingValue::Text(id.clone()));
        Some(id)
    }
}

/// Login-gated, per-account settings.
///
/// Settings stay hidden until the client reports a login. The player's
/// saved values are then read from storage under
/// `<prefix>_<username>_<key>` and every later change is written back.
/// A hidden random account id is generated on first login.
pub struct AccountSettings {
    name: String,
    shared: Arc<Shared>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self::new("Account Settings", "account_settings")
            .with_checkbox("share_status", "Share status in chat", false)
            .with_checkbox("is_iron", "I am an Iron", false)
            .with_checkbox("is_hardcore", "I am Hardcore", false)
            .with_text("group_names", "Group mates", "")
    }
}

impl AccountSettings {
    pub fn new(name: &str, prefix: &str) -> Self {
        let settings = Settings::new();
        settings.insert(
            LOGIN_MESSAGE,
            SettingDescriptor::text("Log in...", "Please log in to access account settings").disabled(),
        );
        let (loads, _) = watch::channel(0);
        let plugin = Self {
            name: name.to_string(),
            shared: Arc::new(Shared {
                prefix: prefix.to_string(),
                settings,
                session: Mutex::new(Session::default()),
                defaults: Mutex::new(Vec::new()),
                loads,
            }),
        };
        plugin.with_persisted(ACCOUNT_ID, SettingDescriptor::text("Account id", "").hidden())
    }

    pub fn with_checkbox(self, key: &str, text: &str, default: bool) -> Self {
        self.with_persisted(key, SettingDescriptor::checkbox(text, default).hidden())
    }

    pub fn with_text(self, key: &str, text: &str, default: &str) -> Self {
        self.with_persisted(key, SettingDescriptor::text(text, default).hidden())
    }

    fn with_persisted(self, key: &str, mut descriptor: SettingDescriptor) -> Self {
        let weak = Arc::downgrade(&self.shared);
        descriptor.set_callback(Arc::new(move |key: &str, value: &SettingValue| {
            if let Some(shared) = weak.upgrade() {
                shared.persist(key, value);
            }
        }));
        self.shared
            .defaults
            .lock()
            .push((key.to_string(), descriptor.value().clone()));
        self.shared.settings.insert(key, descriptor);
        self
    }

    /// Completed-load counter; resolves waiters once saved values are applied.
    pub fn loads(&self) -> watch::Receiver<u64> {
        self.shared.loads.subscribe()
    }

    fn logged_in(&mut self, event: &HookEvent) {
        let username = event
            .payload
            .first()
            .and_then(|p| p.get("username").or(Some(p)))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown")
            .to_string();

        // Flag flips before the load starts so a quick logout wins.
        let (generation, storage) = {
            let mut session = self.shared.session.lock();
            session.logged_in = true;
            session.username = username.clone();
            session.generation += 1;
            (session.generation, session.storage.clone())
        };
        info!(plugin = %self.name, username, "player logged in");
        self.shared.update_visibility();

        let Some(storage) = storage else {
            warn!(plugin = %self.name, "no storage available; using defaults");
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(Arc::clone(&self.shared).load(storage, username, generation));
            }
            Err(_) => warn!(plugin = %self.name, "no async runtime; saved settings not loaded"),
        }
    }

    fn logged_out(&mut self) {
        let username = {
            let mut session = self.shared.session.lock();
            session.logged_in = false;
            session.generation += 1;
            std::mem::take(&mut session.username)
        };
        info!(plugin = %self.name, username, "player logged out");
        self.shared.reset_to_defaults();
        self.shared.update_visibility();
    }
}

impl Plugin for AccountSettings {
    fn name(&self) -> &str {
        &self.name
    }

    fn author(&self) -> &str {
        "Highlite"
    }

    fn settings(&self) -> Settings {
        self.shared.settings.clone()
    }

    fn event_handlers(&self) -> Vec<String> {
        vec![LOGGED_IN.into(), LOGGED_OUT.into()]
    }

    fn init(&mut self, ctx: &PluginContext) -> anyhow::Result<()> {
        self.shared.session.lock().storage = Some(Arc::clone(&ctx.storage));
        ctx.hooks.register_hook("SocketManager", "_loggedIn");
        ctx.hooks.register_hook("SocketManager", "_handleLoggedOut");
        self.shared.update_visibility();
        Ok(())
    }

    fn start(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        info!(plugin = %self.name, "started");
        Ok(())
    }

    fn stop(&mut self, _ctx: &PluginContext) -> anyhow::Result<()> {
        info!(plugin = %self.name, "stopped");
        Ok(())
    }

    fn on_event(&mut self, event: &HookEvent) -> anyhow::Result<()> {
        match event.name().as_str() {
            LOGGED_IN => self.logged_in(event),
            LOGGED_OUT => self.logged_out(),
            other => debug!(plugin = %self.name, event = other, "unhandled event"),
        }
        Ok(())
    }

    fn refresh_settings(&mut self) {
        self.shared.update_visibility();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    fn login(name: &str) -> HookEvent {
        HookEvent {
            class_alias: "SocketManager".into(),
            method_name: "_loggedIn".into(),
            payload: vec![json!({"username": name})],
        }
    }

    fn logout() -> HookEvent {
        HookEvent {
            class_alias: "SocketManager".into(),
            method_name: "_handleLoggedOut".into(),
            payload: vec![],
        }
    }

    fn with_storage(plugin: &AccountSettings, storage: &Arc<MemoryStorage>) {
        let storage: Arc<dyn Storage> = storage.clone();
        plugin.shared.session.lock().storage = Some(storage);
    }

    async fn wait_loads(rx: &mut watch::Receiver<u64>, n: u64) {
        tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|v| *v >= n))
            .await
            .expect("load should finish")
            .unwrap();
    }

    #[test]
    fn settings_hidden_until_login() {
        let plugin = AccountSettings::default();
        plugin.shared.update_visibility();
        let keys: Vec<String> = plugin.settings().view().into_iter().map(|v| v.key).collect();
        assert_eq!(keys, vec![LOGIN_MESSAGE]);
    }

    #[tokio::test]
    async fn login_loads_saved_values_and_generates_id() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put(STORE, json!(true), "account_settings_zezima_is_iron")
            .await
            .unwrap();
        let mut plugin = AccountSettings::default();
        with_storage(&plugin, &storage);
        let mut loads = plugin.loads();

        plugin.on_event(&login("zezima")).unwrap();
        wait_loads(&mut loads, 1).await;

        let settings = plugin.settings();
        assert_eq!(settings.value("is_iron"), Some(SettingValue::Checkbox(true)));
        assert_eq!(settings.value("is_hardcore"), Some(SettingValue::Checkbox(false)));
        let id = settings.value(ACCOUNT_ID).unwrap();
        assert!(uuid::Uuid::parse_str(id.as_str().unwrap()).is_ok());
        assert!(
            storage
                .get(STORE, "account_settings_zezima_account_id")
                .await
                .unwrap()
                .is_some()
        );

        let visible: Vec<String> = settings.view().into_iter().map(|v| v.key).collect();
        assert!(visible.contains(&"is_iron".to_string()));
        assert!(!visible.contains(&ACCOUNT_ID.to_string()));
        assert_eq!(settings.get(LOGIN_MESSAGE).unwrap().presentation.text, "Logged in as: zezima");
    }

    #[tokio::test]
    async fn changes_are_saved_only_while_logged_in() {
        let storage = Arc::new(MemoryStorage::new());
        let mut plugin = AccountSettings::default();
        with_storage(&plugin, &storage);
        let settings = plugin.settings();

        settings.set("is_iron", SettingValue::Checkbox(true)).unwrap();
        tokio::task::yield_now().await;
        assert!(storage.is_empty(STORE));

        let mut loads = plugin.loads();
        plugin.on_event(&login("zezima")).unwrap();
        wait_loads(&mut loads, 1).await;
        settings
            .set("group_names", SettingValue::Text("alice,bob".into()))
            .unwrap();

        let saved = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(v) = storage
                    .get(STORE, "account_settings_zezima_group_names")
                    .await
                    .unwrap()
                {
                    break v;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("change should be persisted");
        assert_eq!(saved, json!("alice,bob"));
    }

    #[tokio::test]
    async fn logout_resets_and_hides() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put(STORE, json!(true), "account_settings_zezima_is_iron")
            .await
            .unwrap();
        let mut plugin = AccountSettings::default();
        with_storage(&plugin, &storage);
        let mut loads = plugin.loads();

        plugin.on_event(&login("zezima")).unwrap();
        wait_loads(&mut loads, 1).await;
        plugin.on_event(&logout()).unwrap();

        let settings = plugin.settings();
        assert_eq!(settings.value("is_iron"), Some(SettingValue::Checkbox(false)));
        assert_eq!(settings.view().len(), 1);
        assert_eq!(settings.get(LOGIN_MESSAGE).unwrap().presentation.text, "Log in...");
    }

    #[tokio::test]
    async fn stale_load_is_discarded_after_logout() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .put(STORE, json!(true), "account_settings_zezima_is_iron")
            .await
            .unwrap();
        let mut plugin = AccountSettings::default();
        with_storage(&plugin, &storage);

        // On a current-thread runtime the spawned load cannot run before logout.
        plugin.on_event(&login("zezima")).unwrap();
        plugin.on_event(&logout()).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(plugin.settings().value("is_iron"), Some(SettingValue::Checkbox(false)));
        assert_eq!(*plugin.loads().borrow(), 0);
    }

    /// Storage whose reads wait until the test lets them through.
    struct GatedStorage {
        inner: MemoryStorage,
        gate: tokio::sync::Semaphore,
        reads_done: std::sync::atomic::AtomicUsize,
    }

    impl GatedStorage {
        fn new() -> Self {
            Self {
                inner: MemoryStorage::new(),
                gate: tokio::sync::Semaphore::new(0),
                reads_done: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn reads_done(&self) -> usize {
            self.reads_done.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl Storage for GatedStorage {
        async fn get(&self, store: &str, key: &str) -> anyhow::Result<Option<Value>> {
            let _permit = self.gate.acquire().await?;
            let value = self.inner.get(store, key).await;
            self.reads_done.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            value
        }

        async fn put(&self, store: &str, value: Value, key: &str) -> anyhow::Result<()> {
            self.inner.put(store, value, key).await
        }
    }

    #[tokio::test]
    async fn logout_during_load_keeps_previous_account_out() {
        let storage = Arc::new(GatedStorage::new());
        storage
            .put(STORE, json!(true), "account_settings_zezima_is_iron")
            .await
            .unwrap();
        storage
            .put(STORE, json!("zezima-id"), "account_settings_zezima_account_id")
            .await
            .unwrap();
        let mut plugin = AccountSettings::default();
        let shared_storage: Arc<dyn Storage> = storage.clone();
        plugin.shared.session.lock().storage = Some(shared_storage);
        let reads_per_load = plugin.shared.defaults.lock().len();
        let mut loads = plugin.loads();

        plugin.on_event(&login("zezima")).unwrap();
        // Let the load start its reads, then log out while they are blocked.
        tokio::task::yield_now().await;
        plugin.on_event(&logout()).unwrap();
        storage.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(2), async {
            while storage.reads_done() < reads_per_load {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("reads should complete");
        tokio::task::yield_now().await;

        let settings = plugin.settings();
        assert_eq!(settings.value("is_iron"), Some(SettingValue::Checkbox(false)));
        assert_eq!(settings.value(ACCOUNT_ID), Some(SettingValue::Text(String::new())));
        assert_eq!(*loads.borrow(), 0);

        // A different player with nothing saved gets defaults and a fresh id.
        plugin.on_event(&login("lynx")).unwrap();
        wait_loads(&mut loads, 1).await;
        assert_eq!(settings.value("is_iron"), Some(SettingValue::Checkbox(false)));
        let id = settings.value(ACCOUNT_ID).unwrap();
        let id = id.as_str().unwrap();
        assert!(!id.is_empty());
        assert_ne!(id, "zezima-id");
    }

    #[tokio::test]
    async fn missing_values_fall_back_to_defaults_on_login() {
        let storage = Arc::new(MemoryStorage::new());
        let mut plugin = AccountSettings::default();
        with_storage(&plugin, &storage);
        plugin
            .settings()
            .restore("is_hardcore", SettingValue::Checkbox(true))
            .unwrap();
        let mut loads = plugin.loads();

        plugin.on_event(&login("lynx")).unwrap();
        wait_loads(&mut loads, 1).await;
        assert_eq!(
            plugin.settings().value("is_hardcore"),
            Some(SettingValue::Checkbox(false))
        );
    }
}
