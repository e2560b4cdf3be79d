//! In-process stand-in for the game client, used by the CLI `simulate`
//! command and the integration tests.
//!
//! Classes are defined under the same obfuscated symbols the default alias
//! table expects, and appear in two waves (login screen first, game later)
//! the way the real client boots. Every original body that runs is recorded.

use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;

use super::{ClassObject, ClassRef, Namespace, Receiver, TargetError};

#[derive(Debug, Default)]
pub struct MockClient {
    namespace: Arc<Namespace>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn namespace(&self) -> Arc<Namespace> {
        Arc::clone(&self.namespace)
    }

    /// Original bodies that have run, as `<symbol>.<method>`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn class(&self, symbol: &str) -> Builder {
        Builder {
            symbol: symbol.to_string(),
            class: ClassObject::new(symbol),
            calls: Arc::clone(&self.calls),
        }
    }

    /// Define the login screen (`FW`).
    pub fn boot_login_screen(&self) -> ClassRef {
        let class = self
            .class("FW")
            .method("_handleRegisterButtonClicked", |_, _| Ok(json!("register-dialog")))
            .method("_handleHomeButtonClicked", |_, _| Ok(json!("home-dialog")))
            .build();
        self.namespace.define_class("FW", class)
    }

    /// Define the in-game classes and constant tables.
    pub fn boot_game(&self) {
        let game_loop = self
            .class("SW")
            .method("_update", |_, args| Ok(args.first().cloned().unwrap_or(Value::Null)))
            .method("_draw", |_, _| Ok(Value::Null))
            .build();
        self.namespace.define_class("SW", game_loop);

        let socket = self
            .class("$G")
            .method("_loggedIn", |receiver, args| {
                if let Some(instance) = receiver.instance() {
                    instance.set_state(json!({"username": args.first().and_then(|a| a.get("username")).cloned()}));
                }
                Ok(Value::Null)
            })
            .method("_handleLoggedOut", |receiver, _| {
                if let Some(instance) = receiver.instance() {
                    instance.set_state(Value::Null);
                }
                Ok(Value::Null)
            })
            .method("_handleEnteredIdleStateAction", |_, _| Ok(Value::Null))
            .method("_handleTradeRequestedPacket", |_, _| Ok(Value::Null))
            .method("_handleHealthRestoredPacket", |_, _| Ok(Value::Null))
            .method("_handleDisconnect", |_, _| Err(TargetError::thrown("connection reset")))
            .build();
        self.namespace.define_class("$G", socket);

        let chat = self
            .class("aH")
            .method("addChatMessage", |_, args| {
                let text = args.first().and_then(Value::as_str).unwrap_or_default();
                Ok(json!({"rendered": text}))
            })
            .build();
        self.namespace.define_class("aH", chat);

        let menus = self
            .class("cz")
            .method("_createInventoryItemContextMenuItems", |_, _| {
                Ok(json!([
                    {"action": "use", "label": "Use"},
                    {"action": "drop", "label": "Drop"},
                    {"action": "examine", "label": "Examine"}
                ]))
            })
            .method("_createGameWorldContextMenuItems", |_, _| {
                Ok(json!([
                    {"action": "walk_here", "label": "Walk here"},
                    {"action": "examine", "label": "Examine"}
                ]))
            })
            .build();
        self.namespace.define_class("cz", menus);

        let targets = self
            .class("GV")
            .static_method("handleTargetAction", |_, args| Ok(args.first().cloned().unwrap_or(Value::Null)))
            .static_method("getActionsAndEntitiesAtMousePointer", |_, _| {
                Ok(json!([
                    {"action": "walk_here", "entity": null},
                    {"action": "attack", "entity": 17},
                    {"action": "examine", "entity": 17}
                ]))
            })
            .build();
        self.namespace.define_class("GV", targets);

        self.namespace
            .define_value("VA", json!({"walk_here": 0, "attack": 1, "examine": 2, "pickup": 3}));
        self.namespace
            .define_value("QA", json!({"use": 0, "drop": 1, "examine": 2}));
        self.namespace
            .define_value("bA", json!(["hitpoints", "accuracy", "strength", "defense"]));
    }
}

struct Builder {
    symbol: String,
    class: ClassObject,
    calls: Arc<Mutex<Vec<String>>>,
}

impl Builder {
    fn traced<F>(&self, name: &str, body: F) -> impl Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static
    where
        F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        let label = format!("{}.{name}", self.symbol);
        let calls = Arc::clone(&self.calls);
        move |receiver: &Receiver, args: &[Value]| {
            calls.lock().push(label.clone());
            body(receiver, args)
        }
    }

    fn method<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        let traced = self.traced(name, body);
        self.class = self.class.with_method(name, traced);
        self
    }

    fn static_method<F>(mut self, name: &str, body: F) -> Self
    where
        F: Fn(&Receiver, &[Value]) -> Result<Value, TargetError> + Send + Sync + 'static,
    {
        let traced = self.traced(name, body);
        self.class = self.class.with_static(name, traced);
        self
    }

    fn build(self) -> ClassObject {
        self.class
    }
}
