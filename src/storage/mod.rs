//! Persisted key-value storage consumed by plugins.
//!
//! The framework itself never persists anything; plugins that want their
//! settings to survive a session go through this trait. Keys are namespaced
//! by store name.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

#[async_trait]
pub trait Storage: Send + Sync {
    /// `None` when nothing was ever stored under `key`.
    async fn get(&self, store: &str, key: &str) -> anyhow::Result<Option<Value>>;

    async fn put(&self, store: &str, value: Value, key: &str) -> anyhow::Result<()>;
}

/// Process-local storage. Used by the CLI and tests.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: Mutex<HashMap<String, HashMap<String, Value>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, store: &str) -> usize {
        self.stores.lock().get(store).map_or(0, HashMap::len)
    }

    pub fn is_empty(&self, store: &str) -> bool {
        self.len(store) == 0
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn get(&self, store: &str, key: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .stores
            .lock()
            .get(store)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn put(&self, store: &str, value: Value, key: &str) -> anyhow::Result<()> {
        self.stores
            .lock()
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }
}
