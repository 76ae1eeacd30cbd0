use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::errors::{CoreError, Result};

/// Persisted key-value store used for token blobs, user profile fields and settings.
///
/// Keys are dotted paths (`user.tokenstore`, `user.gamertag`). Deleting a key also
/// deletes every key nested below it, so `delete("user")` wipes the whole user section.
#[async_trait::async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` when absent
    async fn get(&self, key: &str) -> Option<Value>;

    /// Write a value, replacing any previous one
    async fn set(&self, key: &str, value: Value) -> Result<()>;

    /// Remove a value and everything nested under it
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read a value or fall back to `default`
    async fn get_or(&self, key: &str, default: Value) -> Value {
        self.get(key).await.unwrap_or(default)
    }
}

/// Returns true when `candidate` is `key` itself or nested below it.
pub(crate) fn is_same_or_nested(key: &str, candidate: &str) -> bool {
    candidate == key
        || candidate
            .strip_prefix(key)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// In-memory key-value store for tests and ephemeral hosts
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    entries: Arc<RwLock<BTreeMap<String, Value>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().ok()?.get(key).cloned()
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| CoreError::LockPoisoned)?
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .write()
            .map_err(|_| CoreError::LockPoisoned)?
            .retain(|candidate, _| !is_same_or_nested(key, candidate));
        Ok(())
    }
}
