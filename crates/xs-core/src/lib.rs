//! Host capabilities shared by the xstream authentication and streaming crates
//!
//! Components never reach into a global application object. Each one receives a
//! [`Capabilities`] value at construction time carrying the settings reader and the
//! persisted key-value store. Logging goes through `tracing`.

pub mod errors;
pub mod file_store;
pub mod settings;
pub mod store;

use std::sync::Arc;

pub use errors::{CoreError, Result};
pub use file_store::FileKeyValueStore;
pub use settings::{Settings, SettingsFile, SettingsReader};
pub use store::{KeyValueStore, MemoryKeyValueStore};

/// Capability bundle injected into every component
#[derive(Clone)]
pub struct Capabilities {
    pub settings: Arc<dyn SettingsReader>,
    pub store: Arc<dyn KeyValueStore>,
}

impl Capabilities {
    pub fn new(settings: Arc<dyn SettingsReader>, store: Arc<dyn KeyValueStore>) -> Self {
        Self { settings, store }
    }

    /// Fixed settings over an in-memory store
    pub fn in_memory(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
            store: Arc::new(MemoryKeyValueStore::new()),
        }
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> Settings {
        self.settings.settings()
    }
}

impl std::fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capabilities")
            .field("settings", &self.settings.settings())
            .finish_non_exhaustive()
    }
}
