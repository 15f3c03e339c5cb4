use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::errors::CoreError;
use crate::models::holding::Holding;
use crate::models::settings::Settings;

use super::backend::KeyValueStore;

/// Key of the holdings ledger.
pub const HOLDINGS_KEY: &str = "holdings";

/// Key of the settings record.
pub const SETTINGS_KEY: &str = "settings";

/// A value loaded once from a key/value backend and written back on every
/// change.
///
/// Flow: backend text → serde_json → `T` on load; `T` → serde_json → backend
/// on save. Every `save`/`update` is durable before it returns.
pub struct PersistedStore<T> {
    backend: Arc<dyn KeyValueStore>,
    key: &'static str,
    value: RwLock<T>,
}

/// The ledger of holdings.
pub type HoldingsStore = PersistedStore<Vec<Holding>>;

/// The refresh settings.
pub type SettingsStore = PersistedStore<Settings>;

impl<T> PersistedStore<T>
where
    T: Serialize + DeserializeOwned + Default + Clone,
{
    /// Load the value under `key`, or `T::default()` if it is missing,
    /// unreadable or corrupt. Never fails; a corrupt record is replaced on the
    /// next save.
    pub fn load(backend: Arc<dyn KeyValueStore>, key: &'static str) -> Self {
        let value = match backend.get(key) {
            Ok(Some(text)) => match serde_json::from_str::<T>(&text) {
                Ok(value) => value,
                Err(e) => {
                    warn!("Corrupt '{key}' record, falling back to defaults: {e}");
                    T::default()
                }
            },
            Ok(None) => {
                debug!("No '{key}' record yet, using defaults");
                T::default()
            }
            Err(e) => {
                warn!("Could not read '{key}' record, falling back to defaults: {e}");
                T::default()
            }
        };

        Self {
            backend,
            key,
            value: RwLock::new(value),
        }
    }

    /// Backend key this store writes to.
    pub fn key(&self) -> &str {
        self.key
    }

    /// Snapshot of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.read().clone()
    }

    /// Replace the value wholesale and persist it.
    pub fn save(&self, value: T) -> Result<(), CoreError> {
        let mut guard = self.write();
        self.persist(&value)?;
        *guard = value;
        Ok(())
    }

    /// Apply a transformation and persist the result, returning the new value.
    pub fn update<F>(&self, mutator: F) -> Result<T, CoreError>
    where
        F: FnOnce(&T) -> T,
    {
        self.try_update(|value| {
            *value = mutator(value);
            Ok(value.clone())
        })
    }

    /// Apply a fallible in-place mutation on a copy of the value. The copy
    /// replaces the stored value only if `mutator` succeeds and the result was
    /// persisted; otherwise the store is left exactly as it was.
    pub fn try_update<F, R>(&self, mutator: F) -> Result<R, CoreError>
    where
        F: FnOnce(&mut T) -> Result<R, CoreError>,
    {
        let mut guard = self.write();
        let mut next = guard.clone();
        let result = mutator(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(result)
    }

    fn persist(&self, value: &T) -> Result<(), CoreError> {
        let text = serde_json::to_string(value)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize '{}': {e}", self.key)))?;
        self.backend.put(self.key, &text)
    }

    fn read(&self) -> RwLockReadGuard<'_, T> {
        self.value.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.value.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl PersistedStore<Vec<Holding>> {
    /// Load the holdings ledger (empty if absent or corrupt).
    pub fn load_holdings(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::load(backend, HOLDINGS_KEY)
    }
}

impl PersistedStore<Settings> {
    /// Load the settings record (defaults if absent or corrupt).
    pub fn load_settings(backend: Arc<dyn KeyValueStore>) -> Self {
        Self::load(backend, SETTINGS_KEY)
    }
}
