use std::sync::Arc;

use log::debug;

use crate::config::{ConfigKey, ConfigStore, KeyValueStore, StoreError};

/// Persisted record of models that have loaded successfully at least once.
///
/// Presence means "previously loaded", not "currently loaded".
pub struct InstalledModelSet {
    store: Arc<dyn KeyValueStore>,
    models: Vec<String>,
}

impl InstalledModelSet {
    /// Read the set from `store`. Duplicates in the stored list are collapsed.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let stored = store.get(&ConfigKey::INSTALLED_MODELS).unwrap_or_default();
        let mut models: Vec<String> = Vec::with_capacity(stored.len());
        for id in stored {
            if !models.contains(&id) {
                models.push(id);
            }
        }
        debug!("Installed models: {:?}", models);
        Self { store, models }
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|m| m == model_id)
    }

    /// Identifiers in insertion order
    pub fn list(&self) -> &[String] {
        &self.models
    }

    /// Record `model_id`. Returns whether it was new.
    ///
    /// The in-memory set is updated even when persisting fails.
    pub fn insert(&mut self, model_id: &str) -> Result<bool, StoreError> {
        if self.contains(model_id) {
            return Ok(false);
        }
        self.models.push(model_id.to_string());
        self.store
            .set(&ConfigKey::INSTALLED_MODELS, self.models.clone())?;
        Ok(true)
    }

    pub fn current_model_name(&self) -> Option<String> {
        self.store.get(&ConfigKey::CURRENT_MODEL_NAME)
    }

    pub fn set_current_model_name(&self, model_id: &str) -> Result<(), StoreError> {
        self.store
            .set(&ConfigKey::CURRENT_MODEL_NAME, model_id.to_string())
    }
}
