use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{debug, warn};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

/// Errors raised by the persistence layer
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Type-safe configuration key that associates a key name with its value type
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

// ===== Session Configuration =====

/// Tunables of the inference session (stored locally)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Decode and stream the output every N tokens. 4 looks continuous and keeps
    /// per-token overhead low.
    pub display_every_n_tokens: usize,
    /// Hard ceiling on generated tokens per invocation
    pub max_tokens: usize,
    /// Compute-cache ceiling handed to the runtime before each load
    pub cache_limit_bytes: usize,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            display_every_n_tokens: 4,
            max_tokens: 4096,
            cache_limit_bytes: 20 * 1024 * 1024,
            temperature: 0.5,
        }
    }
}

impl SessionConfig {
    /// Clamp values the session cannot work with.
    pub fn normalized(mut self) -> Self {
        if self.display_every_n_tokens == 0 {
            warn!("displayEveryNTokens must be at least 1, using 1");
            self.display_every_n_tokens = 1;
        }
        if self.max_tokens == 0 {
            warn!("maxTokens must be at least 1, using 1");
            self.max_tokens = 1;
        }
        self
    }
}

impl ConfigKey<SessionConfig> {
    pub const SESSION: Self = Self::new("sessionConfig");
}

// ===== Installed Models =====

impl ConfigKey<Vec<String>> {
    /// JSON array of identifiers that have loaded successfully at least once
    pub const INSTALLED_MODELS: Self = Self::new("installedModels");
}

impl ConfigKey<String> {
    /// Identifier of the model most recently loaded
    pub const CURRENT_MODEL_NAME: Self = Self::new("currentModelName");
}

// ===== Stores =====

/// Raw JSON key-value persistence. Object safe so the session can hold any backend.
pub trait KeyValueStore: Send + Sync {
    fn get_value(&self, key: &str) -> Option<Value>;
    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError>;
    fn delete_value(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed access on top of a [`KeyValueStore`]
pub trait ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), StoreError>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), StoreError>;
}

impl<S: KeyValueStore + ?Sized> ConfigStore for S {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        self.get_value(key.key_name())
            .and_then(|v| match serde_json::from_value(v) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Ignoring unreadable value for '{}': {}", key.key_name(), e);
                    None
                }
            })
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), StoreError> {
        let val = serde_json::to_value(value)?;
        self.set_value(key.key_name(), val)
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), StoreError> {
        self.delete_value(key.key_name())
    }
}

/// In-process store; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.data.lock().ok()?.get(key).cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .insert(key.to_string(), value);
        Ok(())
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        self.data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?
            .remove(key);
        Ok(())
    }
}

/// Store persisted as a single JSON object on disk.
///
/// Every write rewrites the whole file through a temporary sibling and a rename,
/// so a crash mid-write leaves the previous contents intact.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    data: Mutex<serde_json::Map<String, Value>>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                serde_json::Map::new()
            } else {
                serde_json::from_str(&raw)?
            }
        } else {
            serde_json::Map::new()
        };
        debug!("Opened store {:?} with {} keys", path, data.len());
        Ok(Self {
            path,
            data: Mutex::new(data),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, data: &serde_json::Map<String, Value>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(data)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get_value(&self, key: &str) -> Option<Value> {
        self.data.lock().ok()?.get(key).cloned()
    }

    fn set_value(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        data.insert(key.to_string(), value);
        self.persist(&data)
    }

    fn delete_value(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .lock()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        if data.remove(key).is_some() {
            self.persist(&data)?;
        }
        Ok(())
    }
}
