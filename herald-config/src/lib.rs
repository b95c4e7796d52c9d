//! Layered configuration for Herald.
//!
//! Values are merged into a single tree from, in order of application:
//! configuration files (JSON, TOML or `.env`), prefixed environment
//! variables and programmatic [`ConfigManager::set`] calls. Later layers
//! override earlier ones key by key. Keys are dotted paths such as
//! `callback.loop_delay`.
//!
//! ```rust
//! use herald_config::ConfigManager;
//!
//! let config = ConfigManager::new();
//! config.set("callback.loop_count", 3).unwrap();
//! assert_eq!(config.get_int("callback.loop_count").unwrap(), 3);
//! ```

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use herald_log::debug;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;

/// Default environment prefix.
pub const DEFAULT_PREFIX: &str = "HERALD";

/// Layered configuration store.
#[derive(Clone)]
pub struct ConfigManager {
    tree: Arc<RwLock<Value>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    pub fn new() -> Self {
        Self {
            tree: Arc::new(RwLock::new(Value::Object(Map::new()))),
            env_prefix: None,
        }
    }

    /// Only environment variables starting with `prefix_` are loaded.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::new()
        }
    }

    /// Merge prefixed variables from the process environment.
    pub fn load_env(&self) -> Result<()> {
        let loaded = EnvLoader::new(self.env_prefix.clone()).load();
        self.apply(loaded)
    }

    /// Merge an explicit set of variables, as if read from the environment.
    pub fn load_vars<I, K, V>(&self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let loaded = EnvLoader::new(self.env_prefix.clone()).load_from(vars);
        self.apply(loaded)
    }

    /// Read a `.env` file into the process environment, then merge it.
    pub fn load_dotenv(&self, path: Option<&Path>) -> Result<()> {
        match path {
            Some(path) => {
                dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
            }
            None => {
                // A missing .env is not an error.
                dotenvy::dotenv().ok();
            }
        }
        self.load_env()
    }

    /// Merge a configuration file, detecting its format from the extension.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::auto(path)?.load_file(path)?;
        debug!("Loaded configuration file {}", path.display());
        self.merge_value(data);
        Ok(())
    }

    /// Merge an in-memory document of the given format.
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;
        insert_dotted(&mut self.tree.write(), key, value)
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let value = self
            .lookup(key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(value)
            .map_err(|e| ConfigError::DeserializationError(format!("{}: {}", key, e)))
    }

    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        self.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Dotted paths of every leaf value.
    pub fn keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        collect_leaves(&self.tree.read(), String::new(), &mut keys);
        keys
    }

    /// Merge every value of `other` over this configuration.
    pub fn merge(&self, other: &ConfigManager) {
        let snapshot = other.tree.read().clone();
        self.merge_value(snapshot);
    }

    /// Deserialize the whole tree into `T` and validate it.
    pub fn load_validated<T: DeserializeOwned + Validate>(&self) -> Result<T> {
        let snapshot = self.tree.read().clone();
        let settings: T = serde_json::from_value(snapshot)
            .map_err(|e| ConfigError::DeserializationError(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    fn lookup(&self, key: &str) -> Option<Value> {
        let tree = self.tree.read();
        key.split('.')
            .try_fold(&*tree, |node, segment| node.get(segment))
            .cloned()
    }

    fn apply(&self, entries: Vec<(String, Value)>) -> Result<()> {
        let mut tree = self.tree.write();
        for (key, value) in entries {
            insert_dotted(&mut tree, &key, value)?;
        }
        Ok(())
    }

    fn merge_value(&self, value: Value) {
        deep_merge(&mut self.tree.write(), value);
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert `value` at a dotted path, creating intermediate tables.
pub(crate) fn insert_dotted(root: &mut Value, key: &str, value: Value) -> Result<()> {
    let mut segments: Vec<&str> = key.split('.').filter(|s| !s.is_empty()).collect();
    let last = segments
        .pop()
        .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

    let mut node = root;
    for segment in segments {
        let table = node
            .as_object_mut()
            .ok_or_else(|| ConfigError::NotATable { key: key.to_string() })?;
        node = table
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let table = node
        .as_object_mut()
        .ok_or_else(|| ConfigError::NotATable { key: key.to_string() })?;
    table.insert(last.to_string(), value);
    Ok(())
}

fn deep_merge(target: &mut Value, incoming: Value) {
    match (target, incoming) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match existing.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        existing.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn collect_leaves(node: &Value, prefix: String, out: &mut Vec<String>) {
    match node {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{}.{}", prefix, key)
                };
                collect_leaves(child, path, out);
            }
        }
        _ if !prefix.is_empty() => out.push(prefix),
        _ => {}
    }
}
