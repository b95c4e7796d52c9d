// Environment variable loading

use serde_json::Value;
use std::env;

/// Separator marking one level of nesting in a variable name.
///
/// `HERALD_CALLBACK__LOOP_DELAY` addresses `callback.loop_delay`.
pub const NESTING_SEPARATOR: &str = "__";

/// Loads prefixed environment variables as dotted configuration keys.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a loader; only variables starting with `prefix` are picked up.
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load from the process environment.
    pub fn load(&self) -> Vec<(String, Value)> {
        self.load_from(env::vars())
    }

    /// Load from an explicit set of variables.
    pub fn load_from<I, K, V>(&self, vars: I) -> Vec<(String, Value)>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                let key = self.strip_prefix(key.as_ref())?;
                Some((key, infer_scalar(value.as_ref())))
            })
            .collect()
    }

    fn strip_prefix(&self, key: &str) -> Option<String> {
        let rest = match &self.prefix {
            Some(prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?,
            None => key,
        };
        if rest.is_empty() {
            return None;
        }
        Some(dotted_key(rest))
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Translate `CALLBACK__LOOP_DELAY` into `callback.loop_delay`.
pub fn dotted_key(name: &str) -> String {
    name.split(NESTING_SEPARATOR)
        .map(|segment| segment.to_lowercase())
        .collect::<Vec<_>>()
        .join(".")
}

/// Environment values are strings; recover booleans and numbers so they
/// deserialize into typed settings.
pub fn infer_scalar(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("true") {
        return Value::Bool(true);
    }
    if trimmed.eq_ignore_ascii_case("false") {
        return Value::Bool(false);
    }
    if let Ok(int) = trimmed.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if let Some(number) = serde_json::Number::from_f64(float) {
            return Value::Number(number);
        }
    }
    Value::String(raw.to_string())
}
