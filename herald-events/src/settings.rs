//! Dispatch settings loaded through `herald-config`.

use crate::callback::CallbackOptions;
use crate::error::Result;
use crate::event::DEFAULT_PRIORITY;
use herald_config::{ConfigManager, ConfigValidator, DEFAULT_PREFIX, Validate};
use serde::{Deserialize, Serialize};

/// Manager-wide defaults.
///
/// Loaded from any [`ConfigManager`] layer; from the environment the keys
/// are `HERALD_ERROR_HANDLER_NAME`, `HERALD_DEFAULT_PRIORITY` and
/// `HERALD_CALLBACK__<OPTION>` (for example `HERALD_CALLBACK__LOOP_DELAY=0.5`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Name of the error-handler event
    pub error_handler_name: String,

    /// Priority used by [`crate::Event::attach`]
    pub default_priority: i32,

    /// Options seeded into [`crate::EventManager::callback`] builders
    pub callback: CallbackOptions,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            error_handler_name: "<error_handler>".to_string(),
            default_priority: DEFAULT_PRIORITY,
            callback: CallbackOptions::default(),
        }
    }
}

impl Validate for DispatchSettings {
    fn validate(&self) -> herald_config::Result<()> {
        ConfigValidator::not_empty(&self.error_handler_name, "error_handler_name")
    }
}

impl DispatchSettings {
    /// Deserialize and validate the settings held in `config`.
    pub fn load(config: &ConfigManager) -> Result<Self> {
        Ok(config.load_validated()?)
    }

    /// Settings from `HERALD_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let config = ConfigManager::with_prefix(DEFAULT_PREFIX);
        config.load_env()?;
        Self::load(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EventError;
    use herald_config::{ConfigError, FileFormat};
    use std::time::Duration;

    #[test]
    fn test_defaults_from_empty_config() {
        let settings = DispatchSettings::load(&ConfigManager::new()).unwrap();
        assert_eq!(settings, DispatchSettings::default());
    }

    #[test]
    fn test_layered_settings() {
        let config = ConfigManager::with_prefix("HERALD");
        config
            .load_str(
                r#"
                    default_priority = 4

                    [callback]
                    loop_count = 0
                    loop_delay = 2.0
                "#,
                FileFormat::Toml,
            )
            .unwrap();
        config
            .load_vars([("HERALD_CALLBACK__LOOP_DELAY", "0.25")])
            .unwrap();

        let settings = DispatchSettings::load(&config).unwrap();
        assert_eq!(settings.default_priority, 4);
        assert!(settings.callback.is_infinite());
        assert_eq!(settings.callback.loop_delay, Duration::from_millis(250));
        assert_eq!(settings.error_handler_name, "<error_handler>");
    }

    #[test]
    fn test_empty_handler_name_rejected() {
        let config = ConfigManager::new();
        config.set("error_handler_name", " ").unwrap();

        assert!(matches!(
            DispatchSettings::load(&config),
            Err(EventError::Config(ConfigError::ValidationError(_)))
        ));
    }

    #[test]
    fn test_negative_delay_rejected() {
        let config = ConfigManager::new();
        config.set("callback.start_delay", -1.0).unwrap();

        assert!(matches!(
            DispatchSettings::load(&config),
            Err(EventError::Config(ConfigError::DeserializationError(_)))
        ));
    }
}
