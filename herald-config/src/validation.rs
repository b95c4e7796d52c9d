// Configuration validation

use crate::{ConfigError, Result};

/// Implemented by settings types checked after deserialization.
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Reusable field checks.
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Delays are expressed in seconds and must be finite and non-negative.
    pub fn seconds(value: f64, field: &str) -> Result<()> {
        if !value.is_finite() || value < 0.0 {
            return Err(ConfigError::ValidationError(format!(
                "{} must be a finite, non-negative number of seconds, got {}",
                field, value
            )));
        }
        Ok(())
    }
}
