//! Propagation configuration.

use crate::errors::PropagationError;
use serde::{Deserialize, Serialize};

/// Configuration for context restoration in tap operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationConfig {
    /// Whether taps wrap their listener when a captured context is present.
    #[serde(default = "default_restore_in_tap")]
    pub restore_in_tap: bool,
    /// Whether accessor write/reset failures fail the bracketed callback.
    ///
    /// When disabled, failures are logged and the callback proceeds.
    #[serde(default = "default_fail_on_accessor_error")]
    pub fail_on_accessor_error: bool,
}

fn default_restore_in_tap() -> bool {
    true
}

fn default_fail_on_accessor_error() -> bool {
    true
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            restore_in_tap: default_restore_in_tap(),
            fail_on_accessor_error: default_fail_on_accessor_error(),
        }
    }
}

impl PropagationConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a configuration from JSON, filling in defaults for missing fields.
    pub fn from_json(json: &str) -> Result<Self, PropagationError> {
        serde_json::from_str(json).map_err(|e| PropagationError::Config(e.to_string()))
    }

    /// Enables or disables restoration in tap operators.
    #[must_use]
    pub fn with_restore_in_tap(mut self, enabled: bool) -> Self {
        self.restore_in_tap = enabled;
        self
    }

    /// Sets the accessor failure policy.
    #[must_use]
    pub fn with_fail_on_accessor_error(mut self, fail: bool) -> Self {
        self.fail_on_accessor_error = fail;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PropagationConfig::new();
        assert!(config.restore_in_tap);
        assert!(config.fail_on_accessor_error);
    }

    #[test]
    fn test_from_json_partial() {
        let config = PropagationConfig::from_json(r#"{"fail_on_accessor_error": false}"#).unwrap();
        assert!(config.restore_in_tap);
        assert!(!config.fail_on_accessor_error);
    }

    #[test]
    fn test_from_json_invalid() {
        let err = PropagationConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, PropagationError::Config(_)));
    }

    #[test]
    fn test_builder() {
        let config = PropagationConfig::new().with_restore_in_tap(false);
        assert!(!config.restore_in_tap);
    }
}
