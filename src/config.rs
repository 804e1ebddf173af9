//! Event bus configuration

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};

/// Configuration for an [`EventBus`](crate::EventBus)
///
/// Uses camelCase JSON, and missing fields take their defaults:
///
/// ```rust
/// use a3s_bus::BusConfig;
///
/// let config = BusConfig::from_json(r#"{"name": "ui"}"#).unwrap();
/// assert_eq!(config.name, "ui");
/// assert!(config.isolate_panics);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusConfig {
    /// Bus name, used in log fields and error messages
    pub name: String,

    /// Catch subscriber panics on the delivery context
    ///
    /// When disabled, a panicking callback unwinds the delivery context
    /// (a `ThreadContext` thread dies; a `ManualContext` pump propagates).
    pub isolate_panics: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            name: "event-bus".to_string(),
            isolate_panics: true,
        }
    }
}

impl BusConfig {
    /// Default configuration with a custom name
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Toggle subscriber panic isolation
    pub fn with_isolate_panics(mut self, isolate: bool) -> Self {
        self.isolate_panics = isolate;
        self
    }

    /// Check the configuration is usable
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(EventError::Config("bus name must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
