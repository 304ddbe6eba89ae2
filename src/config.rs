//! Picker configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Tuning knobs for selector synthesis, selection mode and the host bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PickerConfig {
    /// Prefix shared by every marker class the picker applies to the page.
    /// Classes with this prefix are never used in synthesized selectors.
    pub marker_prefix: String,
    /// Ancestor levels walked by CSS path synthesis before giving up on uniqueness
    pub max_css_depth: usize,
    /// Maximum characters of text carried in an `elementChosen` preview
    pub preview_chars: usize,
    /// Quiet period after a DOM mutation before committed highlights are re-applied
    pub debounce_ms: u64,
    /// Bounded wait for a host bridge round trip
    pub bridge_timeout_ms: u64,
    /// Offset of the hover label from the pointer, in CSS pixels
    pub label_offset: f64,
}

impl Default for PickerConfig {
    fn default() -> Self {
        Self {
            marker_prefix: "rowpicker-".to_string(),
            max_css_depth: 5,
            preview_chars: 50,
            debounce_ms: 300,
            bridge_timeout_ms: 5000,
            label_offset: 12.0,
        }
    }
}

impl PickerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PickerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_prefix.trim().is_empty() {
            return Err(ConfigError::Value {
                field: "marker_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_css_depth == 0 {
            return Err(ConfigError::Value {
                field: "max_css_depth",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.bridge_timeout_ms == 0 {
            return Err(ConfigError::Value {
                field: "bridge_timeout_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Marker applied to the element under the pointer
    pub fn hover_class(&self) -> String {
        format!("{}hover", self.marker_prefix)
    }

    /// Marker applied to committed (clicked) elements
    pub fn selected_class(&self) -> String {
        format!("{}selected", self.marker_prefix)
    }

    /// Marker applied to the root element while selection mode is on
    pub fn active_class(&self) -> String {
        format!("{}active", self.marker_prefix)
    }

    pub fn is_marker_class(&self, class: &str) -> bool {
        class.starts_with(&self.marker_prefix)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_millis(self.bridge_timeout_ms)
    }
}
