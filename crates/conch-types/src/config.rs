//! Engine configuration.

use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;

/// Construction-time settings for an engine instance.
///
/// All fields have defaults, so a TOML config may specify any subset:
///
/// ```toml
/// delimiter = "calc: "
/// data_dir = "/var/lib/myapp"
/// id = "myapp"
/// normalize_key_values = false
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Base prompt delimiter.
    pub delimiter: String,
    /// Directory for persisted history and local storage. `None` keeps both
    /// in memory only.
    pub data_dir: Option<PathBuf>,
    /// Persistence id applied to both the history store and local storage.
    pub id: Option<String>,
    /// Strip one layer of quotes from the value side of `key=value` tokens.
    pub normalize_key_values: bool,
    /// Panic on synchronous execution errors instead of returning them.
    pub fatal_errors: bool,
    /// Column budget for rendered help text.
    pub help_width: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delimiter: "conch$ ".to_string(),
            data_dir: None,
            id: None,
            normalize_key_values: true,
            fatal_errors: false,
            help_width: 80,
        }
    }
}

impl EngineConfig {
    /// Parse a config from its TOML form.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}
