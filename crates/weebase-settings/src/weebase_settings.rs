//! Weebase Settings
//!
//! Process-wide configuration read from `<config_dir>/weebase/settings.toml`
//! with environment overrides:
//!
//! | variable | field |
//! |---|---|
//! | `SAFE_MODE_DEFAULT` | `safe_mode_default` |
//! | `READ_ONLY_MODE` | `read_only_mode` |
//! | `ALLOW_ADHOC_CONNECTIONS` | `allow_adhoc_connections` |
//! | `WEEBASE_DRIVERS` | `enabled_drivers` (comma separated) |
//! | `MAX_RESULT_ROWS` | `max_result_rows` |

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use weebase_core::{Dialect, SafetyPolicy};

pub mod logging;
mod settings_file;

pub use logging::LoggingSettings;
pub use settings_file::*;

/// Default cap on rows returned by read queries
pub const DEFAULT_MAX_RESULT_ROWS: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeebaseSettings {
    pub safe_mode_default: bool,
    pub read_only_mode: bool,
    pub allow_adhoc_connections: bool,
    /// Driver names, aliases allowed
    pub enabled_drivers: Vec<String>,
    pub max_result_rows: usize,
    pub default_page_size: usize,
    pub logging: LoggingSettings,
}

impl Default for WeebaseSettings {
    fn default() -> Self {
        Self {
            safe_mode_default: true,
            read_only_mode: false,
            allow_adhoc_connections: true,
            enabled_drivers: Dialect::KNOWN.iter().map(|d| d.as_str().to_string()).collect(),
            max_result_rows: DEFAULT_MAX_RESULT_ROWS,
            default_page_size: 50,
            logging: LoggingSettings::default(),
        }
    }
}

impl WeebaseSettings {
    /// Load the settings file if present and apply environment overrides
    pub fn load() -> Result<Self> {
        let mut settings = Self::load_from(&settings_file()?)?;
        settings.apply_overrides(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Read a settings file, using defaults when it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no settings file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {:?}", path))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse settings TOML in {:?}", path))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from `lookup`, normally the process environment.
    /// Unparseable values are logged and leave the field unchanged.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        override_bool(&lookup, "SAFE_MODE_DEFAULT", &mut self.safe_mode_default);
        override_bool(&lookup, "READ_ONLY_MODE", &mut self.read_only_mode);
        override_bool(&lookup, "ALLOW_ADHOC_CONNECTIONS", &mut self.allow_adhoc_connections);

        if let Some(drivers) = lookup("WEEBASE_DRIVERS") {
            self.enabled_drivers = drivers
                .split(',')
                .map(|d| d.trim().to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }

        if let Some(raw) = lookup("MAX_RESULT_ROWS") {
            match raw.trim().parse::<usize>() {
                Ok(rows) if rows > 0 => self.max_result_rows = rows,
                _ => tracing::warn!(value = %raw, "ignoring invalid MAX_RESULT_ROWS"),
            }
        }
    }

    /// Snapshot of the mutation policy
    pub fn safety_policy(&self) -> SafetyPolicy {
        SafetyPolicy {
            safe_mode_default: self.safe_mode_default,
            read_only_mode: self.read_only_mode,
        }
    }

    /// True when `driver` (or one of its aliases) is enabled
    pub fn is_driver_enabled(&self, driver: &str) -> bool {
        let dialect = Dialect::normalize(driver);
        self.enabled_drivers
            .iter()
            .any(|enabled| Dialect::normalize(enabled) == dialect)
    }
}

fn override_bool<F>(lookup: &F, key: &str, target: &mut bool)
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => *target = true,
        "0" | "false" | "no" | "off" => *target = false,
        _ => tracing::warn!(key, value = %raw, "ignoring invalid boolean setting"),
    }
}
