//! Console settings

use std::path::{Path, PathBuf};

use anyhow::Context;
use diag_mux::{MultiplexerConfig, TransportMode};
use diag_sim::SimConfig;
use serde::{Deserialize, Serialize};

/// A context registered at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfiguredContext {
    /// Context index
    pub context: usize,
    /// Token handed back on every callback
    #[serde(default)]
    pub token: u32,
    /// Display name
    pub name: String,
}

/// Console settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Settings {
    /// Multiplexer sizing and switch policy
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    /// Simulated transport sizing
    #[serde(default)]
    pub sim: SimConfig,
    /// Mode brought up at startup
    #[serde(default)]
    pub initial_mode: TransportMode,
    /// Contexts to register at startup
    #[serde(default = "default_contexts")]
    pub contexts: Vec<ConfiguredContext>,
}

fn default_contexts() -> Vec<ConfiguredContext> {
    vec![
        ConfiguredContext {
            context: 0,
            token: 0,
            name: "local".to_string(),
        },
        ConfiguredContext {
            context: 1,
            token: 1,
            name: "mdm".to_string(),
        },
    ]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            multiplexer: MultiplexerConfig::default(),
            sim: SimConfig::default(),
            initial_mode: TransportMode::Usb,
            contexts: default_contexts(),
        }
    }
}

impl Settings {
    /// Get the XDG config directory for diagmux
    /// Uses $XDG_CONFIG_HOME/diagmux on Linux/macOS, falls back to ~/.config/diagmux
    fn config_dir() -> Option<PathBuf> {
        if let Ok(xdg_config) = std::env::var("XDG_CONFIG_HOME") {
            let path = PathBuf::from(xdg_config);
            if path.is_absolute() {
                return Some(path.join("diagmux"));
            }
        }

        dirs::home_dir().map(|h| h.join(".config").join("diagmux"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.json"))
    }

    /// Load settings from the default location, falling back to defaults
    pub fn load() -> Self {
        Self::settings_path()
            .filter(|path| path.exists())
            .and_then(|path| match Self::load_from(&path) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("Ignoring unreadable settings: {:#}", e);
                    None
                }
            })
            .unwrap_or_default()
    }

    /// Load settings from an explicit file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Parse settings JSON
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Save settings to disk
    pub fn save(&self) -> anyhow::Result<PathBuf> {
        let path = Self::settings_path().context("could not determine settings path")?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).context("failed to write settings")?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use diag_mux::SwitchPolicy;

    use super::*;

    #[test]
    fn test_empty_json_uses_defaults() {
        let settings = Settings::from_json("{}").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.contexts.len(), 2);
    }

    #[test]
    fn test_partial_json() {
        let settings = Settings::from_json(
            r#"{
                "initial_mode": "md",
                "multiplexer": { "switch_policy": "abort-on-close-failure" },
                "contexts": [{ "context": 0, "name": "apps" }]
            }"#,
        )
        .unwrap();

        assert_eq!(settings.initial_mode, TransportMode::MemoryDevice);
        assert_eq!(
            settings.multiplexer.switch_policy,
            SwitchPolicy::AbortOnCloseFailure
        );
        assert_eq!(settings.contexts.len(), 1);
        assert_eq!(settings.contexts[0].token, 0);
        assert_eq!(settings.sim, SimConfig::default());
    }

    #[test]
    fn test_bad_json_is_error() {
        assert!(Settings::from_json("{ not json").is_err());
    }
}
