//! Multiplexer configuration

use serde::{Deserialize, Serialize};

use crate::error::MuxError;

/// Default number of processor contexts (local plus one remote bridge)
pub const DEFAULT_NUM_CONTEXTS: usize = 2;

/// Default number of peripherals; this id itself is the apps sentinel
pub const DEFAULT_NUM_PERIPHERALS: u8 = 4;

/// What a mode switch does when a transport step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SwitchPolicy {
    /// Report failures and always advance to the requested mode
    #[default]
    Proceed,
    /// Keep the current mode when it fails to close
    AbortOnCloseFailure,
}

impl SwitchPolicy {
    /// Get human-readable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Proceed => "Proceed",
            Self::AbortOnCloseFailure => "Abort on close failure",
        }
    }

    /// Get description
    pub fn description(&self) -> &'static str {
        match self {
            Self::Proceed => "Switch even if the old transport fails to close or the new one fails to open",
            Self::AbortOnCloseFailure => "Stay on the old transport if it cannot be closed cleanly",
        }
    }
}

/// Multiplexer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    /// Number of processor contexts
    pub num_contexts: usize,
    /// Highest regular peripheral id plus one; also the apps sentinel
    pub num_peripherals: u8,
    /// Failure handling during mode switches
    pub switch_policy: SwitchPolicy,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            num_contexts: DEFAULT_NUM_CONTEXTS,
            num_peripherals: DEFAULT_NUM_PERIPHERALS,
            switch_policy: SwitchPolicy::default(),
        }
    }
}

impl MultiplexerConfig {
    /// Reject configurations the multiplexer cannot serve
    pub fn validate(&self) -> Result<(), MuxError> {
        if self.num_contexts == 0 {
            return Err(MuxError::InvalidConfig(
                "at least one context is required".to_string(),
            ));
        }
        Ok(())
    }

    /// Peripheral id addressing the producer-local (apps) channel
    pub fn apps_peripheral(&self) -> u8 {
        self.num_peripherals
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MultiplexerConfig::default();
        assert_eq!(config.num_contexts, DEFAULT_NUM_CONTEXTS);
        assert_eq!(config.apps_peripheral(), DEFAULT_NUM_PERIPHERALS);
        assert_eq!(config.switch_policy, SwitchPolicy::Proceed);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_contexts_rejected() {
        let config = MultiplexerConfig {
            num_contexts: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(MuxError::InvalidConfig(_))));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: MultiplexerConfig =
            serde_json::from_str(r#"{"switch_policy": "abort-on-close-failure"}"#).unwrap();
        assert_eq!(config.switch_policy, SwitchPolicy::AbortOnCloseFailure);
        assert_eq!(config.num_contexts, DEFAULT_NUM_CONTEXTS);
    }
}
