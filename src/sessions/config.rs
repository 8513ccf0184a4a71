//! Configuration for the connection registry.
//!
//! # Overview
//!
//! | Config Type | Purpose | Key Presets |
//! |-------------|---------|-------------|
//! | `RegistryConfig` | Which inbound events a registry accepts | `production()`, `development()` |
//!
//! Fuzzing limits live in [`FuzzConfig`](crate::FuzzConfig).
//!
//! # Example
//!
//! ```
//! use fortress_turns::RegistryConfig;
//!
//! let config = RegistryConfig {
//!     observers_may_chat: true,
//!     ..RegistryConfig::production()
//! };
//! assert!(config.validate().is_ok());
//! ```

use crate::TurnsError;

/// Configuration for a [`ConnectionRegistry`](crate::ConnectionRegistry).
///
/// # Forward Compatibility
///
/// New fields may be added to this struct in future versions. Always use the
/// `..RegistryConfig::default()` pattern when constructing instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "RegistryConfig has no effect unless passed to ConnectionRegistry::with_config()"]
pub struct RegistryConfig {
    /// Accept the `restore`, `restart` and `save` events, which let a client
    /// replace or dump the authoritative state.
    ///
    /// Default: `false`
    pub allow_debug_events: bool,

    /// Let observer connections post chat messages.
    ///
    /// Default: `false`
    pub observers_may_chat: bool,

    /// Longest accepted chat message, in bytes. Longer messages are rejected.
    ///
    /// Default: 4096
    pub max_chat_message_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            allow_debug_events: false,
            observers_may_chat: false,
            max_chat_message_len: 4096,
        }
    }
}

impl RegistryConfig {
    /// Creates a new `RegistryConfig` with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration preset for public servers. Same as the defaults.
    pub fn production() -> Self {
        Self::default()
    }

    /// Configuration preset for local development: debug events on, observers
    /// may chat.
    pub fn development() -> Self {
        Self {
            allow_debug_events: true,
            observers_may_chat: true,
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TurnsError::InvalidConfig`] if `max_chat_message_len` is
    /// outside `1..=65536`.
    pub fn validate(&self) -> Result<(), TurnsError> {
        if self.max_chat_message_len < 1 || self.max_chat_message_len > 65536 {
            return Err(TurnsError::InvalidConfig {
                info: format!(
                    "max_chat_message_len must be in 1..=65536, got {}",
                    self.max_chat_message_len
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_locked_down() {
        let config = RegistryConfig::default();
        assert!(!config.allow_debug_events);
        assert!(!config.observers_may_chat);
        assert_eq!(config, RegistryConfig::production());
        assert_eq!(config, RegistryConfig::new());
    }

    #[test]
    fn development_preset_opens_debug_events() {
        let config = RegistryConfig::development();
        assert!(config.allow_debug_events);
        assert!(config.observers_may_chat);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_chat_length() {
        let config = RegistryConfig {
            max_chat_message_len: 0,
            ..RegistryConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TurnsError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn validate_rejects_huge_chat_length() {
        let config = RegistryConfig {
            max_chat_message_len: 1 << 20,
            ..RegistryConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
