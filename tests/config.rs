//! Integration tests for configuration structs.
//!
//! These tests verify that:
//! 1. Defaults and presets return sensible values
//! 2. Invalid values are rejected before a registry or driver is built
//! 3. `FuzzConfig::from_env` honours its environment variables

// Allow test-specific patterns that are appropriate for test code
#![allow(
    clippy::panic,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing
)]

// Shared test infrastructure
#[path = "common/mod.rs"]
mod common;

use std::path::PathBuf;
use std::sync::Arc;

use common::{Table, GAME};
use fortress_turns::fuzz::{ENV_CRASH_DIR, ENV_MAX_ERRORS, ENV_MAX_STEPS, ENV_TIMEOUT};
use fortress_turns::{
    ConnectionRegistry, FuzzConfig, FuzzDriver, MemoryStore, RegistryConfig, RulesRegistry,
    TurnsError,
};
use serial_test::serial;
use web_time::Duration;

// ============================================================================
// RegistryConfig Tests
// ============================================================================

#[test]
fn test_registry_config_default() {
    let config = RegistryConfig::default();

    assert!(!config.allow_debug_events);
    assert!(!config.observers_may_chat);
    assert_eq!(config.max_chat_message_len, 4096);
    assert_eq!(config, RegistryConfig::production());
}

#[test]
fn test_registry_config_development_preset() {
    let config = RegistryConfig::development();

    assert!(config.allow_debug_events);
    assert!(config.observers_may_chat);
    assert!(config.validate().is_ok());
}

#[test]
fn test_registry_rejects_invalid_config() {
    let registry = ConnectionRegistry::new(
        Arc::new(RulesRegistry::new()),
        Arc::new(MemoryStore::new()),
    );
    let err = registry
        .with_config(RegistryConfig {
            max_chat_message_len: 0,
            ..RegistryConfig::default()
        })
        .unwrap_err();
    assert!(matches!(err, TurnsError::InvalidConfig { .. }));
}

#[test]
fn test_chat_length_limit_is_applied() {
    let table = Table::with_config(RegistryConfig {
        max_chat_message_len: 8,
        ..RegistryConfig::default()
    });
    let (ada, sink) = table.join("ada");

    assert!(table.registry.chat(&ada, "short").is_ok());
    let err = table.registry.chat(&ada, "far too long").unwrap_err();
    assert!(matches!(err, TurnsError::InvalidRequest { .. }));
    assert!(sink.last_error().is_some());
}

#[test]
fn test_observer_chat_follows_config() {
    let locked = Table::new();
    let (eve, _) = locked.join("eve");
    assert!(locked.registry.chat(&eve, "hi").is_err());

    let open = Table::development();
    let (eve, _) = open.join("eve");
    assert!(open.registry.chat(&eve, "hi").is_ok());
    assert_eq!(open.registry.connection_count(GAME), 1);
}

// ============================================================================
// FuzzConfig Tests
// ============================================================================

#[test]
fn test_fuzz_config_default() {
    let config = FuzzConfig::default();

    assert_eq!(config.max_steps, 2048);
    assert_eq!(config.timeout, Duration::from_millis(250));
    assert_eq!(config.max_errors, 100);
    assert_eq!(config.crash_dir, None);
    assert!(config.is_excluded("undo"));
}

#[test]
fn test_fuzz_config_presets_are_ordered() {
    let quick = FuzzConfig::quick();
    let default = FuzzConfig::default();
    let thorough = FuzzConfig::thorough();

    assert!(quick.max_steps < default.max_steps);
    assert!(default.max_steps < thorough.max_steps);
    assert!(quick.timeout < thorough.timeout);
}

#[test]
fn test_fuzz_driver_rejects_invalid_config() {
    let err = FuzzDriver::new(FuzzConfig {
        max_steps: 0,
        ..FuzzConfig::default()
    })
    .unwrap_err();
    assert!(matches!(err, TurnsError::InvalidConfig { .. }));
}

fn clear_fuzz_env() {
    for name in [ENV_MAX_STEPS, ENV_TIMEOUT, ENV_MAX_ERRORS, ENV_CRASH_DIR] {
        std::env::remove_var(name);
    }
}

#[test]
#[serial]
fn test_fuzz_config_from_env() {
    clear_fuzz_env();
    std::env::set_var(ENV_MAX_STEPS, "5");
    std::env::set_var(ENV_TIMEOUT, "20");
    std::env::set_var(ENV_CRASH_DIR, "target/crashes");

    let config = FuzzConfig::from_env();
    clear_fuzz_env();

    let config = config.unwrap();
    assert_eq!(config.max_steps, 5);
    assert_eq!(config.timeout, Duration::from_millis(20));
    assert_eq!(config.max_errors, 100);
    assert_eq!(config.crash_dir, Some(PathBuf::from("target/crashes")));
}

#[test]
#[serial]
fn test_fuzz_config_from_env_rejects_garbage() {
    clear_fuzz_env();
    std::env::set_var(ENV_MAX_ERRORS, "many");

    let result = FuzzConfig::from_env();
    clear_fuzz_env();

    assert!(matches!(result, Err(TurnsError::InvalidConfig { .. })));
}
