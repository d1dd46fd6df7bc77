//! Integration tests for config file resolution and graceful degradation
//!
//! Covers:
//! - Missing config files never abort startup (defaults are used)
//! - Priority order: explicit path, environment variable, search paths
//! - Malformed files are reported as errors
//!
//! Note: Uses serial_test to prevent environment variable races. Tests that
//! touch AVSYNC_TEST_CONFIG are marked with #[serial].

use avsync_common::config::{ConfigResolver, ConfigSource, TomlConfig};
use avsync_common::Error;
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

const TEST_ENV_VAR: &str = "AVSYNC_TEST_CONFIG";

fn resolver_without_search_paths() -> ConfigResolver {
    ConfigResolver::new()
        .with_env_var(TEST_ENV_VAR)
        .with_search_paths(Vec::new())
}

#[test]
#[serial]
fn test_no_config_anywhere_uses_defaults() {
    env::remove_var(TEST_ENV_VAR);

    let (config, source) = resolver_without_search_paths().load(None).unwrap();

    assert_eq!(source, ConfigSource::Defaults);
    assert_eq!(config.logging.level, "info");
    assert!(config.player.is_empty());
}

#[test]
#[serial]
fn test_missing_explicit_file_falls_back_to_defaults() {
    env::remove_var(TEST_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let missing = temp_dir.path().join("does-not-exist.toml");

    let (config, source) = resolver_without_search_paths()
        .load(Some(&missing))
        .unwrap();

    assert_eq!(source, ConfigSource::Defaults);
    assert_eq!(config.logging.level, "info");
}

#[test]
#[serial]
fn test_explicit_path_wins_over_environment() {
    let temp_dir = TempDir::new().unwrap();
    let cli_file = temp_dir.path().join("cli.toml");
    let env_file = temp_dir.path().join("env.toml");
    fs::write(&cli_file, "[logging]\nlevel = \"debug\"\n").unwrap();
    fs::write(&env_file, "[logging]\nlevel = \"warn\"\n").unwrap();
    env::set_var(TEST_ENV_VAR, &env_file);

    let (config, source) = resolver_without_search_paths()
        .load(Some(&cli_file))
        .unwrap();

    env::remove_var(TEST_ENV_VAR);
    assert_eq!(source, ConfigSource::File(cli_file));
    assert_eq!(config.logging.level, "debug");
}

#[test]
#[serial]
fn test_environment_wins_over_search_paths() {
    let temp_dir = TempDir::new().unwrap();
    let env_file = temp_dir.path().join("env.toml");
    let searched = temp_dir.path().join("searched.toml");
    fs::write(&env_file, "[logging]\nlevel = \"warn\"\n").unwrap();
    fs::write(&searched, "[logging]\nlevel = \"trace\"\n").unwrap();
    env::set_var(TEST_ENV_VAR, &env_file);

    let resolver = ConfigResolver::new()
        .with_env_var(TEST_ENV_VAR)
        .with_search_paths(vec![searched]);
    let (config, _) = resolver.load(None).unwrap();

    env::remove_var(TEST_ENV_VAR);
    assert_eq!(config.logging.level, "warn");
}

#[test]
#[serial]
fn test_first_existing_search_path_is_used() {
    env::remove_var(TEST_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let absent = temp_dir.path().join("absent.toml");
    let present = temp_dir.path().join("present.toml");
    fs::write(&present, "[player]\nwork_interval_ms = 10\n").unwrap();

    let resolver = ConfigResolver::new()
        .with_env_var(TEST_ENV_VAR)
        .with_search_paths(vec![absent, present.clone()]);

    assert_eq!(resolver.resolve_path(None), Some(present));
    let (config, _) = resolver.load(None).unwrap();
    assert_eq!(
        config.player.get("work_interval_ms").and_then(|v| v.as_integer()),
        Some(10)
    );
}

#[test]
#[serial]
fn test_malformed_file_is_config_error() {
    env::remove_var(TEST_ENV_VAR);
    let temp_dir = TempDir::new().unwrap();
    let broken = temp_dir.path().join("broken.toml");
    fs::write(&broken, "[player\nwork_interval_ms = ").unwrap();

    let result = resolver_without_search_paths().load(Some(&broken));

    match result {
        Err(Error::Config(message)) => assert!(message.contains("broken.toml")),
        other => panic!("Expected Config error, got {:?}", other.map(|(_, s)| s)),
    }
}

#[test]
fn test_unknown_sections_are_ignored() {
    let config = TomlConfig::from_toml_str("[unrelated]\nkey = 1\n[logging]\nlevel = \"error\"\n")
        .unwrap();
    assert_eq!(config.logging.level, "error");
}
