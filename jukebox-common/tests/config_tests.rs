//! Tests for configuration file discovery and cache directory resolution
//!
//! Tests that manipulate JUKEBOX_CONFIG or JUKEBOX_CACHE_DIR are marked with
//! #[serial] so they run sequentially, not in parallel.

use jukebox_common::config::{
    locate_config_file, resolve_cache_dir, CompiledDefaults, CACHE_DIR_ENV_VAR, CONFIG_ENV_VAR,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.cache_dir.as_os_str().is_empty());
    assert!(defaults.cache_dir.ends_with("songs"));
    assert_eq!(defaults.log_level, "info");
    assert!(defaults.log_file.is_none());
}

#[test]
#[serial]
fn test_cache_dir_without_overrides_uses_default() {
    env::remove_var(CACHE_DIR_ENV_VAR);

    let resolved = resolve_cache_dir(None, None);

    assert_eq!(resolved, CompiledDefaults::for_current_platform().cache_dir);
}

#[test]
#[serial]
fn test_cache_dir_env_beats_toml() {
    env::set_var(CACHE_DIR_ENV_VAR, "/tmp/jukebox-env-songs");

    let resolved = resolve_cache_dir(None, Some(Path::new("/tmp/jukebox-toml-songs")));

    env::remove_var(CACHE_DIR_ENV_VAR);
    assert_eq!(resolved, PathBuf::from("/tmp/jukebox-env-songs"));
}

#[test]
#[serial]
fn test_cache_dir_toml_used_when_env_unset() {
    env::remove_var(CACHE_DIR_ENV_VAR);

    let resolved = resolve_cache_dir(None, Some(Path::new("/srv/songs")));

    assert_eq!(resolved, PathBuf::from("/srv/songs"));
}

#[test]
#[serial]
fn test_cache_dir_cli_beats_env() {
    env::set_var(CACHE_DIR_ENV_VAR, "/tmp/jukebox-env-songs");

    let resolved = resolve_cache_dir(Some(Path::new("/cli/songs")), None);

    env::remove_var(CACHE_DIR_ENV_VAR);
    assert_eq!(resolved, PathBuf::from("/cli/songs"));
}

#[test]
#[serial]
fn test_config_file_from_env() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("jukebox.toml");
    std::fs::write(&path, "port = 6000\n").unwrap();
    env::set_var(CONFIG_ENV_VAR, &path);

    let located = locate_config_file(None);

    env::remove_var(CONFIG_ENV_VAR);
    assert_eq!(located, Some(path));
}

#[test]
#[serial]
fn test_config_file_cli_returned_even_if_missing() {
    env::remove_var(CONFIG_ENV_VAR);
    let missing = Path::new("/definitely/not/here/jukebox.toml");

    assert_eq!(locate_config_file(Some(missing)), Some(missing.to_path_buf()));
}
