//! Bootstrap configuration helpers
//!
//! Locates the TOML configuration file and resolves the cache directory.
//! Both follow the same priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing configuration file is never fatal; callers log a warning and
//! continue with compiled defaults.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit configuration file
pub const CONFIG_ENV_VAR: &str = "JUKEBOX_CONFIG";

/// Environment variable overriding the cache directory
pub const CACHE_DIR_ENV_VAR: &str = "JUKEBOX_CACHE_DIR";

const APP_DIR: &str = "jukebox";

/// Logging configuration (`[logging]` table)
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Compiled-in defaults used when nothing else is configured
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub cache_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

/// Find the configuration file to load
///
/// Returns `None` when no candidate exists; an explicit path (CLI or
/// environment) is returned even if missing so the caller can warn about it.
pub fn locate_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc").join(APP_DIR).join("config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Resolve the cache directory
pub fn resolve_cache_dir(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        debug!("Cache directory from command line: {}", path.display());
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(CACHE_DIR_ENV_VAR) {
        if !path.is_empty() {
            debug!("Cache directory from {}: {}", CACHE_DIR_ENV_VAR, path);
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        debug!("Cache directory from config file: {}", path.display());
        return path.to_path_buf();
    }

    default_cache_dir()
}

/// Create `path` (and parents) if it does not exist
pub fn ensure_directory(path: &Path) -> Result<()> {
    if path.is_dir() {
        return Ok(());
    }
    if path.exists() {
        return Err(Error::Config(format!(
            "Cache path exists but is not a directory: {}",
            path.display()
        )));
    }
    std::fs::create_dir_all(path)?;
    info!("Created directory: {}", path.display());
    Ok(())
}

/// OS-dependent default cache directory
fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR).join("songs"))
        .unwrap_or_else(|| PathBuf::from("./jukebox_data/songs"))
}
