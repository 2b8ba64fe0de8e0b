//! Configuration management for jukebox-player
//!
//! Settings sources, highest priority first:
//! 1. Command-line arguments (and their `JUKEBOX_*` environment fallbacks)
//! 2. TOML configuration file
//! 3. Built-in defaults (code constants)
//!
//! The TOML file is bootstrap only: changes require a restart.

use crate::error::{Error, Result};
use jukebox_common::config::{resolve_cache_dir, LoggingConfig};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Which decoder turns cached files into PCM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    /// External ffmpeg process writing s16le to a pipe
    #[default]
    Ffmpeg,
    /// In-process symphonia decode + rubato resample
    Native,
}

/// Configuration loaded from the TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// HTTP control API port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory holding cached media files
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Extension of cached media files
    #[serde(default = "default_cache_extension")]
    pub cache_extension: String,

    /// Waiting requests admitted before QueueFull
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Cached files kept before the oldest is reclaimed
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: f64,

    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,

    #[serde(default = "default_keepalive_interval_minutes")]
    pub keepalive_interval_minutes: u64,

    #[serde(default = "default_idle_poll_ms")]
    pub idle_poll_ms: u64,

    /// Longest a single block write may block before the item fails
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,

    /// Blocks written per second of audio (block size = byte rate / this)
    #[serde(default = "default_blocks_per_second")]
    pub blocks_per_second: u32,

    /// Start fetching as soon as a request is admitted
    #[serde(default = "default_prefetch_on_enqueue")]
    pub prefetch_on_enqueue: bool,

    #[serde(default = "default_max_track_minutes")]
    pub max_track_minutes: u64,

    #[serde(default)]
    pub decoder: DecoderKind,

    /// Output gain applied while decoding
    #[serde(default = "default_volume")]
    pub volume: f32,

    #[serde(default = "default_downloader_path")]
    pub downloader_path: PathBuf,

    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,

    /// Output byte stream; `-` is stdout
    #[serde(default = "default_sink_path")]
    pub sink_path: String,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_port() -> u16 {
    5750
}

fn default_cache_extension() -> String {
    "mp3".to_string()
}

fn default_max_requests() -> usize {
    5
}

fn default_max_files() -> usize {
    15
}

fn default_ttl_hours() -> f64 {
    4.0
}

fn default_sweep_interval_minutes() -> u64 {
    30
}

fn default_keepalive_interval_minutes() -> u64 {
    15
}

fn default_idle_poll_ms() -> u64 {
    250
}

fn default_write_timeout_ms() -> u64 {
    2000
}

fn default_blocks_per_second() -> u32 {
    60
}

fn default_prefetch_on_enqueue() -> bool {
    true
}

fn default_max_track_minutes() -> u64 {
    60
}

fn default_volume() -> f32 {
    0.6
}

fn default_downloader_path() -> PathBuf {
    PathBuf::from("youtube-dl")
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_sink_path() -> String {
    "-".to_string()
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            cache_dir: None,
            cache_extension: default_cache_extension(),
            max_requests: default_max_requests(),
            max_files: default_max_files(),
            ttl_hours: default_ttl_hours(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            keepalive_interval_minutes: default_keepalive_interval_minutes(),
            idle_poll_ms: default_idle_poll_ms(),
            write_timeout_ms: default_write_timeout_ms(),
            blocks_per_second: default_blocks_per_second(),
            prefetch_on_enqueue: default_prefetch_on_enqueue(),
            max_track_minutes: default_max_track_minutes(),
            decoder: DecoderKind::default(),
            volume: default_volume(),
            downloader_path: default_downloader_path(),
            ffmpeg_path: default_ffmpeg_path(),
            sink_path: default_sink_path(),
            logging: LoggingConfig::default(),
        }
    }
}

impl TomlConfig {
    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error: a warning is logged and built-in
    /// defaults are returned. A present but malformed file is an error.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            warn!("No configuration file found, using built-in defaults");
            return Ok(Self::default());
        };

        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "Configuration file {} not found, using built-in defaults",
                    path.display()
                );
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::Config(format!(
                    "Failed to read config file {}: {}",
                    path.display(),
                    e
                )))
            }
        };

        let config: TomlConfig = toml::from_str(&contents).map_err(|e| {
            Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
        })?;

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}

/// Command-line overrides applied on top of the TOML file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub port: Option<u16>,
    pub cache_dir: Option<PathBuf>,
    pub max_requests: Option<usize>,
    pub max_files: Option<usize>,
    pub sink_path: Option<String>,
    pub decoder: Option<DecoderKind>,
}

/// Resolved runtime settings
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub port: u16,
    pub cache_dir: PathBuf,
    pub cache_extension: String,
    pub max_requests: usize,
    pub max_files: usize,
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub keepalive_interval: Duration,
    pub idle_poll: Duration,
    pub write_timeout: Duration,
    pub blocks_per_second: u32,
    pub prefetch_on_enqueue: bool,
    pub max_track_duration: Duration,
    pub decoder: DecoderKind,
    pub volume: f32,
    pub downloader_path: PathBuf,
    pub ffmpeg_path: PathBuf,
    pub sink_path: String,
    pub event_capacity: usize,
}

impl PlayerSettings {
    /// Merge TOML values and CLI overrides, then validate
    pub fn resolve(toml: &TomlConfig, overrides: &ConfigOverrides) -> Result<Self> {
        let cache_dir = resolve_cache_dir(overrides.cache_dir.as_deref(), toml.cache_dir.as_deref());

        let settings = Self {
            port: overrides.port.unwrap_or(toml.port),
            cache_dir,
            cache_extension: toml.cache_extension.trim_start_matches('.').to_string(),
            max_requests: overrides.max_requests.unwrap_or(toml.max_requests),
            max_files: overrides.max_files.unwrap_or(toml.max_files),
            ttl: hours(toml.ttl_hours)?,
            sweep_interval: Duration::from_secs(toml.sweep_interval_minutes * 60),
            keepalive_interval: Duration::from_secs(toml.keepalive_interval_minutes * 60),
            idle_poll: Duration::from_millis(toml.idle_poll_ms),
            write_timeout: Duration::from_millis(toml.write_timeout_ms),
            blocks_per_second: toml.blocks_per_second,
            prefetch_on_enqueue: toml.prefetch_on_enqueue,
            max_track_duration: Duration::from_secs(toml.max_track_minutes * 60),
            decoder: overrides.decoder.unwrap_or(toml.decoder),
            volume: toml.volume,
            downloader_path: toml.downloader_path.clone(),
            ffmpeg_path: toml.ffmpeg_path.clone(),
            sink_path: overrides
                .sink_path
                .clone()
                .unwrap_or_else(|| toml.sink_path.clone()),
            event_capacity: 1000,
        };

        settings.validate()?;
        Ok(settings)
    }

    /// Built-in defaults rooted at `cache_dir`
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        let toml = TomlConfig::default();
        Self {
            port: toml.port,
            cache_dir: cache_dir.into(),
            cache_extension: toml.cache_extension,
            max_requests: toml.max_requests,
            max_files: toml.max_files,
            ttl: Duration::from_secs(4 * 3600),
            sweep_interval: Duration::from_secs(toml.sweep_interval_minutes * 60),
            keepalive_interval: Duration::from_secs(toml.keepalive_interval_minutes * 60),
            idle_poll: Duration::from_millis(toml.idle_poll_ms),
            write_timeout: Duration::from_millis(toml.write_timeout_ms),
            blocks_per_second: toml.blocks_per_second,
            prefetch_on_enqueue: toml.prefetch_on_enqueue,
            max_track_duration: Duration::from_secs(toml.max_track_minutes * 60),
            decoder: toml.decoder,
            volume: toml.volume,
            downloader_path: toml.downloader_path,
            ffmpeg_path: toml.ffmpeg_path,
            sink_path: toml.sink_path,
            event_capacity: 1000,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_requests == 0 {
            return Err(Error::Config("max_requests must be at least 1".into()));
        }
        if self.max_files == 0 {
            return Err(Error::Config("max_files must be at least 1".into()));
        }
        if self.ttl.is_zero() {
            return Err(Error::Config("ttl_hours must be positive".into()));
        }
        if self.sweep_interval.is_zero() || self.keepalive_interval.is_zero() {
            return Err(Error::Config("sweep and keepalive intervals must be positive".into()));
        }
        if self.idle_poll.is_zero() || self.write_timeout.is_zero() {
            return Err(Error::Config("idle_poll_ms and write_timeout_ms must be positive".into()));
        }
        if self.blocks_per_second == 0 {
            return Err(Error::Config("blocks_per_second must be at least 1".into()));
        }
        if self.cache_extension.is_empty() {
            return Err(Error::Config("cache_extension must not be empty".into()));
        }
        if !(0.0..=4.0).contains(&self.volume) {
            return Err(Error::Config(format!("volume {} out of range 0.0..=4.0", self.volume)));
        }
        Ok(())
    }
}

fn hours(value: f64) -> Result<Duration> {
    if !value.is_finite() || value <= 0.0 {
        return Err(Error::Config(format!("ttl_hours must be positive, got {}", value)));
    }
    Ok(Duration::from_secs_f64(value * 3600.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: TomlConfig = toml::from_str("").unwrap();
        assert_eq!(config.port, 5750);
        assert_eq!(config.max_requests, 5);
        assert_eq!(config.max_files, 15);
        assert_eq!(config.ttl_hours, 4.0);
        assert_eq!(config.decoder, DecoderKind::Ffmpeg);
        assert_eq!(config.sink_path, "-");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_values_parsed() {
        let config: TomlConfig = toml::from_str(
            r#"
            max_requests = 10
            max_files = 2
            ttl_hours = 0.5
            decoder = "native"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_requests, 10);
        assert_eq!(config.max_files, 2);
        assert_eq!(config.decoder, DecoderKind::Native);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_overrides_win() {
        let toml = TomlConfig::default();
        let overrides = ConfigOverrides {
            port: Some(9000),
            cache_dir: Some(PathBuf::from("/tmp/songs")),
            max_requests: Some(2),
            ..Default::default()
        };

        let settings = PlayerSettings::resolve(&toml, &overrides).unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/songs"));
        assert_eq!(settings.max_requests, 2);
        assert_eq!(settings.max_files, 15);
        assert_eq!(settings.ttl, Duration::from_secs(4 * 3600));
    }

    #[test]
    fn test_validation_rejects_zero_caps() {
        let toml = TomlConfig {
            max_files: 0,
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            cache_dir: Some(PathBuf::from("/tmp/songs")),
            ..Default::default()
        };
        assert!(matches!(
            PlayerSettings::resolve(&toml, &overrides),
            Err(Error::Config(_))
        ));

        let toml = TomlConfig {
            ttl_hours: 0.0,
            ..Default::default()
        };
        assert!(PlayerSettings::resolve(&toml, &overrides).is_err());
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() {
        let config = TomlConfig::load(Some(Path::new("/nonexistent/jukebox.toml")))
            .await
            .unwrap();
        assert_eq!(config.port, 5750);
    }

    #[tokio::test]
    async fn test_malformed_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "max_files = \"many\"").unwrap();

        let result = TomlConfig::load(Some(&path)).await;
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
