//! External downloader fetcher
//!
//! Drives a youtube-dl compatible tool to grab the audio track, then
//! transcodes it with ffmpeg into the cache's file format:
//! 1. Probe title and duration (`-s --get-title --get-duration`)
//! 2. Skip the download when the destination already exists
//! 3. Enforce the per-provider length limit
//! 4. Download to an intermediate `.ogg`, logging progress
//! 5. Transcode to the destination and remove the intermediate

use super::{FetchMetadata, Fetcher, Provider, SourceLocator};
use crate::error::ResolutionError;
use async_trait::async_trait;
use jukebox_common::human_time::{format_clock, parse_clock};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

const UNKNOWN_TITLE: &str = "No Title found";

/// SoundCloud tracks get a shorter limit than YouTube ones
const SOUNDCLOUD_LIMIT_FACTOR: f64 = 0.8;

const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Fetcher backed by external youtube-dl and ffmpeg processes
#[derive(Debug, Clone)]
pub struct DownloaderFetcher {
    downloader: PathBuf,
    ffmpeg: PathBuf,
    max_duration: Duration,
}

impl DownloaderFetcher {
    pub fn new(downloader: PathBuf, ffmpeg: PathBuf, max_duration: Duration) -> Self {
        Self {
            downloader,
            ffmpeg,
            max_duration,
        }
    }

    fn limit_for(&self, provider: Provider) -> Duration {
        match provider {
            Provider::SoundCloud => self.max_duration.mul_f64(SOUNDCLOUD_LIMIT_FACTOR),
            _ => self.max_duration,
        }
    }

    async fn probe(&self, url: &str) -> Result<FetchMetadata, ResolutionError> {
        let output = Command::new(&self.downloader)
            .args(["-s", "--get-title", "--get-duration", url])
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ResolutionError::FetchFailed(format!(
                    "failed to run {}: {}",
                    self.downloader.display(),
                    e
                ))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());

        let title = lines.next().unwrap_or(UNKNOWN_TITLE).to_string();
        let duration = lines.next().and_then(parse_clock);

        debug!(url, title = %title, ?duration, "Probed source");
        Ok(FetchMetadata { title, duration })
    }

    async fn download(&self, url: &str, intermediate: &Path) -> Result<(), ResolutionError> {
        let mut child = Command::new(&self.downloader)
            .args([
                "--extract-audio",
                "--audio-format",
                "vorbis",
                "--audio-quality",
                "128",
                "--no-cache-dir",
                "--prefer-ffmpeg",
                "--limit-rate",
                "1.2M",
                "--newline",
                "-o",
            ])
            .arg(intermediate)
            .arg(url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ResolutionError::FetchFailed(format!("failed to spawn downloader: {}", e)))?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            let mut last_log: Option<Instant> = None;
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = parse_progress(&line) {
                    if last_log.map_or(true, |t| t.elapsed() >= PROGRESS_LOG_INTERVAL) {
                        debug!(url, "Download progress {:.0}%", percent);
                        last_log = Some(Instant::now());
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ResolutionError::FetchFailed(e.to_string()))?;
        if !status.success() {
            return Err(ResolutionError::FetchFailed(format!(
                "downloader exited with {}",
                status
            )));
        }
        Ok(())
    }

    async fn transcode(
        &self,
        intermediate: &Path,
        destination: &Path,
        title: &str,
    ) -> Result<(), ResolutionError> {
        let status = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(intermediate)
            .args(["-metadata", &format!("title={}", title)])
            .args(["-metadata", "album=downloaded", "-b:a", "128k"])
            .arg(destination)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|e| ResolutionError::FetchFailed(format!("failed to run ffmpeg: {}", e)))?;

        if let Err(e) = tokio::fs::remove_file(intermediate).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove intermediate file {}: {}", intermediate.display(), e);
            }
        }

        if !status.success() {
            return Err(ResolutionError::FetchFailed(format!("ffmpeg exited with {}", status)));
        }
        Ok(())
    }
}

#[async_trait]
impl Fetcher for DownloaderFetcher {
    async fn fetch(
        &self,
        locator: &SourceLocator,
        destination: &Path,
    ) -> Result<FetchMetadata, ResolutionError> {
        if locator.provider() == Provider::Other {
            return Err(ResolutionError::Unsupported(locator.url().to_string()));
        }

        let metadata = self.probe(locator.url()).await?;

        if tokio::fs::try_exists(destination).await.unwrap_or(false) {
            debug!("{} already on disk, skipping download", destination.display());
            return Ok(metadata);
        }

        let limit = self.limit_for(locator.provider());
        if let Some(duration) = metadata.duration {
            if duration > limit {
                return Err(ResolutionError::TooLong {
                    actual_secs: duration.as_secs(),
                    limit_secs: limit.as_secs(),
                });
            }
        }

        let intermediate = destination.with_extension("ogg");
        info!(
            url = locator.url(),
            "Downloading \"{}\" ({})",
            metadata.title,
            metadata.duration.map(format_clock).unwrap_or_else(|| "?".into())
        );

        self.download(locator.url(), &intermediate).await?;
        self.transcode(&intermediate, destination, &metadata.title).await?;

        Ok(metadata)
    }
}

/// Extract the percentage from a downloader `[download]` progress line
pub fn parse_progress(line: &str) -> Option<f32> {
    let rest = line.trim_start().strip_prefix("[download]")?;
    rest.split_whitespace()
        .find_map(|token| token.strip_suffix('%'))
        .and_then(|n| n.parse::<f32>().ok())
}
