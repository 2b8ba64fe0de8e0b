//! Source locators
//!
//! A locator is the validated, normalized URL a listener asked for. Only
//! absolute http/https URLs are accepted; short `youtu.be` links are rewritten
//! to the canonical watch URL so both spellings share one cache entry.

use crate::error::AdmissionError;
use jukebox_common::Fingerprint;
use serde::Serialize;
use std::fmt;
use url::Url;

/// Media host a locator points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    YouTube,
    SoundCloud,
    Other,
}

impl Provider {
    fn detect(url: &Url) -> Self {
        let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        let host = host.strip_prefix("m.").unwrap_or(host);

        if host == "youtube.com" || host.ends_with(".youtube.com") || host == "youtu.be" {
            Provider::YouTube
        } else if host == "soundcloud.com" || host.ends_with(".soundcloud.com") {
            Provider::SoundCloud
        } else {
            Provider::Other
        }
    }
}

/// Validated source URL plus its cache fingerprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocator {
    url: String,
    provider: Provider,
    fingerprint: Fingerprint,
}

impl SourceLocator {
    /// Validate and normalize a requested URL
    pub fn parse(input: &str) -> Result<Self, AdmissionError> {
        let trimmed = input.trim();
        let mut url = Url::parse(trimmed)
            .map_err(|e| AdmissionError::InvalidLocator(format!("{}: {}", trimmed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(AdmissionError::InvalidLocator(format!(
                "{}: only http and https URLs are accepted",
                trimmed
            )));
        }
        if url.host_str().map_or(true, str::is_empty) {
            return Err(AdmissionError::InvalidLocator(format!("{}: missing host", trimmed)));
        }

        if url.host_str() == Some("youtu.be") {
            let video_id = url.path().trim_start_matches('/').to_string();
            if video_id.is_empty() {
                return Err(AdmissionError::InvalidLocator(format!(
                    "{}: short link without video id",
                    trimmed
                )));
            }
            url = Url::parse(&format!("https://www.youtube.com/watch?v={}", video_id))
                .map_err(|e| AdmissionError::InvalidLocator(e.to_string()))?;
        }

        let provider = Provider::detect(&url);
        let url = url.to_string();
        let fingerprint = Fingerprint::of(&url);

        Ok(Self {
            url,
            provider,
            fingerprint,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn provider(&self) -> Provider {
        self.provider
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
