//! Configuration types for channelplus-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

/// Upper bound for concurrent transfers and per-transfer attempts
pub const MAX_CONCURRENT_DOWNLOADS: usize = 10;

/// Upper bound for `RetryConfig::max_attempts`
pub const MAX_RETRY_ATTEMPTS: u32 = 10;

/// Download behavior configuration (directory, concurrency, pacing)
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Download directory (default: "./downloads")
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,

    /// Maximum concurrent transfers (default: 3, valid 1..=10)
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Wall-clock budget for a single transfer attempt (default: 300 seconds)
    #[serde(default = "default_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Minimum spacing between request starts from one client (default: 1 second)
    #[serde(default = "default_delay", with = "fractional_duration_serde")]
    pub delay_between_requests: Duration,

    /// Batch-level retry rounds run over the failed set (default: 2)
    #[serde(default = "default_retry_rounds")]
    pub retry_rounds: u32,

    /// Base wait before a retry round, doubled every round (default: 1 second)
    #[serde(default = "default_round_backoff", with = "fractional_duration_serde")]
    pub round_backoff: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            download_dir: default_download_dir(),
            concurrent_downloads: default_concurrent_downloads(),
            timeout: default_timeout(),
            delay_between_requests: default_delay(),
            retry_rounds: default_retry_rounds(),
            round_backoff: default_round_backoff(),
        }
    }
}

/// Retry configuration for transient transfer failures
///
/// With the defaults the waits between attempts are 1s, 2s, 4s, ... capped at 30s.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per transfer, including the first (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt (default: 1 second)
    #[serde(default = "default_initial_delay", with = "fractional_duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between attempts (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "fractional_duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: false)
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: false,
        }
    }
}

/// Site layout settings for the course scraper
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Site root, without trailing slash
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Episodes listed on one course page (default: 10)
    #[serde(default = "default_episodes_per_page")]
    pub episodes_per_page: u32,

    /// Safety bound for the page walk that counts episodes (default: 50)
    #[serde(default = "default_max_scan_pages")]
    pub max_scan_pages: u32,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            episodes_per_page: default_episodes_per_page(),
            max_scan_pages: default_max_scan_pages(),
        }
    }
}

/// Main configuration
///
/// - [`download`](DownloadConfig): directory, concurrency, pacing
/// - [`retry`](RetryConfig): per-transfer retry policy
/// - [`site`](SiteConfig): scraper settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Per-transfer retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Course site settings
    #[serde(default)]
    pub site: SiteConfig,
}

impl Config {
    /// Download directory
    pub fn download_dir(&self) -> &PathBuf {
        &self.download.download_dir
    }

    /// Reject out-of-range values, naming the offending key
    pub fn validate(&self) -> Result<()> {
        let d = &self.download;
        if !(1..=MAX_CONCURRENT_DOWNLOADS).contains(&d.concurrent_downloads) {
            return Err(Error::config(
                "concurrent_downloads",
                format!(
                    "must be between 1 and {MAX_CONCURRENT_DOWNLOADS}, got {}",
                    d.concurrent_downloads
                ),
            ));
        }
        if d.timeout.is_zero() {
            return Err(Error::config("timeout", "must be greater than zero"));
        }
        if !(1..=MAX_RETRY_ATTEMPTS).contains(&self.retry.max_attempts) {
            return Err(Error::config(
                "max_attempts",
                format!(
                    "must be between 1 and {MAX_RETRY_ATTEMPTS}, got {}",
                    self.retry.max_attempts
                ),
            ));
        }
        if self.retry.backoff_multiplier.is_nan() || self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "backoff_multiplier",
                format!("must be at least 1.0, got {}", self.retry.backoff_multiplier),
            ));
        }
        if self.retry.max_delay < self.retry.initial_delay {
            return Err(Error::config(
                "max_delay",
                "must not be smaller than initial_delay",
            ));
        }
        if self.site.episodes_per_page == 0 {
            return Err(Error::config("episodes_per_page", "must be at least 1"));
        }
        if self.site.max_scan_pages == 0 {
            return Err(Error::config("max_scan_pages", "must be at least 1"));
        }
        url::Url::parse(&self.site.base_url)
            .map_err(|e| Error::config("base_url", format!("invalid URL: {e}")))?;
        Ok(())
    }
}

/// Inclusive range of episode numbers to download
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRange {
    start: u32,
    end: u32,
}

impl EpisodeRange {
    /// Both ends must be positive and `end >= start`
    pub fn new(start: u32, end: u32) -> Result<Self> {
        if start == 0 {
            return Err(Error::config("start", "episode numbers start at 1"));
        }
        if end < start {
            return Err(Error::config(
                "final",
                format!("final episode {end} is before start episode {start}"),
            ));
        }
        Ok(Self { start, end })
    }

    /// First episode number
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last episode number (inclusive)
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Number of episodes covered
    pub fn len(&self) -> u32 {
        self.end - self.start + 1
    }

    /// Always false; a range holds at least one episode
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether episode `part` falls inside the range
    pub fn contains(&self, part: u32) -> bool {
        (self.start..=self.end).contains(&part)
    }

    /// Page holding the first episode
    pub fn start_page(&self, per_page: u32) -> u32 {
        (self.start - 1) / per_page.max(1) + 1
    }

    /// Page holding the last episode
    pub fn end_page(&self, per_page: u32) -> u32 {
        (self.end - 1) / per_page.max(1) + 1
    }
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_concurrent_downloads() -> usize {
    3
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_retry_rounds() -> u32 {
    2
}

fn default_round_backoff() -> Duration {
    Duration::from_secs(1)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_base_url() -> String {
    "https://channelplus.ner.gov.tw".to_string()
}

fn default_episodes_per_page() -> u32 {
    10
}

fn default_max_scan_pages() -> u32 {
    50
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Duration as fractional seconds, e.g. `0.5`
mod fractional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer, de::Error};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
