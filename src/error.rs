//! Error types for channelplus-dl
//!
//! This module provides the crate-wide error enum plus two domain-specific
//! families:
//! - [`TransferError`] for a single HTTP transfer attempt (classified as
//!   retryable or terminal by [`crate::retry::IsRetryable`])
//! - [`SiteError`] for failures while scraping course pages

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for channelplus-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for channelplus-dl
///
/// Item-level failures never surface through this type during a batch run;
/// the orchestrator records them in the batch summary instead. `Error` is
/// returned by construction, configuration and scraping operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrent_downloads")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A transfer failed after the retry policy gave up
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Scraping the course site failed
    #[error("site error: {0}")]
    Site(#[from] SiteError),

    /// A download item could not be constructed
    #[error("invalid download item: {0}")]
    InvalidItem(String),

    /// The run was interrupted before every item was settled
    #[error("download interrupted")]
    Cancelled,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a configuration error pointing at a specific key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Failure of a single transfer attempt
#[derive(Debug, Error)]
pub enum TransferError {
    /// Server answered with a status worth retrying (429, 502, 503, 504)
    #[error("HTTP {code} from {url} (transient)")]
    RetryableStatus {
        /// HTTP status code
        code: u16,
        /// Requested URL
        url: String,
    },

    /// Server answered with any other non-200 status
    #[error("HTTP {code} from {url}")]
    Status {
        /// HTTP status code
        code: u16,
        /// Requested URL
        url: String,
    },

    /// The attempt exceeded its wall-clock budget
    #[error("request to {url} timed out")]
    Timeout {
        /// Requested URL
        url: String,
    },

    /// Transport-level failure (connect, TLS, body read)
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Writing the destination file failed
    #[error("failed to write {path}: {source}")]
    Io {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The transfer was aborted by an interrupt
    #[error("transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Map a response status onto the transient / terminal split.
    ///
    /// Callers only invoke this for statuses other than 200.
    pub fn from_status(code: u16, url: &str) -> Self {
        match code {
            429 | 502 | 503 | 504 => TransferError::RetryableStatus {
                code,
                url: url.to_string(),
            },
            _ => TransferError::Status {
                code,
                url: url.to_string(),
            },
        }
    }
}

/// Scraping failures
#[derive(Debug, Error)]
pub enum SiteError {
    /// The URL does not contain a `/viewalllang/<id>` segment
    #[error("cannot extract course id from URL: {0}")]
    InvalidCourseUrl(String),

    /// The page carried no embedded state blob
    #[error("no embedded page state found on page {page}")]
    MissingState {
        /// Page number
        page: u32,
    },

    /// The embedded state blob was not valid JSON
    #[error("invalid JSON data on page {page}: {source}")]
    InvalidJson {
        /// Page number
        page: u32,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// An episode record failed validation
    #[error("malformed episode record: {0}")]
    InvalidEpisode(String),

    /// The course has no episodes at all
    #[error("no episodes found in course {0}")]
    EmptyCourse(u32),
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_and_gateway_statuses_are_transient() {
        for code in [429, 502, 503, 504] {
            assert!(
                matches!(
                    TransferError::from_status(code, "http://x"),
                    TransferError::RetryableStatus { .. }
                ),
                "{code} should map to RetryableStatus"
            );
        }
    }

    #[test]
    fn other_statuses_are_terminal() {
        for code in [201, 204, 206, 301, 400, 403, 404, 500] {
            assert!(
                matches!(
                    TransferError::from_status(code, "http://x"),
                    TransferError::Status { .. }
                ),
                "{code} should map to Status"
            );
        }
    }

    #[test]
    fn config_helper_records_key() {
        let err = Error::config("concurrent_downloads", "must be at least 1");
        match err {
            Error::Config { key, message } => {
                assert_eq!(key.as_deref(), Some("concurrent_downloads"));
                assert_eq!(message, "must be at least 1");
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn display_includes_status_and_url() {
        let err = TransferError::from_status(404, "https://example.com/a.mp3");
        assert_eq!(err.to_string(), "HTTP 404 from https://example.com/a.mp3");
    }
}
