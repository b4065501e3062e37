//! Transfer client: one URL to one file, with retries and pacing.
//!
//! [`MediaTransfer`] is the seam the batch orchestrator talks to;
//! [`HttpTransfer`] is the reqwest implementation used in production.

mod http;

pub use http::HttpTransfer;

use crate::error::TransferError;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bytes written per progress step
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Progress callback: `(bytes_so_far, total_bytes_if_known)`
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Result of [`MediaTransfer::fetch`]
///
/// The transfer succeeded when `error` is `None`. On failure the destination
/// is exactly as it was before the call.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// Bytes written by the final attempt
    pub bytes: u64,
    /// Content length announced by the server, if any
    pub total: Option<u64>,
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Why the transfer failed
    pub error: Option<TransferError>,
}

impl TransferReport {
    /// Whether the file was written in full
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Abstraction over fetching a media URL into a file, enabling testability.
#[async_trait::async_trait]
pub trait MediaTransfer: Send + Sync {
    /// Stream `url` into `dest`, calling `on_progress` after each chunk
    ///
    /// Bytes land in [`staging_path`] first and replace `dest` only once the
    /// body is complete, so a failed or aborted fetch never touches a file
    /// already at `dest`. Transient failures are retried internally.
    async fn fetch(&self, url: &str, dest: &Path, on_progress: ProgressFn<'_>) -> TransferReport;
}

/// Sibling of `dest` that receives bytes while a transfer is running
pub fn staging_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(OsString::from).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Best-effort removal of a staging file left by a failed or aborted transfer
pub(crate) fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

/// Spaces out request starts issued through one client
///
/// Independent of retry backoff: every request, first attempt or retry,
/// waits for its slot.
#[derive(Debug)]
pub struct RequestThrottle {
    delay: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestThrottle {
    /// Throttle with `delay` between consecutive request starts
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            next_slot: Mutex::new(None),
        }
    }

    /// Wait until this caller may issue its request
    pub async fn wait(&self) {
        if self.delay.is_zero() {
            return;
        }
        let mut next_slot = self.next_slot.lock().await;
        let now = Instant::now();
        let start = match *next_slot {
            Some(slot) if slot > now => {
                tokio::time::sleep_until(slot).await;
                slot
            }
            _ => now,
        };
        *next_slot = Some(start + self.delay);
    }
}
