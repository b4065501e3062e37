//! # channelplus-dl
//!
//! Resumable downloader for Channel Plus language-course audio and course
//! materials.
//!
//! ## Design Philosophy
//!
//! channelplus-dl is designed to be:
//! - **Resumable** - Completed files are recorded in a ledger inside the download
//!   directory and verified on disk before anything is skipped
//! - **Bounded** - At most `concurrent_downloads` transfers are in flight at once
//! - **Library-first** - The `channelplus-dl` binary is a thin layer over this crate
//! - **Event-driven** - Consumers subscribe to events, no polling required
//!
//! ## Quick Start
//!
//! ```no_run
//! use channelplus_dl::{BatchDownloader, Config, HttpTransfer, SiteClient};
//! use channelplus_dl::config::EpisodeRange;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let http = Arc::new(HttpTransfer::new(&config)?);
//!     let site = SiteClient::new(http.clone(), config.site.clone());
//!
//!     let episodes = site.collect_episodes(390, EpisodeRange::new(1, 10)?).await;
//!     let materials = channelplus_dl::site::detect_materials(&config.site.base_url, &episodes);
//!     let items = channelplus_dl::site::build_items(&config.site.base_url, &episodes, &materials);
//!
//!     let downloader = BatchDownloader::new(config, http).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let mut summary = downloader.run(&items, false).await;
//!     summary.merge_retry(&downloader.retry(2).await);
//!     println!("{} downloaded, {} failed", summary.downloaded, summary.failed);
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Batch orchestrator: reconcile, admit, transfer, record, retry
pub mod downloader;
/// Error types
pub mod error;
/// Resume ledger persisted in the download directory
pub mod ledger;
/// Partitioning of requested items against files on disk
pub mod reconcile;
/// Progress bars and summaries for the command line
pub mod report;
/// Retry logic with exponential backoff
pub mod retry;
/// Course page scraping
pub mod site;
/// HTTP transfers
pub mod transfer;
/// Core types and events
pub mod types;
/// File integrity checks
pub mod validator;

// Re-export commonly used types
pub use config::{Config, EpisodeRange};
pub use downloader::BatchDownloader;
pub use error::{Error, Result, SiteError, TransferError};
pub use ledger::ResumeLedger;
pub use site::SiteClient;
pub use transfer::{HttpTransfer, MediaTransfer};
pub use types::{BatchSummary, DownloadItem, Event, ItemKind, ItemState};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when a termination signal arrives.
///
/// Meant to be spawned next to a batch run using the downloader's
/// [`cancellation_token`](BatchDownloader::cancellation_token): no new
/// transfers are admitted after the signal, and in-flight ones are aborted
/// with their partial files removed.
///
/// On Unix both SIGTERM and SIGINT count; elsewhere only Ctrl+C does.
///
/// # Example
///
/// ```no_run
/// use channelplus_dl::{BatchDownloader, Config, HttpTransfer, shutdown_on_signal};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = Config::default();
///     let http = Arc::new(HttpTransfer::new(&config)?);
///     let downloader = BatchDownloader::new(config, http).await?;
///
///     tokio::spawn(shutdown_on_signal(downloader.cancellation_token()));
///     let summary = downloader.run(&[], false).await;
///     assert!(!summary.cancelled);
///
///     Ok(())
/// }
/// ```
pub async fn shutdown_on_signal(token: CancellationToken) {
    tokio::select! {
        _ = wait_for_signal() => {
            tracing::warn!("Interrupt received, cancelling downloads");
            token.cancel();
        }
        _ = token.cancelled() => {}
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let sigterm = signal(SignalKind::terminate())
        .inspect_err(|e| tracing::warn!(error = %e, "SIGTERM handler unavailable"))
        .ok();
    let sigint = signal(SignalKind::interrupt())
        .inspect_err(|e| tracing::warn!(error = %e, "SIGINT handler unavailable"))
        .ok();

    async fn next(stream: Option<tokio::signal::unix::Signal>) -> Option<()> {
        match stream {
            Some(mut stream) => stream.recv().await,
            None => std::future::pending().await,
        }
    }

    if sigterm.is_none() && sigint.is_none() {
        // Containers may forbid handler registration entirely
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(signal = "ctrl_c", "Stop requested");
        return;
    }
    tokio::select! {
        _ = next(sigterm) => tracing::info!(signal = "SIGTERM", "Stop requested"),
        _ = next(sigint) => tracing::info!(signal = "SIGINT", "Stop requested"),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Ctrl+C listener failed, interrupts are ignored");
        std::future::pending::<()>().await;
    }
    tracing::info!(signal = "ctrl_c", "Stop requested");
}
