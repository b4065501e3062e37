//! Batch orchestrator, split into focused submodules.
//!
//! - `batch` - one pass over a list of items: reconcile, transfer, record
//! - `rounds` - retry rounds over the failed set

mod batch;
mod rounds;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ledger::{LedgerConfig, ResumeLedger};
use crate::transfer::MediaTransfer;
use crate::types::{DownloadItem, Event};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio_util::sync::CancellationToken;

/// Ledger handle plus the in-memory completed set, guarded together
///
/// Holding the lock is the only way to mutate the set or write the file, so
/// concurrent completions cannot lose each other's updates.
#[derive(Debug)]
pub(crate) struct LedgerState {
    pub(crate) ledger: ResumeLedger,
    pub(crate) completed: BTreeSet<String>,
}

impl LedgerState {
    /// Record a finished item and persist immediately
    pub(crate) fn record(&mut self, key: &str) {
        self.completed.insert(key.to_string());
        self.ledger.save(&self.completed);
    }
}

/// Concurrency bookkeeping shared with spawned transfer tasks
#[derive(Clone, Debug, Default)]
pub(crate) struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    pub(crate) fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub(crate) fn leave(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn reset_peak(&self) {
        self.peak
            .store(self.current.load(Ordering::SeqCst), Ordering::SeqCst);
    }
}

/// Drives concurrent downloads of a list of items (cloneable - all fields are Arc-wrapped)
///
/// Item failures never abort a batch: [`run`](Self::run) always returns a
/// [`BatchSummary`](crate::types::BatchSummary). Failed items are kept for
/// [`retry`](Self::retry).
#[derive(Clone)]
pub struct BatchDownloader {
    pub(crate) config: Arc<Config>,
    pub(crate) transfer: Arc<dyn MediaTransfer>,
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// In-flight bound of the latest run, reused by retry rounds
    pub(crate) limit: Arc<AtomicUsize>,
    pub(crate) ledger: Arc<tokio::sync::Mutex<LedgerState>>,
    /// Items that failed in the most recent pass, in input order
    pub(crate) failed: Arc<tokio::sync::Mutex<Vec<DownloadItem>>>,
    pub(crate) in_flight: InFlight,
    pub(crate) cancel_token: CancellationToken,
}

impl BatchDownloader {
    /// Create an orchestrator writing into `config.download.download_dir`
    ///
    /// Validates the configuration and creates the download directory.
    pub async fn new(config: Config, transfer: Arc<dyn MediaTransfer>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        // Buffer of 1000 events; slow subscribers see RecvError::Lagged
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let ledger = ResumeLedger::new(
            &config.download.download_dir,
            LedgerConfig {
                concurrent_downloads: config.download.concurrent_downloads,
                total_episodes: 0,
            },
        );

        Ok(Self {
            limit: Arc::new(AtomicUsize::new(config.download.concurrent_downloads)),
            config: Arc::new(config),
            transfer,
            event_tx,
            ledger: Arc::new(tokio::sync::Mutex::new(LedgerState {
                ledger,
                completed: BTreeSet::new(),
            })),
            failed: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            in_flight: InFlight::default(),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Subscribe to batch events
    ///
    /// Every subscriber receives all events independently. A subscriber that
    /// falls more than 1000 events behind gets `RecvError::Lagged`.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Stop admitting transfers and abort the ones in flight
    ///
    /// Aborted transfers have their partial files removed. Cancellation is
    /// permanent for this instance.
    pub fn cancel(&self) {
        tracing::info!("Cancelling batch");
        self.cancel_token.cancel();
    }

    /// Token that cancels this orchestrator when triggered
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Items that failed in the most recent pass
    pub async fn failed_items(&self) -> Vec<DownloadItem> {
        self.failed.lock().await.clone()
    }

    /// The ledger's in-memory completed set
    pub async fn completed(&self) -> BTreeSet<String> {
        self.ledger.lock().await.completed.clone()
    }

    /// Delete the resume ledger without touching downloaded media
    pub async fn clean_resume(&self) -> Result<bool> {
        let mut state = self.ledger.lock().await;
        state.completed.clear();
        state.ledger.clear()
    }

    /// Target directory
    pub fn download_dir(&self) -> &Path {
        &self.config.download.download_dir
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() fails only when nobody is subscribed
        self.event_tx.send(event).ok();
    }
}
