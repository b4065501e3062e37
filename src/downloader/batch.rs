//! One pass over a list of items: reconcile, admit, transfer, record.

use super::BatchDownloader;
use crate::error::TransferError;
use crate::reconcile;
use crate::transfer::{TransferReport, remove_partial, staging_path};
use crate::types::{
    BatchSummary, DownloadItem, Event, ItemState, TransferOutcome, TransferStatus,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Minimum growth between two progress events for one item
const PROGRESS_EVENT_STEP: u64 = 64 * 1024;

impl BatchDownloader {
    /// [`run_with_limit`](Self::run_with_limit) bounded by the configured
    /// `concurrent_downloads`
    pub async fn run(&self, items: &[DownloadItem], force: bool) -> BatchSummary {
        self.run_with_limit(items, self.config.download.concurrent_downloads, force)
            .await
    }

    /// Download `items`, skipping those already complete on disk
    ///
    /// Reconciles the download directory first, then transfers the remaining
    /// items with at most `concurrency_limit` in flight (0 counts as 1). Every
    /// success is persisted to the ledger immediately. With `force` every
    /// item is fetched again; a forced fetch that fails leaves the file
    /// already on disk in place. Later [`retry`](Self::retry) rounds keep
    /// the same limit.
    pub async fn run_with_limit(
        &self,
        items: &[DownloadItem],
        concurrency_limit: usize,
        force: bool,
    ) -> BatchSummary {
        self.limit.store(concurrency_limit.max(1), Ordering::SeqCst);
        self.ledger
            .lock()
            .await
            .ledger
            .set_total_episodes(items.len());
        self.pass(items, force).await
    }

    pub(crate) async fn pass(&self, items: &[DownloadItem], force: bool) -> BatchSummary {
        let started = Instant::now();
        let gate = Arc::new(Semaphore::new(self.limit.load(Ordering::SeqCst)));
        let root = self.config.download.download_dir.clone();
        self.in_flight.reset_peak();

        let mut seen = HashSet::new();
        let items: Vec<DownloadItem> = items
            .iter()
            .filter(|item| {
                let fresh = seen.insert(item.key());
                if !fresh {
                    tracing::warn!(key = item.key(), "Duplicate target path, keeping first item");
                }
                fresh
            })
            .cloned()
            .collect();

        let partition = {
            let mut state = self.ledger.lock().await;
            state.completed = state.ledger.load().completed;
            let before = state.completed.clone();
            let partition = reconcile::partition(&root, &items, &mut state.completed, force);
            if state.completed != before {
                state.ledger.save(&state.completed);
            }
            partition
        };

        self.emit_event(Event::BatchStarted {
            total: items.len(),
            to_download: partition.to_download.len(),
            skipped: partition.existing.len(),
            invalid: partition.invalid.len(),
        });

        let index: HashMap<&str, usize> = items
            .iter()
            .enumerate()
            .map(|(i, item)| (item.key(), i))
            .collect();
        let mut outcomes: Vec<Option<TransferOutcome>> = vec![None; items.len()];

        for item in &partition.existing {
            if let Some(&i) = index.get(item.key()) {
                outcomes[i] = Some(TransferOutcome::skipped(item.key()));
            }
        }

        for item in &partition.to_download {
            self.emit_event(Event::ItemState {
                key: item.key().to_string(),
                state: ItemState::Queued,
            });
        }

        let mut tasks = JoinSet::new();
        let mut pending = partition.to_download.into_iter();
        while let Some(item) = pending.next() {
            let permit = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => None,
                permit = gate.clone().acquire_owned() => permit.ok(),
            };

            let Some(permit) = permit else {
                for item in std::iter::once(item).chain(pending.by_ref()) {
                    if let Some(&i) = index.get(item.key()) {
                        outcomes[i] = Some(failed_outcome(&item, "not started: cancelled", 0));
                    }
                }
                break;
            };

            let this = self.clone();
            let slot = index.get(item.key()).copied();
            tasks.spawn(async move {
                let _permit = permit;
                (slot, this.transfer_item(item).await)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((Some(i), outcome)) => outcomes[i] = Some(outcome),
                Ok((None, _)) => {}
                Err(e) => tracing::error!(error = %e, "Transfer task panicked"),
            }
        }

        let outcomes: Vec<TransferOutcome> = outcomes
            .into_iter()
            .zip(&items)
            .map(|(outcome, item)| {
                outcome.unwrap_or_else(|| failed_outcome(item, "transfer task aborted", 0))
            })
            .collect();

        let failed: Vec<DownloadItem> = outcomes
            .iter()
            .zip(&items)
            .filter(|(outcome, _)| outcome.status == TransferStatus::Failed)
            .map(|(_, item)| item.clone())
            .collect();
        *self.failed.lock().await = failed;

        let mut summary = BatchSummary::from_outcomes(&outcomes, started.elapsed());
        summary.invalid_removed = partition.invalid.len();
        summary.peak_in_flight = self.in_flight.peak();
        summary.cancelled = self.cancel_token.is_cancelled();

        tracing::info!(
            downloaded = summary.downloaded,
            skipped = summary.skipped,
            failed = summary.failed,
            bytes = summary.total_bytes,
            elapsed_ms = summary.duration.as_millis() as u64,
            "Batch finished"
        );
        self.emit_event(Event::BatchFinished {
            downloaded: summary.downloaded,
            skipped: summary.skipped,
            failed: summary.failed,
        });

        summary
    }

    /// Run one admitted item to completion or failure
    async fn transfer_item(&self, item: DownloadItem) -> TransferOutcome {
        let key = item.key().to_string();
        let dest = item.dest_path(&self.config.download.download_dir);

        self.emit_event(Event::ItemState {
            key: key.clone(),
            state: ItemState::InFlight,
        });
        self.in_flight.enter();

        let last_emitted = AtomicU64::new(0);
        let progress = |bytes: u64, total: Option<u64>| {
            let last = last_emitted.load(Ordering::Relaxed);
            if bytes >= last + PROGRESS_EVENT_STEP || Some(bytes) == total {
                last_emitted.store(bytes, Ordering::Relaxed);
                self.emit_event(Event::Progress {
                    key: key.clone(),
                    bytes,
                    total,
                });
            }
        };

        let fetched = tokio::select! {
            report = self.transfer.fetch(item.url(), &dest, &progress) => Some(report),
            _ = self.cancel_token.cancelled() => None,
        };
        self.in_flight.leave();

        let report = fetched.unwrap_or_else(|| {
            tracing::info!(key = %key, "Transfer aborted by cancellation");
            remove_partial(&staging_path(&dest));
            TransferReport {
                error: Some(TransferError::Cancelled),
                ..Default::default()
            }
        });

        match report.error {
            None => {
                self.ledger.lock().await.record(&key);
                self.emit_event(Event::ItemState {
                    key: key.clone(),
                    state: ItemState::Succeeded,
                });
                self.emit_event(Event::ItemCompleted {
                    key: key.clone(),
                    bytes: report.bytes,
                    attempts: report.attempts,
                });
                TransferOutcome {
                    key,
                    status: TransferStatus::Downloaded,
                    bytes: report.bytes,
                    attempts: report.attempts,
                    error: None,
                }
            }
            Some(e) => {
                tracing::warn!(key = %key, attempts = report.attempts, error = %e, "Item failed");
                self.emit_event(Event::ItemState {
                    key: key.clone(),
                    state: ItemState::Failed,
                });
                self.emit_event(Event::ItemFailed {
                    key: key.clone(),
                    error: e.to_string(),
                    attempts: report.attempts,
                });
                failed_outcome(&item, &e.to_string(), report.attempts)
            }
        }
    }
}

fn failed_outcome(item: &DownloadItem, error: &str, attempts: u32) -> TransferOutcome {
    TransferOutcome {
        key: item.key().to_string(),
        status: TransferStatus::Failed,
        bytes: 0,
        attempts,
        error: Some(error.to_string()),
    }
}
