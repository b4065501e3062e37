//! Retry rounds over the failed set

use super::BatchDownloader;
use crate::retry::round_backoff;
use crate::types::{BatchSummary, Event, ItemState};

impl BatchDownloader {
    /// Re-run the items that failed in the most recent pass
    ///
    /// Runs at most `max_rounds` rounds. Before round `n` (0-based) the
    /// failed items wait `round_backoff * 2^n`, capped at the retry policy's
    /// `max_delay`. Stops as soon as nothing is left to retry or the batch is
    /// cancelled. The returned summary covers the rounds only; fold it into
    /// the first pass with [`BatchSummary::merge_retry`].
    pub async fn retry(&self, max_rounds: u32) -> BatchSummary {
        let mut combined: Option<BatchSummary> = None;

        for round in 0..max_rounds {
            let pending = self.failed_items().await;
            if pending.is_empty() || self.is_cancelled() {
                break;
            }

            let delay = round_backoff(
                self.config.download.round_backoff,
                round,
                self.config.retry.max_delay,
            );
            tracing::info!(
                round = round + 1,
                max_rounds,
                pending = pending.len(),
                delay_ms = delay.as_millis() as u64,
                "Starting retry round"
            );
            self.emit_event(Event::RetryRound {
                round: round + 1,
                max_rounds,
                pending: pending.len(),
                delay_ms: delay.as_millis() as u64,
            });
            for item in &pending {
                self.emit_event(Event::ItemState {
                    key: item.key().to_string(),
                    state: ItemState::BackoffWait,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.cancel_token.cancelled() => break,
            }

            let summary = self.pass(&pending, false).await;
            match combined.as_mut() {
                Some(total) => total.merge_retry(&summary),
                None => combined = Some(summary),
            }
        }

        match combined {
            Some(summary) => summary,
            None => {
                // No round ran: the failed set stands as it was
                let failed_items: Vec<String> = self
                    .failed_items()
                    .await
                    .iter()
                    .map(|item| item.key().to_string())
                    .collect();
                BatchSummary {
                    failed: failed_items.len(),
                    failed_items,
                    cancelled: self.is_cancelled(),
                    ..Default::default()
                }
            }
        }
    }
}
