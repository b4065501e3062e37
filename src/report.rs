//! Presentation helpers for the command-line surface
//!
//! [`ProgressView`] turns the orchestrator's event stream into indicatif
//! progress bars; the `render_*` functions format summaries as plain text.

use crate::types::{BatchSummary, Event, ItemState};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;
use std::fmt::Write as _;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const RULE_WIDTH: usize = 50;

/// Success rate at or above which a partial run is reported as a warning
/// rather than a failure
pub const ACCEPTABLE_SUCCESS_RATE: f64 = 90.0;

/// Live progress bars fed by a batch's event stream
pub struct ProgressView {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressView {
    /// Start rendering events from `events` to `target`
    pub fn spawn(mut events: broadcast::Receiver<Event>, target: ProgressDrawTarget) -> Self {
        let stop = CancellationToken::new();
        let token = stop.clone();
        let task = tokio::spawn(async move {
            let mut bars = Bars::new(target);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => bars.apply(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::debug!(skipped, "Progress view fell behind");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            bars.clear();
        });
        Self { stop, task }
    }

    /// Stop rendering and clear the bars
    pub async fn finish(self) {
        self.stop.cancel();
        if let Err(e) = self.task.await {
            tracing::debug!(error = %e, "Progress view task ended abnormally");
        }
    }
}

struct Bars {
    mp: MultiProgress,
    overall: ProgressBar,
    items: HashMap<String, ProgressBar>,
    item_style: ProgressStyle,
    /// Used while the server has not announced a length
    spinner_style: ProgressStyle,
}

impl Bars {
    fn new(target: ProgressDrawTarget) -> Self {
        let mp = MultiProgress::with_draw_target(target);
        let overall_style = ProgressStyle::with_template(
            "{prefix:>9} [{elapsed_precise}] {wide_bar} {pos}/{len} {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
        let item_style = ProgressStyle::with_template(
            "{prefix:>9} {bar:30.cyan/blue} {bytes}/{total_bytes} {wide_msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ");
        let spinner_style = ProgressStyle::with_template("{prefix:>9} {spinner} {bytes} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let overall = mp.add(ProgressBar::new(0));
        overall.set_style(overall_style);
        overall.set_prefix("episodes");

        Self {
            mp,
            overall,
            items: HashMap::new(),
            item_style,
            spinner_style,
        }
    }

    fn apply(&mut self, event: &Event) {
        match event {
            Event::BatchStarted {
                to_download,
                skipped,
                ..
            } => {
                self.overall.set_length(*to_download as u64);
                self.overall.set_position(0);
                self.overall.set_message(format!("({skipped} already complete)"));
            }
            Event::ItemState {
                key,
                state: ItemState::InFlight,
            } => {
                let bar = self.mp.add(ProgressBar::new_spinner());
                bar.set_style(self.spinner_style.clone());
                bar.set_prefix("get");
                bar.set_message(key.clone());
                if let Some(old) = self.items.insert(key.clone(), bar) {
                    old.finish_and_clear();
                }
            }
            Event::Progress { key, bytes, total } => {
                if let Some(bar) = self.items.get(key) {
                    match total {
                        Some(total) if bar.length() != Some(*total) => {
                            bar.set_style(self.item_style.clone());
                            bar.set_length(*total);
                        }
                        Some(_) => {}
                        // No Content-Length: keep spinning and count bytes
                        None => bar.tick(),
                    }
                    bar.set_position(*bytes);
                }
            }
            Event::ItemCompleted { key, .. } => {
                self.close_item(key);
                self.overall.inc(1);
            }
            Event::ItemFailed { key, error, .. } => {
                self.close_item(key);
                self.overall.inc(1);
                let _ = self.mp.println(format!("failed: {key}: {error}"));
            }
            Event::RetryRound {
                round,
                max_rounds,
                pending,
                delay_ms,
            } => {
                self.overall.set_length(*pending as u64);
                self.overall.set_position(0);
                self.overall.set_message(format!(
                    "(retry round {round}/{max_rounds} after {:.1}s)",
                    *delay_ms as f64 / 1000.0
                ));
            }
            Event::BatchFinished { failed, .. } => {
                self.overall.set_message(format!("({failed} failed)"));
            }
            Event::ItemState { .. } => {}
        }
    }

    fn close_item(&mut self, key: &str) {
        if let Some(bar) = self.items.remove(key) {
            bar.finish_and_clear();
            self.mp.remove(&bar);
        }
    }

    fn clear(&mut self) {
        for (_, bar) in self.items.drain() {
            bar.finish_and_clear();
        }
        self.overall.finish_and_clear();
        let _ = self.mp.clear();
    }
}

/// Human-readable size in MiB with one decimal
pub fn format_megabytes(bytes: u64) -> String {
    format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
}

/// Plain-text block describing one batch
pub fn render_summary(title: &str, summary: &BatchSummary) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let mut out = String::new();
    let _ = writeln!(out, "\n{title}");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total items: {}", summary.total());
    let _ = writeln!(out, "Downloaded: {}", summary.downloaded);
    let _ = writeln!(out, "Already complete: {}", summary.skipped);
    if summary.invalid_removed > 0 {
        let _ = writeln!(out, "Replaced incomplete files: {}", summary.invalid_removed);
    }
    let _ = writeln!(out, "Failed: {}", summary.failed);
    let _ = writeln!(out, "Success rate: {:.1}%", summary.success_rate());
    if summary.total_bytes > 0 {
        let _ = writeln!(out, "Total downloaded: {}", format_megabytes(summary.total_bytes));
        let _ = writeln!(
            out,
            "Average speed: {:.2} MB/s",
            summary.throughput_bytes_per_sec() / (1024.0 * 1024.0)
        );
    }
    let _ = writeln!(out, "Duration: {:.1} seconds", summary.duration.as_secs_f64());
    if !summary.failed_items.is_empty() {
        let _ = writeln!(out, "\nFailed items:");
        for key in &summary.failed_items {
            let _ = writeln!(out, "  - {key}");
        }
    }
    if summary.cancelled {
        let _ = writeln!(out, "\nInterrupted before completion");
    }
    let _ = write!(out, "{rule}");
    out
}

/// How a run ended, judged by its final success rate
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FinalStatus {
    /// Every item is on disk
    Complete,
    /// Most items are on disk
    Partial(f64),
    /// Too many items are missing
    Poor(f64),
}

impl FinalStatus {
    /// Classify a merged summary
    pub fn of(summary: &BatchSummary) -> Self {
        let rate = summary.success_rate();
        if summary.failed == 0 {
            FinalStatus::Complete
        } else if rate >= ACCEPTABLE_SUCCESS_RATE {
            FinalStatus::Partial(rate)
        } else {
            FinalStatus::Poor(rate)
        }
    }

    /// One-line message for the end of a run
    pub fn message(&self) -> String {
        match self {
            FinalStatus::Complete => "All downloads completed successfully".to_string(),
            FinalStatus::Partial(rate) => {
                format!("Download completed with {rate:.1}% success rate")
            }
            FinalStatus::Poor(rate) => format!(
                "Download completed with {rate:.1}% success rate; run the command again later to fetch the rest"
            ),
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn summary(downloaded: usize, skipped: usize, failed: usize) -> BatchSummary {
        BatchSummary {
            downloaded,
            skipped,
            failed,
            total_bytes: 3 * 1024 * 1024,
            duration: Duration::from_secs(2),
            failed_items: (0..failed).map(|i| format!("{i:05}x.mp3")).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn summary_lists_counts_and_failures() {
        let text = render_summary("Download Summary", &summary(7, 2, 1));
        assert!(text.contains("Total items: 10"), "{text}");
        assert!(text.contains("Downloaded: 7"));
        assert!(text.contains("Already complete: 2"));
        assert!(text.contains("Success rate: 90.0%"));
        assert!(text.contains("Total downloaded: 3.0 MB"));
        assert!(text.contains("  - 00000x.mp3"));
        assert!(!text.contains("Interrupted"));
    }

    #[test]
    fn final_status_thresholds() {
        assert_eq!(FinalStatus::of(&summary(10, 0, 0)), FinalStatus::Complete);
        assert_eq!(FinalStatus::of(&summary(9, 0, 1)), FinalStatus::Partial(90.0));
        assert!(matches!(FinalStatus::of(&summary(1, 0, 1)), FinalStatus::Poor(_)));
        assert!(FinalStatus::Poor(50.0).message().contains("50.0%"));
    }

    #[test]
    fn megabytes() {
        assert_eq!(format_megabytes(0), "0.0 MB");
        assert_eq!(format_megabytes(1536 * 1024), "1.5 MB");
    }

    #[test]
    fn bars_follow_item_lifecycle() {
        let mut bars = Bars::new(ProgressDrawTarget::hidden());
        bars.apply(&Event::BatchStarted {
            total: 3,
            to_download: 2,
            skipped: 1,
            invalid: 0,
        });
        assert_eq!(bars.overall.length(), Some(2));

        bars.apply(&Event::ItemState {
            key: "a.mp3".into(),
            state: ItemState::InFlight,
        });
        bars.apply(&Event::Progress {
            key: "a.mp3".into(),
            bytes: 500,
            total: Some(1000),
        });
        assert_eq!(bars.items["a.mp3"].position(), 500);
        assert_eq!(bars.items["a.mp3"].length(), Some(1000));

        bars.apply(&Event::ItemCompleted {
            key: "a.mp3".into(),
            bytes: 1000,
            attempts: 1,
        });
        assert!(bars.items.is_empty());
        assert_eq!(bars.overall.position(), 1);

        bars.apply(&Event::RetryRound {
            round: 1,
            max_rounds: 2,
            pending: 1,
            delay_ms: 1000,
        });
        assert_eq!(bars.overall.position(), 0);
        assert_eq!(bars.overall.length(), Some(1));
        bars.clear();
    }

    #[test]
    fn unknown_length_keeps_a_spinner() {
        let mut bars = Bars::new(ProgressDrawTarget::hidden());
        bars.apply(&Event::ItemState {
            key: "chunked.mp3".into(),
            state: ItemState::InFlight,
        });
        assert_eq!(bars.items["chunked.mp3"].length(), None);

        for bytes in [8192, 16384, 24576] {
            bars.apply(&Event::Progress {
                key: "chunked.mp3".into(),
                bytes,
                total: None,
            });
        }
        let bar = &bars.items["chunked.mp3"];
        assert_eq!(bar.length(), None, "no length may be invented");
        assert_eq!(bar.position(), 24576);

        bars.apply(&Event::ItemFailed {
            key: "chunked.mp3".into(),
            error: "HTTP 503".into(),
            attempts: 3,
        });
        assert!(bars.items.is_empty());
        assert_eq!(bars.overall.position(), 1);
        bars.clear();
    }

    #[tokio::test]
    async fn view_stops_on_finish() {
        let (tx, rx) = broadcast::channel(16);
        let view = ProgressView::spawn(rx, ProgressDrawTarget::hidden());
        tx.send(Event::BatchFinished {
            downloaded: 0,
            skipped: 0,
            failed: 0,
        })
        .unwrap();
        tokio::time::timeout(Duration::from_secs(2), view.finish())
            .await
            .unwrap();
    }
}
