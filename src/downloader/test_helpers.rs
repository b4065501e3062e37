//! Shared test helpers: a scripted in-memory transfer and downloader factory.

use crate::config::{Config, RetryConfig};
use crate::downloader::BatchDownloader;
use crate::error::TransferError;
use crate::ledger::{LedgerConfig, ResumeLedger};
use crate::retry::download_with_retry;
use crate::transfer::{MediaTransfer, ProgressFn, TransferReport, staging_path};
use crate::types::{DownloadItem, ItemKind};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

/// What one attempt against a URL does
#[derive(Clone, Debug)]
pub(crate) enum Step {
    /// Write a valid audio body of this many bytes
    Body(usize),
    /// Answer with this HTTP status
    Status(u16),
    /// Write a few bytes to the staging file, then never finish
    Hang,
}

/// In-memory [`MediaTransfer`] driven by per-URL scripts
///
/// Unscripted URLs (or exhausted scripts) succeed with a 2000-byte body.
/// Attempts go through the real retry loop.
pub(crate) struct ScriptedTransfer {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    retry: RetryConfig,
    latency: Duration,
    current: AtomicUsize,
    peak: AtomicUsize,
    calls: Mutex<Vec<String>>,
    /// Ledger sizes seen at the start of each fetch
    ledger_sizes: Mutex<Vec<usize>>,
    observed_ledger: Option<PathBuf>,
}

impl ScriptedTransfer {
    pub(crate) fn new(latency: Duration) -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            retry: RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_multiplier: 2.0,
                jitter: false,
            },
            latency,
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            ledger_sizes: Mutex::new(Vec::new()),
            observed_ledger: None,
        }
    }

    /// Record the ledger size in `dir` at the start of every fetch
    pub(crate) fn observing_ledger(mut self, dir: &Path) -> Self {
        self.observed_ledger = Some(dir.to_path_buf());
        self
    }

    pub(crate) fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), steps.into_iter().collect());
    }

    pub(crate) fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn ledger_sizes(&self) -> Vec<usize> {
        self.ledger_sizes.lock().unwrap().clone()
    }

    fn next_step(&self, url: &str) -> Step {
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|steps| steps.pop_front())
            .unwrap_or(Step::Body(2000))
    }

    async fn attempt(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let result = self.run_step(url, dest, on_progress).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn run_step(
        &self,
        url: &str,
        dest: &Path,
        on_progress: ProgressFn<'_>,
    ) -> Result<u64, TransferError> {
        tokio::time::sleep(self.latency).await;
        match self.next_step(url) {
            Step::Body(len) => {
                let mut body = b"ID3".to_vec();
                body.resize(len.max(3), 0x11);
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(staging_path(dest), &body).unwrap();
                std::fs::rename(staging_path(dest), dest).unwrap();
                on_progress(body.len() as u64, Some(body.len() as u64));
                Ok(body.len() as u64)
            }
            Step::Status(code) => Err(TransferError::from_status(code, url)),
            Step::Hang => {
                if let Some(parent) = dest.parent() {
                    std::fs::create_dir_all(parent).unwrap();
                }
                std::fs::write(staging_path(dest), b"ID3partial").unwrap();
                on_progress(10, None);
                std::future::pending().await
            }
        }
    }
}

#[async_trait::async_trait]
impl MediaTransfer for ScriptedTransfer {
    async fn fetch(&self, url: &str, dest: &Path, on_progress: ProgressFn<'_>) -> TransferReport {
        if let Some(dir) = &self.observed_ledger {
            let size = ResumeLedger::new(dir, LedgerConfig::default())
                .load()
                .completed
                .len();
            self.ledger_sizes.lock().unwrap().push(size);
        }

        let mut attempts = 0;
        let result = download_with_retry(&self.retry, |attempt| {
            attempts = attempt;
            self.attempt(url, dest, on_progress)
        })
        .await;

        match result {
            Ok(bytes) => TransferReport {
                bytes,
                total: Some(bytes),
                attempts,
                error: None,
            },
            Err(e) => {
                let _ = std::fs::remove_file(staging_path(dest));
                TransferReport {
                    bytes: 0,
                    total: None,
                    attempts,
                    error: Some(e),
                }
            }
        }
    }
}

/// Audio items `1..=n` pointing at `https://example.test/api/audio/k<i>`
pub(crate) fn audio_items(n: u32) -> Vec<DownloadItem> {
    (1..=n)
        .map(|i| {
            DownloadItem::new(
                i,
                item_url(i),
                format!("{i:05}lesson.mp3"),
                ItemKind::Audio,
            )
            .unwrap()
        })
        .collect()
}

pub(crate) fn item_url(i: u32) -> String {
    format!("https://example.test/api/audio/k{i}")
}

/// Write a file that passes validation for `item`
pub(crate) fn write_valid(root: &Path, item: &DownloadItem) {
    let mut bytes = b"ID3".to_vec();
    bytes.resize(1500, 0);
    let dest = item.dest_path(root);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(dest, bytes).unwrap();
}

/// Config pointing at a temp download dir with fast retry rounds
pub(crate) fn test_config(dir: &TempDir, concurrency: usize) -> Config {
    let mut config = Config::default();
    config.download.download_dir = dir.path().join("downloads");
    config.download.concurrent_downloads = concurrency;
    config.download.delay_between_requests = Duration::ZERO;
    config.download.round_backoff = Duration::from_millis(10);
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(100);
    config
}

/// Downloader over `transfer` in a fresh temp directory (keep the TempDir alive)
pub(crate) async fn create_test_downloader(
    concurrency: usize,
    transfer: Arc<ScriptedTransfer>,
) -> (BatchDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let config = test_config(&temp_dir, concurrency);
    let downloader = BatchDownloader::new(config, transfer).await.unwrap();
    (downloader, temp_dir)
}
