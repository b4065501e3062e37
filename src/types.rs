//! Core types for channelplus-dl

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// What a download item carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Episode audio
    Audio,
    /// Course material attachment (PDF and friends)
    Material,
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemKind::Audio => write!(f, "audio"),
            ItemKind::Material => write!(f, "material"),
        }
    }
}

/// One unit of work: where to fetch from and where to put it
///
/// Immutable once constructed. The target is a relative path under the
/// download directory with `/` separators; it doubles as the ledger key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadItem {
    ordinal: u32,
    url: String,
    target: String,
    kind: ItemKind,
}

impl DownloadItem {
    /// Validate and build an item
    ///
    /// The URL must be http(s). The target must be non-empty, relative and
    /// must not climb out of the download directory.
    pub fn new(
        ordinal: u32,
        url: impl Into<String>,
        target: impl AsRef<Path>,
        kind: ItemKind,
    ) -> Result<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url)
            .map_err(|e| Error::InvalidItem(format!("bad URL {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::InvalidItem(format!(
                "unsupported URL scheme {:?} in {url}",
                parsed.scheme()
            )));
        }

        let target = target.as_ref();
        let mut parts = Vec::new();
        for component in target.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(s) => parts.push(s),
                    None => {
                        return Err(Error::InvalidItem(format!(
                            "target path is not valid UTF-8: {}",
                            target.display()
                        )));
                    }
                },
                Component::CurDir => {}
                _ => {
                    return Err(Error::InvalidItem(format!(
                        "target must be a plain relative path: {}",
                        target.display()
                    )));
                }
            }
        }
        if parts.is_empty() {
            return Err(Error::InvalidItem("target path is empty".into()));
        }

        Ok(Self {
            ordinal,
            url,
            target: parts.join("/"),
            kind,
        })
    }

    /// Position within the course, used for ordering
    pub fn ordinal(&self) -> u32 {
        self.ordinal
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Relative target path with `/` separators (also the ledger key)
    pub fn key(&self) -> &str {
        &self.target
    }

    /// Audio or material
    pub fn kind(&self) -> ItemKind {
        self.kind
    }

    /// Absolute destination under `root`
    pub fn dest_path(&self, root: &Path) -> PathBuf {
        self.target
            .split('/')
            .fold(root.to_path_buf(), |path, part| path.join(part))
    }
}

/// Per-item lifecycle inside a batch
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    /// Waiting for an admission permit
    Queued,
    /// Transfer running
    InFlight,
    /// Waiting out a backoff before the next retry round
    BackoffWait,
    /// File written and recorded in the ledger
    Succeeded,
    /// Attempts exhausted or terminal error
    Failed,
}

/// How an item ended up
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Already complete on disk
    Skipped,
    /// Fetched in this run
    Downloaded,
    /// Not fetched
    Failed,
}

/// Result for one item, folded into a [`BatchSummary`]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Ledger key of the item
    pub key: String,
    /// Final status
    pub status: TransferStatus,
    /// Bytes written (0 for skipped or failed items)
    pub bytes: u64,
    /// Attempts made by the transfer client (0 when skipped)
    pub attempts: u32,
    /// Failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TransferOutcome {
    /// Outcome for an item that was already complete
    pub fn skipped(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: TransferStatus::Skipped,
            bytes: 0,
            attempts: 0,
            error: None,
        }
    }
}

/// Aggregate of one batch invocation (or a batch plus its retry rounds)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Items fetched
    pub downloaded: usize,
    /// Items already complete on disk
    pub skipped: usize,
    /// Items that could not be fetched
    pub failed: usize,
    /// Pre-existing files deleted because they failed validation
    pub invalid_removed: usize,
    /// Bytes written
    pub total_bytes: u64,
    /// Wall-clock time spent
    #[serde(with = "duration_millis")]
    pub duration: Duration,
    /// Highest number of simultaneous transfers observed
    pub peak_in_flight: usize,
    /// Keys of failed items, in input order
    pub failed_items: Vec<String>,
    /// Whether an interrupt cut the batch short
    pub cancelled: bool,
}

impl BatchSummary {
    /// Build a summary from per-item outcomes (given in input order)
    pub fn from_outcomes(outcomes: &[TransferOutcome], duration: Duration) -> Self {
        let mut summary = BatchSummary {
            duration,
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.status {
                TransferStatus::Downloaded => {
                    summary.downloaded += 1;
                    summary.total_bytes += outcome.bytes;
                }
                TransferStatus::Skipped => summary.skipped += 1,
                TransferStatus::Failed => {
                    summary.failed += 1;
                    summary.failed_items.push(outcome.key.clone());
                }
            }
        }
        summary
    }

    /// Items accounted for
    pub fn total(&self) -> usize {
        self.downloaded + self.skipped + self.failed
    }

    /// Share of items that are now on disk, in percent (100 for an empty batch)
    pub fn success_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 100.0;
        }
        ((self.downloaded + self.skipped) * 100) as f64 / total as f64
    }

    /// Average write throughput, 0 when nothing was timed
    pub fn throughput_bytes_per_sec(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs <= 0.0 {
            return 0.0;
        }
        self.total_bytes as f64 / secs
    }

    /// Fold a retry round over the failed set into this summary
    ///
    /// The round only saw previously failed items, so its failures replace
    /// ours while its successes add up.
    pub fn merge_retry(&mut self, round: &BatchSummary) {
        self.downloaded += round.downloaded;
        self.skipped += round.skipped;
        self.invalid_removed += round.invalid_removed;
        self.total_bytes += round.total_bytes;
        self.duration += round.duration;
        self.peak_in_flight = self.peak_in_flight.max(round.peak_in_flight);
        self.failed = round.failed;
        self.failed_items = round.failed_items.clone();
        self.cancelled |= round.cancelled;
    }
}

/// Event emitted during a batch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Reconciliation finished and transfers are about to start
    BatchStarted {
        /// Items requested
        total: usize,
        /// Items that need a transfer
        to_download: usize,
        /// Items already complete
        skipped: usize,
        /// Corrupt files that were removed
        invalid: usize,
    },

    /// An item moved through its state machine
    ItemState {
        /// Item key
        key: String,
        /// New state
        state: ItemState,
    },

    /// Bytes arrived for an item
    Progress {
        /// Item key
        key: String,
        /// Bytes written so far
        bytes: u64,
        /// Content length when the server sent one
        #[serde(skip_serializing_if = "Option::is_none")]
        total: Option<u64>,
    },

    /// An item was fetched and recorded
    ItemCompleted {
        /// Item key
        key: String,
        /// Bytes written
        bytes: u64,
        /// Attempts needed
        attempts: u32,
    },

    /// An item could not be fetched
    ItemFailed {
        /// Item key
        key: String,
        /// Error message
        error: String,
        /// Attempts made
        attempts: u32,
    },

    /// A retry round is about to start after its backoff
    RetryRound {
        /// 1-based round number
        round: u32,
        /// Configured number of rounds
        max_rounds: u32,
        /// Items to retry
        pending: usize,
        /// Backoff before the round
        delay_ms: u64,
    },

    /// The batch resolved every item
    BatchFinished {
        /// Items fetched
        downloaded: usize,
        /// Items already complete
        skipped: usize,
        /// Items that failed
        failed: usize,
    },
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
