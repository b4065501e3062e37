//! Resume ledger
//!
//! A hidden JSON sidecar inside the download directory that remembers which
//! files were confirmed complete. The filesystem stays the source of truth:
//! an unreadable ledger loads as empty and a failed save is only logged.
//!
//! ```json
//! {
//!   "completed_files": ["00001lesson.mp3", "course_materials/Ep01_notes.pdf"],
//!   "last_updated": "2026-01-01T12:00:00Z",
//!   "config": {"concurrent_downloads": 3, "total_episodes": 20}
//! }
//! ```

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// File name of the ledger inside the download directory
pub const LEDGER_FILE_NAME: &str = ".channel_plus_resume.json";

/// Run parameters recorded next to the completed set
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Concurrency used by the run that wrote the ledger
    pub concurrent_downloads: usize,
    /// Items the run was asked for
    pub total_episodes: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    #[serde(default)]
    completed_files: Vec<String>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    config: Option<LedgerConfig>,
}

/// What [`ResumeLedger::load`] found
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    /// Relative paths previously confirmed complete
    pub completed: BTreeSet<String>,
    /// When the ledger was last written, if known
    pub last_updated: Option<DateTime<Utc>>,
    /// Parameters of the run that wrote it
    pub config: Option<LedgerConfig>,
}

/// Handle on the ledger file of one download directory
#[derive(Clone, Debug)]
pub struct ResumeLedger {
    path: PathBuf,
    config: LedgerConfig,
}

impl ResumeLedger {
    /// Ledger for `download_dir`; `config` is written with every save
    pub fn new(download_dir: &Path, config: LedgerConfig) -> Self {
        Self {
            path: download_dir.join(LEDGER_FILE_NAME),
            config,
        }
    }

    /// Update the item count written with the next save
    pub fn set_total_episodes(&mut self, total: usize) {
        self.config.total_episodes = total;
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a ledger file is present
    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the completed set; a missing or corrupt ledger yields an empty snapshot
    pub fn load(&self) -> LedgerSnapshot {
        let raw = match std::fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return LedgerSnapshot::default();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to read resume ledger, starting fresh");
                return LedgerSnapshot::default();
            }
        };

        let file: LedgerFile = match serde_json::from_slice(&raw) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Corrupt resume ledger, starting fresh");
                return LedgerSnapshot::default();
            }
        };

        let completed: BTreeSet<String> = file
            .completed_files
            .iter()
            .filter_map(|entry| normalize_key(entry))
            .collect();

        tracing::debug!(
            path = %self.path.display(),
            entries = completed.len(),
            "Loaded resume ledger"
        );

        LedgerSnapshot {
            completed,
            last_updated: file.last_updated,
            config: file.config,
        }
    }

    /// Persist `completed`, logging instead of failing
    pub fn save(&self, completed: &BTreeSet<String>) {
        if let Err(e) = self.try_save(completed) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to save resume ledger");
        }
    }

    /// Persist `completed` atomically (temp file then rename)
    pub fn try_save(&self, completed: &BTreeSet<String>) -> Result<()> {
        let file = LedgerFile {
            completed_files: completed.iter().cloned().collect(),
            last_updated: Some(Utc::now()),
            config: Some(self.config),
        };
        let bytes = serde_json::to_vec_pretty(&file)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    /// Delete the ledger file, leaving downloaded media alone
    ///
    /// Returns whether a file was removed.
    pub fn clear(&self) -> Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Resume ledger cleared");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Normalise a stored entry to a `/`-separated relative path
fn normalize_key(entry: &str) -> Option<String> {
    let parts: Vec<&str> = entry
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    if parts.is_empty() || parts.contains(&"..") {
        return None;
    }
    Some(parts.join("/"))
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}
