//! Reconcile the requested items against the download directory and ledger
//!
//! Every item lands in exactly one of `to_download` or `existing`; items whose
//! file was found corrupt are also listed in `invalid`. Input order is kept
//! within each list.

use crate::types::DownloadItem;
use crate::validator::{self, Verdict};
use std::collections::BTreeSet;
use std::path::Path;

/// Outcome of [`partition`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Partition {
    /// Items that need a transfer (includes every `invalid` item)
    pub to_download: Vec<DownloadItem>,
    /// Items complete on disk
    pub existing: Vec<DownloadItem>,
    /// Items whose file failed validation and was deleted
    pub invalid: Vec<DownloadItem>,
}

/// Split `items` into work and already-complete files
///
/// `completed` is the in-memory ledger set. It is updated in place: valid
/// files found without a ledger entry are added, and entries whose file is
/// gone or corrupt are removed. With `force` every item is scheduled and
/// neither the disk nor `completed` is consulted.
pub fn partition(
    root: &Path,
    items: &[DownloadItem],
    completed: &mut BTreeSet<String>,
    force: bool,
) -> Partition {
    let mut result = Partition::default();

    if force {
        tracing::info!(items = items.len(), "Force mode: scheduling every item");
        result.to_download = items.to_vec();
        return result;
    }

    for item in items {
        let path = item.dest_path(root);
        let ledgered = completed.contains(item.key());

        match validator::inspect(&path, item.kind()) {
            Verdict::Complete => {
                if !ledgered {
                    tracing::debug!(key = item.key(), "Found complete file missing from ledger");
                    completed.insert(item.key().to_string());
                }
                result.existing.push(item.clone());
            }
            Verdict::Missing => {
                if ledgered {
                    tracing::debug!(key = item.key(), "Ledger entry has no file, dropping it");
                    completed.remove(item.key());
                }
                result.to_download.push(item.clone());
            }
            verdict => {
                tracing::warn!(
                    key = item.key(),
                    verdict = ?verdict,
                    "Existing file failed validation, removing it"
                );
                if let Err(e) = std::fs::remove_file(&path) {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove invalid file");
                }
                completed.remove(item.key());
                result.invalid.push(item.clone());
                result.to_download.push(item.clone());
            }
        }
    }

    tracing::info!(
        to_download = result.to_download.len(),
        existing = result.existing.len(),
        invalid = result.invalid.len(),
        "Reconciled download directory"
    );

    result
}
