//! Integrity checks for files already on disk
//!
//! A file counts as complete when it is at least [`MIN_COMPLETE_SIZE`] bytes
//! long and, for audio, starts with a recognised container signature. Any
//! read error counts as incomplete. Nothing here writes to disk.

use crate::types::ItemKind;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Files shorter than this are never complete
pub const MIN_COMPLETE_SIZE: u64 = 1000;

/// Extensions whose leading bytes are checked
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "mp4", "aac", "wav", "ogg", "flac"];

/// Bytes read for signature sniffing
const HEADER_LEN: usize = 12;

/// Result of inspecting one file
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Passes every gate
    Complete,
    /// Nothing at the path (or not a regular file)
    Missing,
    /// Below the size gate
    TooSmall {
        /// Actual size in bytes
        size: u64,
    },
    /// Leading bytes match no known audio container
    UnknownFormat,
    /// Metadata or header could not be read
    Unreadable,
}

impl Verdict {
    /// True only for [`Verdict::Complete`]
    pub fn is_complete(self) -> bool {
        self == Verdict::Complete
    }

    /// Whether a file exists at the path at all
    pub fn exists(self) -> bool {
        self != Verdict::Missing
    }
}

/// Decide whether the file at `path` is complete
pub fn is_complete(path: &Path, expected_kind: ItemKind) -> bool {
    inspect(path, expected_kind).is_complete()
}

/// Inspect the file at `path` and report which gate, if any, it fails
pub fn inspect(path: &Path, expected_kind: ItemKind) -> Verdict {
    let metadata = match std::fs::metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Verdict::Missing,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Cannot stat file");
            return Verdict::Unreadable;
        }
    };
    if !metadata.is_file() {
        return Verdict::Missing;
    }

    let size = metadata.len();
    if size < MIN_COMPLETE_SIZE {
        return Verdict::TooSmall { size };
    }

    if !needs_format_check(path, expected_kind) {
        return Verdict::Complete;
    }

    let mut header = [0u8; HEADER_LEN];
    let read = File::open(path).and_then(|mut f| read_prefix(&mut f, &mut header));
    match read {
        Ok(n) if has_audio_signature(&header[..n]) => Verdict::Complete,
        Ok(_) => Verdict::UnknownFormat,
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Cannot read file header");
            Verdict::Unreadable
        }
    }
}

fn needs_format_check(path: &Path, expected_kind: ItemKind) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => AUDIO_EXTENSIONS
            .iter()
            .any(|a| a.eq_ignore_ascii_case(ext)),
        // An extensionless file we expect to be audio still gets sniffed
        None => expected_kind == ItemKind::Audio,
    }
}

fn read_prefix(reader: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Recognise ID3 tags, MPEG frame sync, ISO-BMFF `ftyp`, RIFF, Ogg and FLAC
fn has_audio_signature(header: &[u8]) -> bool {
    if header.starts_with(b"ID3")
        || header.starts_with(b"RIFF")
        || header.starts_with(b"OggS")
        || header.starts_with(b"fLaC")
    {
        return true;
    }
    if header.len() >= 2 && header[0] == 0xFF && header[1] & 0xE0 == 0xE0 {
        return true;
    }
    header.windows(4).any(|w| w == b"ftyp")
}
