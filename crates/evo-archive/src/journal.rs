//! Append-only, hash-chained journal of committed variants
//!
//! One JSON line per commit. Each entry carries the SHA-256 of its sequence
//! number, its variant record and the previous entry's hash, so replay can
//! detect edits, reordering and dropped lines. A final line without a
//! trailing newline is a torn write from a crash: it is discarded on open
//! unless it still verifies, in which case the missing newline is restored.

use crate::error::JournalError;
use crate::variant::Variant;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// One persisted commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Commit sequence number; equals the variant id
    pub seq: u64,
    /// Hex hash of the previous entry (zeros for the first)
    pub prev_hash: String,
    /// Hex hash of this entry
    pub hash: String,
    /// The committed record
    pub variant: Variant,
}

/// Writable journal handle
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    writer: BufWriter<File>,
    last_hash: [u8; 32],
    next_seq: u64,
}

struct Replay {
    variants: Vec<Variant>,
    last_hash: [u8; 32],
    valid_len: u64,
    torn_tail: bool,
    unterminated: bool,
}

impl Journal {
    /// Open (or create) a journal, returning the variants already in it
    ///
    /// # Errors
    /// I/O failures, or `JournalError::Corrupt` if the existing content does
    /// not verify.
    pub fn open(path: impl AsRef<Path>) -> Result<(Self, Vec<Variant>), JournalError> {
        let path = path.as_ref().to_path_buf();
        let replay = if path.exists() {
            replay(&path)?
        } else {
            Replay {
                variants: Vec::new(),
                last_hash: [0u8; 32],
                valid_len: 0,
                torn_tail: false,
                unterminated: false,
            }
        };

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| JournalError::io(&path, e))?;

        if replay.torn_tail {
            tracing::warn!(path = %path.display(), "discarding torn journal tail");
            file.set_len(replay.valid_len)
                .map_err(|e| JournalError::io(&path, e))?;
        } else if replay.unterminated {
            tracing::warn!(path = %path.display(), "restoring newline after last journal entry");
            file.write_all(b"\n")
                .and_then(|()| file.sync_data())
                .map_err(|e| JournalError::io(&path, e))?;
        }

        let journal = Self {
            path,
            writer: BufWriter::new(file),
            last_hash: replay.last_hash,
            next_seq: replay.variants.len() as u64,
        };
        Ok((journal, replay.variants))
    }

    /// Append a committed variant and flush it to disk
    ///
    /// # Errors
    /// I/O or encoding failures; `Corrupt` if the variant id does not match
    /// the next sequence number.
    pub fn append(&mut self, variant: &Variant) -> Result<(), JournalError> {
        let line_no = self.line_number();
        if variant.id.get() != self.next_seq {
            return Err(JournalError::corrupt(
                line_no,
                format!("expected id {}, got {}", self.next_seq, variant.id),
            ));
        }

        let body = serde_json::to_vec(variant).map_err(|source| JournalError::Encoding {
            line: line_no,
            source,
        })?;
        let hash = compute_hash(self.next_seq, &body, &self.last_hash);

        let entry = JournalEntry {
            seq: self.next_seq,
            prev_hash: hex::encode(self.last_hash),
            hash: hex::encode(hash),
            variant: variant.clone(),
        };
        let line = serde_json::to_string(&entry).map_err(|source| JournalError::Encoding {
            line: line_no,
            source,
        })?;

        writeln!(self.writer, "{line}").map_err(|e| JournalError::io(&self.path, e))?;
        self.writer
            .flush()
            .map_err(|e| JournalError::io(&self.path, e))?;
        self.writer
            .get_ref()
            .sync_data()
            .map_err(|e| JournalError::io(&self.path, e))?;

        self.last_hash = hash;
        self.next_seq += 1;
        Ok(())
    }

    /// Journal file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries written so far
    #[inline]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.next_seq
    }

    /// Whether the journal has no entries
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.next_seq == 0
    }

    fn line_number(&self) -> usize {
        usize::try_from(self.next_seq).unwrap_or(usize::MAX).saturating_add(1)
    }
}

/// Read and verify a journal without opening it for writing
///
/// A torn final line is ignored.
///
/// # Errors
/// I/O failures or any verification failure.
pub fn read_journal(path: impl AsRef<Path>) -> Result<Vec<Variant>, JournalError> {
    let replay = replay(path.as_ref())?;
    if replay.torn_tail {
        tracing::warn!(path = %path.as_ref().display(), "journal has a torn tail");
    }
    Ok(replay.variants)
}

/// Outcome of [`verify_journal`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JournalCheck {
    /// Verified entries
    pub entries: usize,
    /// Whether an unterminated final line was skipped
    pub torn_tail: bool,
}

/// Check a journal's hash chain and lineage
///
/// # Errors
/// I/O failures or the first verification failure.
pub fn verify_journal(path: impl AsRef<Path>) -> Result<JournalCheck, JournalError> {
    let replay = replay(path.as_ref())?;
    Ok(JournalCheck {
        entries: replay.variants.len(),
        torn_tail: replay.torn_tail,
    })
}

fn replay(path: &Path) -> Result<Replay, JournalError> {
    let content = std::fs::read_to_string(path).map_err(|e| JournalError::io(path, e))?;

    let mut variants: Vec<Variant> = Vec::new();
    let mut last_hash = [0u8; 32];
    let mut valid_len = 0u64;
    let mut torn_tail = false;
    let mut unterminated = false;

    let mut offset = 0usize;
    for (idx, raw) in content.split_inclusive('\n').enumerate() {
        let line_no = idx + 1;
        offset += raw.len();
        let complete = raw.ends_with('\n');
        let line = raw.trim_end();
        if line.is_empty() {
            valid_len = offset as u64;
            continue;
        }

        let entry: JournalEntry = match serde_json::from_str(line) {
            Ok(entry) => entry,
            Err(_) if !complete => {
                torn_tail = true;
                break;
            }
            Err(source) => return Err(JournalError::Encoding { line: line_no, source }),
        };

        let expected_seq = variants.len() as u64;
        if entry.seq != expected_seq {
            return Err(JournalError::corrupt(
                line_no,
                format!("sequence {} where {expected_seq} was expected", entry.seq),
            ));
        }
        if entry.variant.id.get() != entry.seq {
            return Err(JournalError::corrupt(
                line_no,
                format!("variant {} stored at sequence {}", entry.variant.id, entry.seq),
            ));
        }
        if entry.prev_hash != hex::encode(last_hash) {
            return Err(JournalError::corrupt(line_no, "previous hash does not chain"));
        }

        let body = serde_json::to_vec(&entry.variant).map_err(|source| JournalError::Encoding {
            line: line_no,
            source,
        })?;
        let hash = compute_hash(entry.seq, &body, &last_hash);
        if entry.hash != hex::encode(hash) {
            return Err(JournalError::corrupt(line_no, "entry hash mismatch"));
        }

        match entry.variant.parent_id {
            None if entry.seq != 0 => {
                return Err(JournalError::corrupt(line_no, "second root variant"));
            }
            Some(parent) if parent.get() >= entry.seq => {
                return Err(JournalError::corrupt(
                    line_no,
                    format!("parent {parent} does not precede child"),
                ));
            }
            _ => {}
        }

        last_hash = hash;
        valid_len = offset as u64;
        unterminated = !complete;
        variants.push(entry.variant);
    }

    Ok(Replay {
        variants,
        last_hash,
        valid_len,
        torn_tail,
        unterminated,
    })
}

fn compute_hash(seq: u64, body: &[u8], prev_hash: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(seq.to_le_bytes());
    hasher.update(body);
    hasher.update([0]);
    hasher.update(prev_hash);
    hasher.finalize().into()
}
