//! Generic N-file versioned ring store (§4.6): "load latest valid, save
//! to next slot" durability for any `Serialize + DeserializeOwned`
//! object carrying a `version_sequence_number`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Implemented by objects the ring store can persist: must expose the
/// monotonically increasing sequence number the ring uses to find the
/// most recent slot.
pub trait Versioned {
    /// `0` means "never saved".
    fn version_sequence_number(&self) -> u64;

    /// Called by `save()` just before serializing, to stamp in the
    /// sequence number the ring assigned.
    fn set_version_sequence_number(&mut self, sequence: u64);
}

/// One non-fatal problem observed while loading or saving.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// A slot could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// The slot file involved.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A slot's contents did not deserialize.
    #[error("failed to deserialize {path}: {source}")]
    Deserialize {
        /// The slot file involved.
        path: PathBuf,
        /// Underlying deserialization error.
        #[source]
        source: serde_json::Error,
    },
    /// A value failed to serialize before being written to a slot.
    #[error("failed to serialize value for {path}: {source}")]
    Serialize {
        /// The slot file involved.
        path: PathBuf,
        /// Underlying serialization error.
        #[source]
        source: serde_json::Error,
    },
    /// Two slots reported the same non-zero sequence number.
    #[error("duplicate sequence number in {path}")]
    DuplicateSequence {
        /// The slot file involved.
        path: PathBuf,
    },
    /// A slot deserialized but carried sequence number zero.
    #[error("slot {path} carries sequence number zero")]
    ZeroSequence {
        /// The slot file involved.
        path: PathBuf,
    },
    /// No slot held anything usable.
    #[error("no valid file found in the ring")]
    NoValidFile,
    /// `auto_create_path` found the parent path occupied by a non-directory.
    #[error("ring directory {path} exists and is not a directory")]
    NotADirectory {
        /// The offending path.
        path: PathBuf,
    },
}

/// The result of a `load()`: the most recent valid object, if any, plus
/// every non-fatal problem observed along the way.
#[derive(Debug)]
pub struct LoadResult<T> {
    /// The highest-sequence successfully deserialized object, if any slot had one.
    pub value: Option<T>,
    /// Non-fatal issues collected while scanning every slot.
    pub errors: Vec<PersistError>,
}

/// A ring of `alphabet.len()` files named `<base><c>.<ext>`.
pub struct RingStore {
    directory: PathBuf,
    base: String,
    ext: String,
    alphabet: Vec<char>,
    auto_create_path: bool,
    last_slot: Option<usize>,
    last_sequence: u64,
}

/// Derive a ring alphabet of `file_count` letters starting at `'A'`,
/// for callers (like `mb-daemon`) that configure the ring by a plain
/// file count instead of spelling out the alphabet.
///
/// # Panics
///
/// Panics if `file_count` is zero or exceeds 26.
#[must_use]
pub fn default_alphabet(file_count: usize) -> String {
    assert!((1..=26).contains(&file_count), "file_count must be 1..=26");
    (0..file_count).map(|i| (b'A' + i as u8) as char).collect()
}

impl RingStore {
    /// Build a ring store. `alphabet` supplies one character per slot,
    /// in round-robin order (typically `"AB"` through `"ABCDE"`).
    ///
    /// # Panics
    ///
    /// Panics if `alphabet` is empty.
    #[must_use]
    pub fn new(
        directory: impl Into<PathBuf>,
        base: impl Into<String>,
        ext: impl Into<String>,
        alphabet: &str,
        auto_create_path: bool,
    ) -> Self {
        let alphabet: Vec<char> = alphabet.chars().collect();
        assert!(!alphabet.is_empty(), "ring alphabet must not be empty");
        Self {
            directory: directory.into(),
            base: base.into(),
            ext: ext.into(),
            alphabet,
            auto_create_path,
            last_slot: None,
            last_sequence: 0,
        }
    }

    fn slot_path(&self, slot: usize) -> PathBuf {
        self.directory
            .join(format!("{}{}.{}", self.base, self.alphabet[slot], self.ext))
    }

    fn ensure_directory(&self) -> Result<(), PersistError> {
        if self.directory.exists() {
            if !self.directory.is_dir() {
                return Err(PersistError::NotADirectory {
                    path: self.directory.clone(),
                });
            }
            return Ok(());
        }
        if !self.auto_create_path {
            return Ok(());
        }
        fs::create_dir_all(&self.directory).map_err(|source| PersistError::Io {
            path: self.directory.clone(),
            source,
        })
    }

    /// Read every slot, returning the one with the highest sequence
    /// number. A slot that fails to deserialize, duplicates another
    /// slot's sequence number, or carries sequence zero is logged as a
    /// [`PersistError`] but never prevents returning an older valid slot.
    pub fn load<T>(&mut self) -> LoadResult<T>
    where
        T: DeserializeOwned,
    {
        let mut errors = Vec::new();
        if let Err(e) = self.ensure_directory() {
            errors.push(e);
            return LoadResult { value: None, errors };
        }

        let mut best: Option<(usize, u64, T)> = None;
        let mut seen_sequences: Vec<(u64, PathBuf)> = Vec::new();

        for slot in 0..self.alphabet.len() {
            let path = self.slot_path(slot);
            if !path.exists() {
                continue;
            }
            let bytes = match fs::read(&path) {
                Ok(b) => b,
                Err(source) => {
                    warn!(path = %path.display(), %source, "ring slot unreadable");
                    errors.push(PersistError::Io { path, source });
                    continue;
                }
            };
            let candidate: SequencedEnvelope<T> = match serde_json::from_slice(&bytes) {
                Ok(v) => v,
                Err(source) => {
                    warn!(path = %path.display(), %source, "ring slot failed to deserialize");
                    errors.push(PersistError::Deserialize { path, source });
                    continue;
                }
            };

            let sequence = candidate.sequence;
            if sequence == 0 {
                errors.push(PersistError::ZeroSequence { path: path.clone() });
            } else if seen_sequences.iter().any(|(s, _)| *s == sequence) {
                errors.push(PersistError::DuplicateSequence { path: path.clone() });
            }
            seen_sequences.push((sequence, path.clone()));

            let better = match &best {
                Some((_, best_seq, _)) => sequence > *best_seq,
                None => true,
            };
            if better {
                best = Some((slot, sequence, candidate.value));
            }
        }

        match best {
            Some((slot, sequence, value)) => {
                self.last_slot = Some(slot);
                self.last_sequence = sequence;
                debug!(slot, sequence, "ring load selected slot");
                LoadResult {
                    value: Some(value),
                    errors,
                }
            }
            None => {
                if errors.is_empty() {
                    debug!("ring is empty, nothing to load");
                } else {
                    errors.push(PersistError::NoValidFile);
                }
                LoadResult { value: None, errors }
            }
        }
    }

    /// Serialize `value` into the next slot (round-robin from the slot
    /// just loaded or last written), stamping in the next sequence
    /// number. Writes to the final path via create-and-close so a
    /// reader never observes a truncated file.
    ///
    /// # Errors
    ///
    /// Returns the first [`PersistError`] encountered.
    pub fn save<T>(&mut self, value: &mut T) -> Result<(), PersistError>
    where
        T: Serialize + Versioned,
    {
        self.ensure_directory()?;

        let next_slot = match self.last_slot {
            Some(slot) => (slot + 1) % self.alphabet.len(),
            None => 0,
        };
        let next_sequence = self.last_sequence + 1;
        value.set_version_sequence_number(next_sequence);

        let envelope = SequencedEnvelope {
            sequence: next_sequence,
            value: &*value,
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|source| PersistError::Serialize {
            path: self.slot_path(next_slot),
            source,
        })?;

        let path = self.slot_path(next_slot);
        write_atomically(&path, &bytes)?;

        self.last_slot = Some(next_slot);
        self.last_sequence = next_sequence;
        debug!(slot = next_slot, sequence = next_sequence, "ring save wrote slot");
        Ok(())
    }
}

/// On-disk envelope: the sequence number lives alongside the value so
/// `load()` can compare slots without fully trusting the user's own
/// `version_sequence_number` field (which might be absent from the JSON
/// representation the caller chose).
#[derive(serde::Serialize, serde::Deserialize)]
struct SequencedEnvelope<T> {
    sequence: u64,
    value: T,
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("tmp")
    ));
    let mut file = fs::File::create(&tmp_path).map_err(|source| PersistError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    file.write_all(bytes).map_err(|source| PersistError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    file.sync_all().map_err(|source| PersistError::Io {
        path: tmp_path.clone(),
        source,
    })?;
    drop(file);
    fs::rename(&tmp_path, path).map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })
}
