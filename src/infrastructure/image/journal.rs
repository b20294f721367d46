//! Append-only journal backing the disk cache index.
//!
//! Layout:
//!
//! ```text
//! imgtier-journal
//! 1
//!
//! CLEAN 3f2a... 10240 0
//! READ 3f2a... 1
//! REMOVE 3f2a...
//! ```
//!
//! `CLEAN` commits an entry with its size, `READ` records an access and
//! `REMOVE` drops an entry. Sequence numbers give the access order used to
//! rebuild the LRU on open.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::domain::entities::CacheKey;

/// Journal file name inside the cache directory.
pub const JOURNAL_FILE: &str = "journal";
/// Staging name used while rewriting the journal.
pub const JOURNAL_TMP_FILE: &str = "journal.tmp";

const MAGIC: &str = "imgtier-journal";
const VERSION: &str = "1";

/// Errors reading a journal.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    /// The header does not match this journal format.
    #[error("unexpected journal header: {0:?}")]
    BadHeader(String),
}

/// One journal line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JournalRecord {
    /// Entry committed with its size in bytes.
    Clean {
        /// Entry key.
        key: CacheKey,
        /// Stored size in bytes.
        size: u64,
        /// Access sequence number.
        seq: u64,
    },
    /// Entry read.
    Read {
        /// Entry key.
        key: CacheKey,
        /// Access sequence number.
        seq: u64,
    },
    /// Entry removed.
    Remove {
        /// Entry key.
        key: CacheKey,
    },
}

impl JournalRecord {
    /// Formats the record as a newline-terminated journal line.
    #[must_use]
    pub fn to_line(&self) -> String {
        match self {
            Self::Clean { key, size, seq } => format!("CLEAN {key} {size} {seq}\n"),
            Self::Read { key, seq } => format!("READ {key} {seq}\n"),
            Self::Remove { key } => format!("REMOVE {key}\n"),
        }
    }

    /// Parses a single journal line without its terminator.
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(' ');
        let op = parts.next()?;
        let key = CacheKey::parse(parts.next()?)?;
        let record = match op {
            "CLEAN" => Self::Clean {
                key,
                size: parts.next()?.parse().ok()?,
                seq: parts.next()?.parse().ok()?,
            },
            "READ" => Self::Read {
                key,
                seq: parts.next()?.parse().ok()?,
            },
            "REMOVE" => Self::Remove { key },
            _ => return None,
        };
        if parts.next().is_some() {
            return None;
        }
        Some(record)
    }
}

/// An entry that survived replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayedEntry {
    /// Entry key.
    pub key: CacheKey,
    /// Stored size in bytes.
    pub size: u64,
    /// Last access sequence number.
    pub seq: u64,
}

/// State rebuilt from a journal.
#[derive(Debug, Default)]
pub struct Replay {
    /// Live entries, least recently used first.
    pub entries: Vec<ReplayedEntry>,
    /// Lines that could not be parsed.
    pub malformed: usize,
}

/// Rebuilds the entry index from journal contents.
///
/// A trailing line without a newline is treated as a torn write and ignored.
///
/// # Errors
/// Returns [`JournalError::BadHeader`] if the contents are not a journal of
/// this version.
pub fn replay(contents: &str) -> Result<Replay, JournalError> {
    let mut lines: Vec<&str> = contents.split('\n').collect();
    // The element after the final '\n' is empty; anything else there is torn.
    let torn = lines.pop().is_some_and(|last| !last.is_empty());

    let header: Vec<&str> = lines.iter().take(3).copied().collect();
    if header != [MAGIC, VERSION, ""] {
        return Err(JournalError::BadHeader(header.join("|")));
    }

    let mut live: HashMap<CacheKey, (u64, u64)> = HashMap::new();
    let mut replay = Replay {
        malformed: usize::from(torn),
        ..Replay::default()
    };

    for line in lines.iter().skip(3) {
        let Some(record) = JournalRecord::parse(line) else {
            replay.malformed += 1;
            continue;
        };
        match record {
            JournalRecord::Clean { key, size, seq } => {
                live.insert(key, (size, seq));
            }
            JournalRecord::Read { key, seq } => {
                if let Some(entry) = live.get_mut(&key) {
                    entry.1 = seq;
                }
            }
            JournalRecord::Remove { key } => {
                live.remove(&key);
            }
        }
    }

    replay.entries = live
        .into_iter()
        .map(|(key, (size, seq))| ReplayedEntry { key, size, seq })
        .collect();
    replay.entries.sort_by_key(|entry| entry.seq);
    Ok(replay)
}

/// Open handle for appending journal records.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: fs::File,
}

impl Journal {
    /// Atomically replaces the journal in `dir` with one `CLEAN` record per
    /// entry, numbered from zero in the given order, and opens it for appending.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the journal cannot be written.
    pub async fn rewrite(dir: &Path, entries: &[(CacheKey, u64)]) -> std::io::Result<Self> {
        let mut contents = format!("{MAGIC}\n{VERSION}\n\n");
        for (seq, (key, size)) in (0u64..).zip(entries) {
            let record = JournalRecord::Clean {
                key: key.clone(),
                size: *size,
                seq,
            };
            contents.push_str(&record.to_line());
        }

        let tmp_path = dir.join(JOURNAL_TMP_FILE);
        let mut tmp = fs::File::create(&tmp_path).await?;
        tmp.write_all(contents.as_bytes()).await?;
        tmp.flush().await?;
        tmp.sync_all().await?;
        drop(tmp);

        let path = dir.join(JOURNAL_FILE);
        fs::rename(&tmp_path, &path).await?;

        let file = fs::OpenOptions::new().append(true).open(&path).await?;
        Ok(Self { path, file })
    }

    /// Appends one record.
    ///
    /// # Errors
    /// Returns the underlying I/O error if the write fails.
    pub async fn append(&mut self, record: &JournalRecord) -> std::io::Result<()> {
        self.file.write_all(record.to_line().as_bytes()).await?;
        self.file.flush().await
    }

    /// Flushes appended records to durable storage.
    ///
    /// # Errors
    /// Returns the underlying I/O error if syncing fails.
    pub async fn sync(&mut self) -> std::io::Result<()> {
        self.file.flush().await?;
        self.file.sync_data().await
    }

    /// Path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}
