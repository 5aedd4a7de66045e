//! Journal Recovery
//!
//! Handles crash recovery by replaying the journal.

use std::fs::OpenOptions;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PackError, Result};

use super::{JournalEntry, JournalReader};

/// Handles journal recovery after a crash
pub struct JournalRecovery;

/// Result of a recovery operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Number of corrupted entries skipped
    pub entries_corrupted: u64,

    /// Last valid LSN
    pub last_lsn: u64,

    /// Whether the journal was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl JournalRecovery {
    /// Recover entries from a journal file
    ///
    /// This will:
    /// 1. Read all valid entries
    /// 2. Stop at the first corrupted or torn entry
    /// 3. Truncate the file after the last valid entry
    /// 4. Return all valid entries in order
    pub fn recover<T>(path: &Path) -> Result<(Vec<JournalEntry<T>>, RecoveryResult)>
    where
        T: Serialize + DeserializeOwned,
    {
        let (entries, result, valid_len) = Self::scan(path)?;

        if result.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            tracing::warn!(
                "Journal {} truncated to {} bytes after LSN {} ({} corrupted entries)",
                path.display(),
                valid_len,
                result.last_lsn,
                result.entries_corrupted
            );
        }

        Ok((entries, result))
    }

    /// Verify integrity of a journal file without modifying it
    pub fn verify<T>(path: &Path) -> Result<RecoveryResult>
    where
        T: Serialize + DeserializeOwned,
    {
        let (_, result, _) = Self::scan::<T>(path)?;
        Ok(result)
    }

    fn scan<T>(path: &Path) -> Result<(Vec<JournalEntry<T>>, RecoveryResult, u64)>
    where
        T: Serialize + DeserializeOwned,
    {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = JournalReader::<T>::open(path)?;
        let mut entries = Vec::new();
        let mut corrupted = 0;

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break,
                Err(PackError::JournalCorruption(msg)) => {
                    tracing::warn!("Journal {}: {}", path.display(), msg);
                    corrupted += 1;
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let valid_len = reader.position();
        let result = RecoveryResult {
            entries_recovered: entries.len() as u64,
            entries_corrupted: corrupted,
            last_lsn: entries.last().map(|e| e.lsn).unwrap_or(0),
            was_truncated: valid_len < file_len,
        };

        Ok((entries, result, valid_len))
    }
}
