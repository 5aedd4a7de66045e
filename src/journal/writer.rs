//! Journal Writer
//!
//! Handles appending entries to a journal file.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::JournalSyncStrategy;
use crate::error::Result;

use super::{JournalEntry, JournalReader};

/// Appends entries to a journal file
pub struct JournalWriter<T> {
    path: PathBuf,
    file: File,
    /// Length of the file up to the last complete entry
    file_len: u64,
    next_lsn: u64,
    entry_count: u64,
    unsynced: usize,
    sync_strategy: JournalSyncStrategy,
    _op: PhantomData<T>,
}

impl<T> JournalWriter<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open or create a journal file
    ///
    /// Existing entries are scanned to continue the LSN sequence. Run
    /// recovery first if the file may end in a torn write.
    pub fn open(path: &Path, sync_strategy: JournalSyncStrategy) -> Result<Self> {
        let mut last_lsn = 0;
        let mut entry_count = 0;
        let mut file_len = 0;

        if path.exists() {
            let mut reader = JournalReader::<T>::open(path)?;
            while let Some(entry) = reader.next_entry()? {
                last_lsn = entry.lsn;
                entry_count += 1;
            }
            file_len = reader.position();
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            file_len,
            next_lsn: last_lsn + 1,
            entry_count,
            unsynced: 0,
            sync_strategy,
            _op: PhantomData,
        })
    }

    /// Append an operation; returns its LSN
    ///
    /// A failed write is rolled back to the previous entry boundary so the
    /// journal never carries a torn entry in front of later ones.
    pub fn append(&mut self, op: T) -> Result<u64> {
        let lsn = self.next_lsn;
        let bytes = JournalEntry::new(lsn, op).serialize()?;

        if let Err(e) = self.file.write_all(&bytes) {
            let _ = self.file.set_len(self.file_len);
            return Err(e.into());
        }

        self.file_len += bytes.len() as u64;
        self.next_lsn += 1;
        self.entry_count += 1;
        self.unsynced += 1;

        let must_sync = match self.sync_strategy {
            JournalSyncStrategy::EveryWrite => true,
            JournalSyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if must_sync {
            self.sync()?;
        }

        Ok(lsn)
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Replace the journal's contents with `ops`, atomically
    ///
    /// The new file is written beside the old one and renamed over it. LSNs
    /// keep increasing across the rewrite.
    pub fn rewrite(&mut self, ops: Vec<T>) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut tmp = File::create(&tmp_path)?;

        let mut next_lsn = self.next_lsn;
        let mut file_len = 0u64;
        let count = ops.len() as u64;
        for op in ops {
            let bytes = JournalEntry::new(next_lsn, op).serialize()?;
            tmp.write_all(&bytes)?;
            file_len += bytes.len() as u64;
            next_lsn += 1;
        }
        tmp.sync_all()?;
        drop(tmp);

        fs::rename(&tmp_path, &self.path)?;
        self.file = OpenOptions::new().append(true).open(&self.path)?;
        self.file_len = file_len;
        self.next_lsn = next_lsn;
        self.entry_count = count;
        self.unsynced = 0;
        Ok(())
    }

    /// Drop every entry (LSNs keep increasing)
    pub fn truncate(&mut self) -> Result<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        self.file_len = 0;
        self.entry_count = 0;
        self.unsynced = 0;
        Ok(())
    }

    /// LSN the next append will receive
    pub fn current_lsn(&self) -> u64 {
        self.next_lsn
    }

    /// Number of entries currently in the file
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
