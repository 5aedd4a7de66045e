//! Bookkeeping Store Module
//!
//! Persists file → archive → byte range, archive → manifest, and hands out
//! archive identifiers. A file counts as migrated only once it is recorded
//! here.
//!
//! [`JournalBookkeeping`] keeps the whole mapping in memory and journals
//! every change to `{bookkeeping_dir}/bookkeeping.journal`.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::archive::Archive;
use crate::checksum::Checksum;
use crate::config::JournalSyncStrategy;
use crate::error::{PackError, Result};
use crate::hsm::StorageHandle;
use crate::journal::{JournalRecovery, JournalWriter};
use crate::record::{EnrolledFile, FileRecord};
use crate::retry::RetryPolicy;

/// A packed archive as bookkeeping knows it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub archive: Archive,

    /// Where the storage manager keeps the container
    pub handle: StorageHandle,

    /// Bin definition the archive was built for
    pub definition: String,

    /// Commit time (unix millis)
    pub packed_at: u64,
}

/// Where one packed file lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    pub record: FileRecord,
    pub archive_id: u64,
    pub offset: u64,
    pub length: u64,
    /// Checksum taken at enrollment
    pub checksum: Checksum,
}

/// Durable file-to-archive mapping
pub trait BookkeepingStore: Send + Sync {
    /// Next archive id; never returned twice
    fn allocate_archive_id(&self) -> Result<u64>;

    /// Record a verified, committed archive and the files it holds
    fn record_archive(&self, record: ArchiveRecord, members: &[EnrolledFile]) -> Result<()>;

    fn archive(&self, archive_id: u64) -> Result<Option<ArchiveRecord>>;

    fn locate(&self, file_id: &str) -> Result<Option<FileLocation>>;

    /// Forget one file's mapping; `false` if it was unknown
    fn forget_file(&self, file_id: &str) -> Result<bool>;

    /// Make every recorded change durable
    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum BookkeepingOp {
    ArchiveIdAllocated { archive_id: u64 },
    ArchiveRecorded { record: ArchiveRecord, files: Vec<FileLocation> },
    FileForgotten { file_id: String },
}

#[derive(Default)]
struct Mapping {
    next_archive_id: u64,
    archives: BTreeMap<u64, ArchiveRecord>,
    files: HashMap<String, FileLocation>,
}

impl Mapping {
    fn apply(&mut self, op: &BookkeepingOp) {
        match op {
            BookkeepingOp::ArchiveIdAllocated { archive_id } => {
                self.next_archive_id = self.next_archive_id.max(archive_id + 1);
            }
            BookkeepingOp::ArchiveRecorded { record, files } => {
                self.next_archive_id = self.next_archive_id.max(record.archive.archive_id + 1);
                self.archives.insert(record.archive.archive_id, record.clone());
                for location in files {
                    self.files
                        .insert(location.record.file_id.clone(), location.clone());
                }
            }
            BookkeepingOp::FileForgotten { file_id } => {
                self.files.remove(file_id);
            }
        }
    }
}

struct Inner {
    journal: JournalWriter<BookkeepingOp>,
    mapping: Mapping,
}

/// Journal-backed Bookkeeping Store
pub struct JournalBookkeeping {
    inner: Mutex<Inner>,
    retry: RetryPolicy,
}

impl JournalBookkeeping {
    pub fn open(dir: &Path, sync_strategy: JournalSyncStrategy, retry: RetryPolicy) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join("bookkeeping.journal");

        let mut mapping = Mapping {
            next_archive_id: 1,
            ..Default::default()
        };
        if path.exists() {
            let (entries, result) = JournalRecovery::recover::<BookkeepingOp>(&path)?;
            for entry in &entries {
                mapping.apply(&entry.op);
            }
            tracing::info!(
                "Bookkeeping recovered: {} archives, {} files, next archive id {} ({} entries)",
                mapping.archives.len(),
                mapping.files.len(),
                mapping.next_archive_id,
                result.entries_recovered
            );
        }

        let journal = JournalWriter::open(&path, sync_strategy)?;
        Ok(Self {
            inner: Mutex::new(Inner { journal, mapping }),
            retry,
        })
    }

    pub fn archive_count(&self) -> usize {
        self.inner.lock().mapping.archives.len()
    }

    fn commit(&self, inner: &mut Inner, op: BookkeepingOp) -> Result<()> {
        let journal = &mut inner.journal;
        self.retry.run("bookkeeping append", || journal.append(op.clone()))?;
        inner.mapping.apply(&op);
        Ok(())
    }
}

impl BookkeepingStore for JournalBookkeeping {
    fn allocate_archive_id(&self) -> Result<u64> {
        let mut inner = self.inner.lock();
        let archive_id = inner.mapping.next_archive_id;
        self.commit(&mut inner, BookkeepingOp::ArchiveIdAllocated { archive_id })?;
        Ok(archive_id)
    }

    fn record_archive(&self, record: ArchiveRecord, members: &[EnrolledFile]) -> Result<()> {
        let mut files = Vec::with_capacity(members.len());
        for file in members {
            let entry = record.archive.member(file.file_id()).ok_or_else(|| {
                PackError::NotFound(format!(
                    "{} is not in archive {}",
                    file.file_id(),
                    record.archive.archive_id
                ))
            })?;
            files.push(FileLocation {
                record: file.record.clone(),
                archive_id: record.archive.archive_id,
                offset: entry.offset,
                length: entry.length,
                checksum: file.checksum.clone(),
            });
        }

        let mut inner = self.inner.lock();
        if inner.mapping.archives.contains_key(&record.archive.archive_id) {
            return Err(PackError::Archive(format!(
                "archive {} is already recorded",
                record.archive.archive_id
            )));
        }
        self.commit(&mut inner, BookkeepingOp::ArchiveRecorded { record, files })
    }

    fn archive(&self, archive_id: u64) -> Result<Option<ArchiveRecord>> {
        Ok(self.inner.lock().mapping.archives.get(&archive_id).cloned())
    }

    fn locate(&self, file_id: &str) -> Result<Option<FileLocation>> {
        Ok(self.inner.lock().mapping.files.get(file_id).cloned())
    }

    fn forget_file(&self, file_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.mapping.files.contains_key(file_id) {
            return Ok(false);
        }
        self.commit(
            &mut inner,
            BookkeepingOp::FileForgotten {
                file_id: file_id.to_string(),
            },
        )?;
        Ok(true)
    }

    fn sync(&self) -> Result<()> {
        self.inner.lock().journal.sync()
    }
}
