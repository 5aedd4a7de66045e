//! Un-pack / Retrieval Engine Module
//!
//! Serves one member of a packed archive: bookkeeping lookup, storage
//! manager restore, one seek, one bounded read. Unrelated members are never
//! read.

use std::sync::Arc;

use bytes::Bytes;

use crate::archive::ArchiveReader;
use crate::bookkeeping::{BookkeepingStore, FileLocation};
use crate::error::{PackError, Result};
use crate::hsm::StorageManager;

/// Extracts single members from packed archives
pub struct RetrievalEngine {
    bookkeeping: Arc<dyn BookkeepingStore>,
    hsm: Arc<dyn StorageManager>,
}

impl RetrievalEngine {
    pub fn new(bookkeeping: Arc<dyn BookkeepingStore>, hsm: Arc<dyn StorageManager>) -> Self {
        Self { bookkeeping, hsm }
    }

    /// Bytes of `member` in archive `archive_id`
    ///
    /// With `verify`, the bytes are checked against the enrollment checksum
    /// (or the manifest checksum when bookkeeping no longer maps the file).
    pub fn retrieve(&self, archive_id: u64, member: &str, verify: bool) -> Result<Bytes> {
        let record = self
            .bookkeeping
            .archive(archive_id)?
            .ok_or_else(|| PackError::NotFound(format!("archive {}", archive_id)))?;

        let entry = record.archive.member(member).ok_or_else(|| {
            PackError::NotFound(format!("member '{}' in archive {}", member, archive_id))
        })?;

        let path = self.hsm.restore(&record.handle)?;
        let mut reader = ArchiveReader::open(&path)?;
        let data = reader.read_member(member)?;

        if data.len() as u64 != entry.length {
            return Err(PackError::VerificationFailure {
                archive_id,
                reason: format!(
                    "member '{}' read {} bytes, manifest says {}",
                    member,
                    data.len(),
                    entry.length
                ),
            });
        }

        if verify {
            let expected = match self.bookkeeping.locate(member)? {
                Some(location) if location.archive_id == archive_id => location.checksum,
                _ => entry.checksum.clone(),
            };
            let actual = expected.algorithm.digest(&data);
            if actual != expected {
                tracing::error!(
                    "Member '{}' of archive {} is corrupt: {} != {}",
                    member,
                    archive_id,
                    actual,
                    expected
                );
                return Err(PackError::VerificationFailure {
                    archive_id,
                    reason: format!("member '{}' digest {} != {}", member, actual, expected),
                });
            }
        }

        tracing::debug!(
            "Retrieved '{}' from archive {} ({} bytes)",
            member,
            archive_id,
            data.len()
        );
        Ok(Bytes::from(data))
    }

    /// Look a file up in bookkeeping and retrieve it
    pub fn retrieve_file(&self, file_id: &str, verify: bool) -> Result<(FileLocation, Bytes)> {
        let location = self
            .bookkeeping
            .locate(file_id)?
            .ok_or_else(|| PackError::NotFound(format!("file {}", file_id)))?;
        let data = self.retrieve(location.archive_id, file_id, verify)?;
        Ok((location, data))
    }
}
