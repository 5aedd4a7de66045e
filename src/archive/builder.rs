//! Archive Builder
//!
//! Materializes a flushing bin into one container under the working
//! directory. Each member is re-read from the namespace right before it is
//! appended and checked against its enrollment size and checksum; members
//! that changed or vanished are dropped from this archive and handed back to
//! the caller for requeueing.
//!
//! A write fault discards the whole container. The next attempt starts over
//! with the members that are still valid.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{PackError, Result};
use crate::namespace::SourceNamespace;
use crate::record::EnrolledFile;
use crate::verify::VerificationLevel;

use super::{Archive, ArchiveWriter, ManifestEntry, SinkFactory};

/// A member excluded from the archive being built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LostMember {
    pub file: EnrolledFile,
    pub reason: String,
}

/// Result of a build
#[derive(Debug, Clone)]
pub struct BuiltArchive {
    /// `None` when no member survived; no container exists then
    pub archive: Option<Archive>,

    /// Local container path
    pub path: PathBuf,

    /// Members written, in container order
    pub included: Vec<EnrolledFile>,

    pub lost: Vec<LostMember>,
}

/// Builds containers from bin membership
pub struct ArchiveBuilder {
    container_dir: PathBuf,
    namespace: Arc<dyn SourceNamespace>,
    sinks: Arc<dyn SinkFactory>,
    algorithm: ChecksumAlgorithm,
    attempts: u32,
}

impl ArchiveBuilder {
    pub fn new(
        container_dir: impl Into<PathBuf>,
        namespace: Arc<dyn SourceNamespace>,
        sinks: Arc<dyn SinkFactory>,
        algorithm: ChecksumAlgorithm,
        attempts: u32,
    ) -> Self {
        Self {
            container_dir: container_dir.into(),
            namespace,
            sinks,
            algorithm,
            attempts: attempts.max(1),
        }
    }

    pub fn container_dir(&self) -> &Path {
        &self.container_dir
    }

    /// Build archive `archive_id` for `bin_id` from `members`
    ///
    /// Returns `PackError::BuildFailure` once every attempt hit a write
    /// fault; the partial container is gone by then.
    pub fn build(
        &self,
        bin_id: u64,
        archive_id: u64,
        archive_path: &str,
        members: &[EnrolledFile],
    ) -> Result<BuiltArchive> {
        let name = Archive::container_name(archive_path, archive_id);
        let path = self.container_dir.join(&name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut pending = members.to_vec();
        let mut lost = Vec::new();
        let mut last_error = String::new();

        for attempt in 1..=self.attempts {
            match self.write_container(&path, &mut pending, &mut lost) {
                Ok(Some((manifest, size))) => {
                    tracing::info!(
                        "Built {} for bin {}: {} members, {} bytes, {} lost",
                        name,
                        bin_id,
                        manifest.len(),
                        size,
                        lost.len()
                    );
                    return Ok(BuiltArchive {
                        archive: Some(Archive {
                            archive_id,
                            name,
                            size,
                            manifest,
                            verification: VerificationLevel::Off,
                        }),
                        path,
                        included: pending,
                        lost,
                    });
                }
                Ok(None) => {
                    discard(&path);
                    tracing::warn!("Bin {} lost every member; no archive built", bin_id);
                    return Ok(BuiltArchive {
                        archive: None,
                        path,
                        included: Vec::new(),
                        lost,
                    });
                }
                Err(e) => {
                    discard(&path);
                    tracing::warn!(
                        "Writing {} failed (attempt {}/{}): {}",
                        name,
                        attempt,
                        self.attempts,
                        e
                    );
                    last_error = e.to_string();
                }
            }
        }

        tracing::error!("Build of bin {} abandoned: {}", bin_id, last_error);
        Err(PackError::BuildFailure {
            bin_id,
            reason: last_error,
        })
    }

    /// One pass over `pending`; lost members move from `pending` to `lost`
    fn write_container(
        &self,
        path: &Path,
        pending: &mut Vec<EnrolledFile>,
        lost: &mut Vec<LostMember>,
    ) -> Result<Option<(Vec<ManifestEntry>, u64)>> {
        let sink = self.sinks.create(path)?;
        let mut writer = ArchiveWriter::new(sink, self.algorithm)?;

        let mut i = 0;
        while i < pending.len() {
            match self.fetch(&pending[i]) {
                Ok(data) => {
                    writer.add_member(pending[i].file_id(), &data)?;
                    i += 1;
                }
                Err(e) => {
                    let file = pending.remove(i);
                    tracing::warn!("Dropping {} from {}: {}", file.file_id(), path.display(), e);
                    lost.push(LostMember {
                        file,
                        reason: e.to_string(),
                    });
                }
            }
        }

        if writer.member_count() == 0 {
            return Ok(None);
        }
        writer.finish().map(Some)
    }

    /// Re-read a member and check it against its enrollment facts
    fn fetch(&self, file: &EnrolledFile) -> Result<Bytes> {
        let lost = |reason: String| PackError::MemberLost {
            file_id: file.file_id().to_string(),
            reason,
        };

        let data = self
            .namespace
            .read(&file.record)
            .map_err(|e| lost(e.to_string()))?;

        if data.len() as u64 != file.size {
            return Err(lost(format!(
                "size changed from {} to {} bytes",
                file.size,
                data.len()
            )));
        }

        let checksum = file.checksum.algorithm.digest(&data);
        if checksum != file.checksum {
            return Err(lost(format!(
                "content changed ({} != {})",
                checksum, file.checksum
            )));
        }

        Ok(data)
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not discard {}: {}", path.display(), e);
        }
    }
}
