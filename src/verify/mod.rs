//! Verifier Module
//!
//! Re-validates a freshly built container before its bin may be marked
//! packed. Levels are cumulative:
//!
//! | Level      | Checks                                                        |
//! |------------|---------------------------------------------------------------|
//! | `off`      | nothing                                                       |
//! | `filelist` | container size, manifest CRC, member names/sizes/order, framing |
//! | `chksum`   | `filelist` + data CRC + every member's digest vs. enrollment  |

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::archive::{Archive, ArchiveReader};
use crate::error::{PackError, Result};
use crate::record::EnrolledFile;

/// Post-build integrity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationLevel {
    Off,
    Filelist,
    Chksum,
}

impl VerificationLevel {
    pub fn name(&self) -> &'static str {
        match self {
            VerificationLevel::Off => "off",
            VerificationLevel::Filelist => "filelist",
            VerificationLevel::Chksum => "chksum",
        }
    }
}

impl FromStr for VerificationLevel {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "off" => Ok(VerificationLevel::Off),
            "filelist" => Ok(VerificationLevel::Filelist),
            "chksum" => Ok(VerificationLevel::Chksum),
            other => Err(PackError::Config(format!(
                "unknown verification level '{}' (expected off, filelist or chksum)",
                other
            ))),
        }
    }
}

impl fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Checks a local container against what was enrolled
#[derive(Debug, Clone, Copy, Default)]
pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    /// Verify `archive` at `path` at `level`
    ///
    /// `expected` lists the enrolled members in container order.
    pub fn verify(
        &self,
        path: &Path,
        archive: &Archive,
        expected: &[EnrolledFile],
        level: VerificationLevel,
    ) -> Result<()> {
        if level == VerificationLevel::Off {
            return Ok(());
        }

        let fail = |reason: String| PackError::VerificationFailure {
            archive_id: archive.archive_id,
            reason,
        };

        let mut reader = ArchiveReader::open(path).map_err(|e| fail(e.to_string()))?;
        self.check_filelist(&mut reader, archive, expected)
            .map_err(|e| fail(e.to_string()))?;

        if level == VerificationLevel::Chksum {
            self.check_contents(&mut reader, expected)
                .map_err(|e| fail(e.to_string()))?;
        }

        tracing::debug!(
            "Archive {} passed {} verification ({} members)",
            archive.archive_id,
            level,
            expected.len()
        );
        Ok(())
    }

    fn check_filelist(
        &self,
        reader: &mut ArchiveReader,
        archive: &Archive,
        expected: &[EnrolledFile],
    ) -> Result<()> {
        if reader.file_size() != archive.size {
            return Err(PackError::Archive(format!(
                "container is {} bytes, expected {}",
                reader.file_size(),
                archive.size
            )));
        }

        let manifest = reader.manifest();
        if manifest.len() != expected.len() {
            return Err(PackError::Archive(format!(
                "manifest lists {} members, {} were enrolled",
                manifest.len(),
                expected.len()
            )));
        }

        for (position, (entry, file)) in manifest.iter().zip(expected).enumerate() {
            if entry.name != file.file_id() {
                return Err(PackError::Archive(format!(
                    "member {} is '{}', expected '{}'",
                    position,
                    entry.name,
                    file.file_id()
                )));
            }
            if entry.length != file.size {
                return Err(PackError::Archive(format!(
                    "member '{}' holds {} bytes, {} were enrolled",
                    entry.name, entry.length, file.size
                )));
            }
        }

        let manifest = manifest.to_vec();
        let mut frames = 0;
        for (position, frame) in reader.members()?.enumerate() {
            let frame = frame?;
            match manifest.get(position) {
                Some(entry)
                    if entry.name == frame.name
                        && entry.offset == frame.offset
                        && entry.length == frame.length => {}
                _ => {
                    return Err(PackError::Archive(format!(
                        "data block member {} ('{}' at {}) disagrees with the manifest",
                        position, frame.name, frame.offset
                    )))
                }
            }
            frames += 1;
        }

        if frames != manifest.len() {
            return Err(PackError::Archive(format!(
                "data block holds {} members, manifest {}",
                frames,
                manifest.len()
            )));
        }

        Ok(())
    }

    fn check_contents(&self, reader: &mut ArchiveReader, expected: &[EnrolledFile]) -> Result<()> {
        reader.check_data_crc()?;

        for file in expected {
            let data = reader.read_member(file.file_id())?;
            let digest = file.checksum.algorithm.digest(&data);
            if digest != file.checksum {
                return Err(PackError::Archive(format!(
                    "member '{}' digest {} differs from enrollment {}",
                    file.file_id(),
                    digest,
                    file.checksum
                )));
            }
        }
        Ok(())
    }
}
