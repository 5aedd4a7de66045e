//! Archive Module
//!
//! Immutable containers holding many small files plus a manifest.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (8 bytes)                                        │
//! │   Magic: "SFPK" (4) | Version: u16 (2) | Reserved (2)   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data Block (variable)                                   │
//! │   [NameLen: u32][DataLen: u64][Name][Data]              │
//! │   ... repeated for each member ...                      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Manifest Block (variable)                               │
//! │   bincode Vec<ManifestEntry>                            │
//! ├─────────────────────────────────────────────────────────┤
//! │ Footer (24 bytes)                                       │
//! │   ManifestOffset: u64 | MemberCount: u64 |              │
//! │   ManifestCRC: u32    | DataCRC: u32                    │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A manifest entry's `offset` points at the member's data bytes, so a
//! single member is served with one seek and one bounded read.

mod builder;
mod reader;
mod writer;

use serde::{Deserialize, Serialize};

pub use builder::{ArchiveBuilder, BuiltArchive, LostMember};
pub use reader::{ArchiveReader, MemberFrame, MemberIterator};
pub use writer::{ArchiveWriter, ContainerSink, FileSink, FileSinkFactory, SinkFactory};

use crate::checksum::Checksum;
use crate::verify::VerificationLevel;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying a smallpack container
pub(crate) const MAGIC: &[u8; 4] = b"SFPK";

/// Current container format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) + Reserved (2) = 8 bytes
pub(crate) const HEADER_SIZE: u64 = 8;

/// Footer size: ManifestOffset (8) + MemberCount (8) + ManifestCRC (4) + DataCRC (4)
pub(crate) const FOOTER_SIZE: u64 = 24;

/// Per-member framing: NameLen (4) + DataLen (8)
pub(crate) const MEMBER_HEADER_SIZE: u64 = 12;

// =============================================================================
// Archive Metadata
// =============================================================================

/// Location and digest of one member inside a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Member name (the file id)
    pub name: String,

    /// Absolute offset of the member's data bytes
    pub offset: u64,

    /// Data length in bytes
    pub length: u64,

    pub checksum: Checksum,
}

/// A built container, as recorded by the Bookkeeping Store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Archive {
    pub archive_id: u64,

    /// `{archive_path}/archive_{id:012}.sfa`
    pub name: String,

    /// Container size in bytes
    pub size: u64,

    pub manifest: Vec<ManifestEntry>,

    /// Level the container actually passed
    pub verification: VerificationLevel,
}

impl Archive {
    /// Deterministic container name for an archive id
    pub fn container_name(archive_path: &str, archive_id: u64) -> String {
        if archive_path.is_empty() {
            format!("archive_{:012}.sfa", archive_id)
        } else {
            format!("{}/archive_{:012}.sfa", archive_path, archive_id)
        }
    }

    pub fn member(&self, name: &str) -> Option<&ManifestEntry> {
        self.manifest.iter().find(|entry| entry.name == name)
    }

    /// Sum of member lengths
    pub fn payload_size(&self) -> u64 {
        self.manifest.iter().map(|entry| entry.length).sum()
    }
}
