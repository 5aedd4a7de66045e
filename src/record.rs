//! File records
//!
//! What the host tells us about a small file, and what we remember about it
//! once it has been enrolled into a bin.

use serde::{Deserialize, Serialize};

use crate::checksum::Checksum;
use crate::error::{PackError, Result};

/// A small file as observed in the namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRecord {
    /// Namespace-unique identifier; also the member name inside an archive
    pub file_id: String,

    /// Full namespace path, e.g. `/data/exp1/run7/evt_0001.dat`
    pub path: String,

    /// Storage group tag, if the namespace assigns one
    pub storage_group: Option<String>,

    /// Storage class tag, if the namespace assigns one
    pub storage_class: Option<String>,
}

impl FileRecord {
    pub fn new(file_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            file_id: file_id.into(),
            path: path.into(),
            storage_group: None,
            storage_class: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.storage_group = Some(group.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.storage_class = Some(class.into());
        self
    }

    /// Final path component
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Directory part of the path (without trailing separator)
    pub fn parent(&self) -> &str {
        match self.path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.path[..idx],
            None => "",
        }
    }

    /// Reject records that cannot be archived under their id
    pub fn validate(&self) -> Result<()> {
        if self.file_id.is_empty() {
            return Err(PackError::Protocol("file id must not be empty".to_string()));
        }
        if self.file_id.len() > u16::MAX as usize || self.file_id.contains('\0') {
            return Err(PackError::Protocol(format!(
                "file id '{}' is not a valid member name",
                self.file_id.escape_debug()
            )));
        }
        if self.path.is_empty() {
            return Err(PackError::Protocol(format!(
                "file {} has an empty path",
                self.file_id
            )));
        }
        Ok(())
    }
}

/// A file accepted into a bin, with the facts captured at enrollment time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrolledFile {
    pub record: FileRecord,

    /// Size in bytes at enrollment
    pub size: u64,

    /// Content checksum computed at enrollment
    pub checksum: Checksum,

    /// Enrollment time (unix millis)
    pub enrolled_at: u64,
}

impl EnrolledFile {
    pub fn file_id(&self) -> &str {
        &self.record.file_id
    }
}
