//! Storage Manager Module
//!
//! The host storage manager's call contract: `store`, `restore`, `remove`.
//! Built containers are committed through it, and single-file restores read
//! them back through it.
//!
//! [`DirectoryStorageManager`] keeps objects under a local directory tree,
//! which is what a disk-backed store or a mounted transport door looks like
//! from here.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::checksum::{Checksum, ChecksumAlgorithm};
use crate::error::{PackError, Result};

/// Opaque reference to a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageHandle(String);

impl StorageHandle {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Store/restore contract of the host storage manager
pub trait StorageManager: Send + Sync {
    /// Store the object at `local` under `name`
    fn store(&self, local: &Path, name: &str) -> Result<StorageHandle>;

    /// Make a stored object readable locally
    fn restore(&self, handle: &StorageHandle) -> Result<PathBuf>;

    fn remove(&self, handle: &StorageHandle) -> Result<()>;

    /// Digest of the object as the store holds it
    fn digest(&self, handle: &StorageHandle, algorithm: ChecksumAlgorithm) -> Result<Checksum>;
}

/// Storage manager backed by a directory
#[derive(Debug, Clone)]
pub struct DirectoryStorageManager {
    root: PathBuf,
}

impl DirectoryStorageManager {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, name: &str) -> Result<PathBuf> {
        let relative = Path::new(name);
        let safe = !name.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(PackError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("object name '{}' is not a relative path", name),
            )));
        }
        Ok(self.root.join(relative))
    }
}

impl StorageManager for DirectoryStorageManager {
    fn store(&self, local: &Path, name: &str) -> Result<StorageHandle> {
        let dest = self.object_path(name)?;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }

        let partial = dest.with_extension("partial");
        fs::copy(local, &partial)?;
        File::open(&partial)?.sync_all()?;
        fs::rename(&partial, &dest)?;

        tracing::debug!("Stored {} as {}", local.display(), dest.display());
        Ok(StorageHandle::new(name))
    }

    fn restore(&self, handle: &StorageHandle) -> Result<PathBuf> {
        let path = self.object_path(handle.as_str())?;
        if !path.is_file() {
            return Err(PackError::NotFound(format!("stored object {}", handle)));
        }
        Ok(path)
    }

    fn remove(&self, handle: &StorageHandle) -> Result<()> {
        let path = self.object_path(handle.as_str())?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(PackError::NotFound(format!("stored object {}", handle)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn digest(&self, handle: &StorageHandle, algorithm: ChecksumAlgorithm) -> Result<Checksum> {
        let path = self.restore(handle)?;
        let mut file = File::open(path)?;
        algorithm.digest_reader(&mut file)
    }
}
