//! Member checksums
//!
//! A checksum is an algorithm tag plus a lowercase hex digest. CRC32 is the
//! default (fast, the same hasher the container footer uses); MD5 and SHA-256
//! are available when the storage manager or the site policy asks for them.

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PackError, Result};

/// Supported checksum algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    #[default]
    Crc32,
    Md5,
    Sha256,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            ChecksumAlgorithm::Crc32 => "crc32",
            ChecksumAlgorithm::Md5 => "md5",
            ChecksumAlgorithm::Sha256 => "sha256",
        }
    }

    /// Checksum an in-memory buffer
    pub fn digest(&self, data: &[u8]) -> Checksum {
        let mut hasher = ChecksumHasher::new(*self);
        hasher.update(data);
        hasher.finalize()
    }

    /// Checksum everything readable from `reader`
    pub fn digest_reader<R: Read>(&self, reader: &mut R) -> Result<Checksum> {
        let mut hasher = ChecksumHasher::new(*self);
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = PackError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "crc32" => Ok(ChecksumAlgorithm::Crc32),
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" | "sha-256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(PackError::Config(format!(
                "unknown checksum algorithm '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An algorithm-tagged digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest
    pub value: String,
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.value)
    }
}

/// Streaming hasher over any supported algorithm
pub enum ChecksumHasher {
    Crc32(crc32fast::Hasher),
    Md5(Md5),
    Sha256(Sha256),
}

impl ChecksumHasher {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Crc32 => ChecksumHasher::Crc32(crc32fast::Hasher::new()),
            ChecksumAlgorithm::Md5 => ChecksumHasher::Md5(Md5::new()),
            ChecksumAlgorithm::Sha256 => ChecksumHasher::Sha256(Sha256::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            ChecksumHasher::Crc32(h) => h.update(data),
            ChecksumHasher::Md5(h) => h.update(data),
            ChecksumHasher::Sha256(h) => h.update(data),
        }
    }

    pub fn finalize(self) -> Checksum {
        match self {
            ChecksumHasher::Crc32(h) => Checksum {
                algorithm: ChecksumAlgorithm::Crc32,
                value: format!("{:08x}", h.finalize()),
            },
            ChecksumHasher::Md5(h) => Checksum {
                algorithm: ChecksumAlgorithm::Md5,
                value: hex::encode(h.finalize()),
            },
            ChecksumHasher::Sha256(h) => Checksum {
                algorithm: ChecksumAlgorithm::Sha256,
                value: hex::encode(h.finalize()),
            },
        }
    }
}
