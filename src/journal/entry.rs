//! Journal entry framing
//!
//! Every entry is framed as `[LSN (8)][CRC (4)][Len (4)][Data]`, all
//! little-endian. The CRC covers the LSN and the data, so a flipped bit in
//! either is detected.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{PackError, Result};

/// Header size: LSN (8) + CRC (4) + Len (4)
pub const HEADER_SIZE: usize = 16;

/// Upper bound for one entry's data section (64 MB)
pub const MAX_ENTRY_SIZE: u32 = 64 * 1024 * 1024;

/// A single journal entry carrying an operation of type `T`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry<T> {
    /// Log Sequence Number - monotonically increasing
    pub lsn: u64,

    /// Timestamp (unix millis) when entry was created
    pub timestamp: u64,

    /// The logged operation
    pub op: T,
}

impl<T> JournalEntry<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(lsn: u64, op: T) -> Self {
        Self {
            lsn,
            timestamp: SystemClock.now_millis(),
            op,
        }
    }

    /// Encode header + data
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serialize(&(self.timestamp, &self.op))?;
        if data.len() > MAX_ENTRY_SIZE as usize {
            return Err(PackError::Serialization(format!(
                "journal entry of {} bytes exceeds limit of {}",
                data.len(),
                MAX_ENTRY_SIZE
            )));
        }

        let crc = Self::compute_crc(self.lsn, &data);

        let mut bytes = Vec::with_capacity(HEADER_SIZE + data.len());
        bytes.extend_from_slice(&self.lsn.to_le_bytes());
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Decode one complete entry from `bytes`
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let header = FrameHeader::parse(bytes)?;
        let end = HEADER_SIZE + header.len as usize;
        if bytes.len() < end {
            return Err(PackError::JournalCorruption(format!(
                "truncated entry: expected {} data bytes, got {}",
                header.len,
                bytes.len() - HEADER_SIZE
            )));
        }
        Self::from_frame(header, &bytes[HEADER_SIZE..end])
    }

    /// Decode an entry whose header has already been parsed
    pub(crate) fn from_frame(header: FrameHeader, data: &[u8]) -> Result<Self> {
        let actual = Self::compute_crc(header.lsn, data);
        if actual != header.crc {
            return Err(PackError::JournalCorruption(format!(
                "CRC mismatch at LSN {}: stored {:08x}, computed {:08x}",
                header.lsn, header.crc, actual
            )));
        }

        let (timestamp, op): (u64, T) = bincode::deserialize(data).map_err(|e| {
            PackError::JournalCorruption(format!("undecodable entry at LSN {}: {}", header.lsn, e))
        })?;

        Ok(Self {
            lsn: header.lsn,
            timestamp,
            op,
        })
    }

    /// CRC32 over LSN and data
    pub fn compute_crc(lsn: u64, data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&lsn.to_le_bytes());
        hasher.update(data);
        hasher.finalize()
    }
}

/// Parsed `[LSN][CRC][Len]` header
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameHeader {
    pub lsn: u64,
    pub crc: u32,
    pub len: u32,
}

impl FrameHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PackError::JournalCorruption(format!(
                "incomplete header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut lsn = [0u8; 8];
        let mut crc = [0u8; 4];
        let mut len = [0u8; 4];
        lsn.copy_from_slice(&bytes[0..8]);
        crc.copy_from_slice(&bytes[8..12]);
        len.copy_from_slice(&bytes[12..16]);

        let header = Self {
            lsn: u64::from_le_bytes(lsn),
            crc: u32::from_le_bytes(crc),
            len: u32::from_le_bytes(len),
        };

        if header.len > MAX_ENTRY_SIZE {
            return Err(PackError::JournalCorruption(format!(
                "entry length {} exceeds limit of {}",
                header.len, MAX_ENTRY_SIZE
            )));
        }
        Ok(header)
    }
}
