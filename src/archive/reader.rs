//! Archive Reader
//!
//! Opens containers and serves single members by seeking straight to their
//! manifest offset. Only the footer and the manifest are read on open.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use crate::error::{PackError, Result};

use super::{ManifestEntry, FOOTER_SIZE, HEADER_SIZE, MAGIC, MEMBER_HEADER_SIZE, VERSION};

/// Reader for container files with an in-memory manifest
pub struct ArchiveReader {
    file: BufReader<File>,
    manifest: Vec<ManifestEntry>,
    /// Member name → manifest position
    by_name: HashMap<String, usize>,
    /// End of the data block
    manifest_offset: u64,
    data_crc: u32,
    file_size: u64,
}

impl ArchiveReader {
    /// Open a container and load its manifest
    ///
    /// Fails with `PackError::Archive` on a bad header, a truncated file or a
    /// manifest whose CRC does not match the footer.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(PackError::Archive(format!(
                "{} is too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(PackError::Archive(format!(
                "invalid magic: expected SFPK, got {:?}",
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(PackError::Archive(format!(
                "unsupported container version: {}",
                version
            )));
        }

        file.seek(SeekFrom::Start(file_size - FOOTER_SIZE))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let manifest_offset = le_u64(&footer[0..8]);
        let member_count = le_u64(&footer[8..16]);
        let manifest_crc = le_u32(&footer[16..20]);
        let data_crc = le_u32(&footer[20..24]);

        if manifest_offset < HEADER_SIZE || manifest_offset > file_size - FOOTER_SIZE {
            return Err(PackError::Archive(format!(
                "manifest offset {} outside container of {} bytes",
                manifest_offset, file_size
            )));
        }

        let manifest_len = file_size - FOOTER_SIZE - manifest_offset;
        let mut manifest_bytes = vec![0u8; manifest_len as usize];
        file.seek(SeekFrom::Start(manifest_offset))?;
        file.read_exact(&mut manifest_bytes)?;

        if crc32fast::hash(&manifest_bytes) != manifest_crc {
            return Err(PackError::Archive("manifest checksum mismatch".to_string()));
        }

        let manifest: Vec<ManifestEntry> = bincode::deserialize(&manifest_bytes)
            .map_err(|e| PackError::Archive(format!("undecodable manifest: {}", e)))?;

        if manifest.len() as u64 != member_count {
            return Err(PackError::Archive(format!(
                "footer announces {} members, manifest holds {}",
                member_count,
                manifest.len()
            )));
        }

        let by_name = manifest
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.name.clone(), i))
            .collect();

        Ok(Self {
            file: BufReader::new(file),
            manifest,
            by_name,
            manifest_offset,
            data_crc,
            file_size,
        })
    }

    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.manifest
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.by_name.get(name).map(|&i| &self.manifest[i])
    }

    /// Total container size
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Offset where the data block ends and the manifest begins
    pub fn data_end(&self) -> u64 {
        self.manifest_offset
    }

    /// Read exactly one member's bytes
    pub fn read_member(&mut self, name: &str) -> Result<Vec<u8>> {
        let (offset, length) = match self.entry(name) {
            Some(entry) => (entry.offset, entry.length),
            None => return Err(PackError::NotFound(format!("member '{}'", name))),
        };

        let end = offset.checked_add(length).unwrap_or(u64::MAX);
        if offset < HEADER_SIZE || end > self.manifest_offset {
            return Err(PackError::Archive(format!(
                "member '{}' range {}..{} lies outside the data block",
                name, offset, end
            )));
        }

        self.file.seek(SeekFrom::Start(offset))?;
        let mut data = vec![0u8; length as usize];
        self.file.read_exact(&mut data)?;
        Ok(data)
    }

    /// Recompute the data block CRC and compare it with the footer
    pub fn check_data_crc(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut remaining = self.manifest_offset - HEADER_SIZE;
        let mut hasher = crc32fast::Hasher::new();
        let mut buf = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            self.file.read_exact(&mut buf[..want])?;
            hasher.update(&buf[..want]);
            remaining -= want as u64;
        }

        let actual = hasher.finalize();
        if actual != self.data_crc {
            return Err(PackError::Archive(format!(
                "data checksum mismatch: footer {:08x}, computed {:08x}",
                self.data_crc, actual
            )));
        }
        Ok(())
    }

    /// Walk the member framing of the data block in container order
    pub fn members(&mut self) -> Result<MemberIterator<'_>> {
        MemberIterator::new(&mut self.file, self.manifest_offset)
    }
}

/// One member frame found while scanning the data block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFrame {
    pub name: String,
    /// Offset of the member's data bytes
    pub offset: u64,
    pub length: u64,
}

/// Sequential scan over member frames (data is skipped, not read)
pub struct MemberIterator<'a> {
    file: &'a mut BufReader<File>,
    /// Stop at the start of the manifest block
    end_offset: u64,
    current_offset: u64,
    failed: bool,
}

impl<'a> MemberIterator<'a> {
    fn new(file: &'a mut BufReader<File>, end_offset: u64) -> Result<Self> {
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end_offset,
            current_offset: HEADER_SIZE,
            failed: false,
        })
    }

    fn read_frame(&mut self) -> Result<MemberFrame> {
        if self.current_offset + MEMBER_HEADER_SIZE > self.end_offset {
            return Err(PackError::Archive(format!(
                "truncated member header at offset {}",
                self.current_offset
            )));
        }

        let mut header = [0u8; MEMBER_HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        let name_len = le_u32(&header[0..4]) as u64;
        let data_len = le_u64(&header[4..12]);

        let data_offset = self.current_offset + MEMBER_HEADER_SIZE + name_len;
        let next = data_offset.checked_add(data_len).unwrap_or(u64::MAX);
        if next > self.end_offset {
            return Err(PackError::Archive(format!(
                "member at offset {} overruns the data block",
                self.current_offset
            )));
        }

        let mut name = vec![0u8; name_len as usize];
        self.file.read_exact(&mut name)?;
        let name = String::from_utf8(name)
            .map_err(|_| PackError::Archive("member name is not UTF-8".to_string()))?;

        self.file.seek(SeekFrom::Start(next))?;
        self.current_offset = next;

        Ok(MemberFrame {
            name,
            offset: data_offset,
            length: data_len,
        })
    }
}

impl<'a> Iterator for MemberIterator<'a> {
    type Item = Result<MemberFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.current_offset >= self.end_offset {
            return None;
        }

        let frame = self.read_frame();
        if frame.is_err() {
            self.failed = true;
        }
        Some(frame)
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}
