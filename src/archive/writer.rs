//! Archive Writer
//!
//! Appends members to a new container in one forward pass. Nothing is
//! patched after the fact: the footer carries everything the reader needs.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{PackError, Result};

use super::{ManifestEntry, HEADER_SIZE, MAGIC, MEMBER_HEADER_SIZE, VERSION};

/// Destination of container bytes
pub trait ContainerSink: Write + Send {
    /// Make everything written so far durable
    fn sync(&mut self) -> io::Result<()>;
}

impl<S: ContainerSink + ?Sized> ContainerSink for Box<S> {
    fn sync(&mut self) -> io::Result<()> {
        (**self).sync()
    }
}

/// Buffered file sink
pub struct FileSink {
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
        })
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl ContainerSink for FileSink {
    fn sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }
}

/// Opens a sink for a container path
pub trait SinkFactory: Send + Sync {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ContainerSink>>;
}

/// Creates plain [`FileSink`]s
#[derive(Debug, Clone, Copy, Default)]
pub struct FileSinkFactory;

impl SinkFactory for FileSinkFactory {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ContainerSink>> {
        Ok(Box::new(FileSink::create(path)?))
    }
}

/// Writes one container
pub struct ArchiveWriter<S: ContainerSink> {
    sink: S,
    algorithm: ChecksumAlgorithm,
    /// Current write position
    offset: u64,
    manifest: Vec<ManifestEntry>,
    /// Running CRC over the data block
    data_hasher: crc32fast::Hasher,
}

impl<S: ContainerSink> ArchiveWriter<S> {
    /// Start a container; the header is written immediately
    pub fn new(mut sink: S, algorithm: ChecksumAlgorithm) -> Result<Self> {
        sink.write_all(MAGIC)?;
        sink.write_all(&VERSION.to_le_bytes())?;
        sink.write_all(&[0u8; 2])?;

        Ok(Self {
            sink,
            algorithm,
            offset: HEADER_SIZE,
            manifest: Vec::new(),
            data_hasher: crc32fast::Hasher::new(),
        })
    }

    /// Append one member; names must be unique within the container
    pub fn add_member(&mut self, name: &str, data: &[u8]) -> Result<&ManifestEntry> {
        if self.manifest.iter().any(|entry| entry.name == name) {
            return Err(PackError::Archive(format!("duplicate member '{}'", name)));
        }

        let name_len = (name.len() as u32).to_le_bytes();
        let data_len = (data.len() as u64).to_le_bytes();

        self.sink.write_all(&name_len)?;
        self.sink.write_all(&data_len)?;
        self.sink.write_all(name.as_bytes())?;
        self.sink.write_all(data)?;

        self.data_hasher.update(&name_len);
        self.data_hasher.update(&data_len);
        self.data_hasher.update(name.as_bytes());
        self.data_hasher.update(data);

        let data_offset = self.offset + MEMBER_HEADER_SIZE + name.len() as u64;
        self.offset = data_offset + data.len() as u64;

        self.manifest.push(ManifestEntry {
            name: name.to_string(),
            offset: data_offset,
            length: data.len() as u64,
            checksum: self.algorithm.digest(data),
        });

        Ok(&self.manifest[self.manifest.len() - 1])
    }

    pub fn member_count(&self) -> usize {
        self.manifest.len()
    }

    /// Write manifest and footer, sync, and hand back the manifest
    ///
    /// Returns the total container size alongside the manifest.
    pub fn finish(mut self) -> Result<(Vec<ManifestEntry>, u64)> {
        let manifest_offset = self.offset;
        let manifest_bytes = bincode::serialize(&self.manifest)?;
        let manifest_crc = crc32fast::hash(&manifest_bytes);
        let data_crc = self.data_hasher.finalize();

        self.sink.write_all(&manifest_bytes)?;
        self.sink.write_all(&manifest_offset.to_le_bytes())?;
        self.sink.write_all(&(self.manifest.len() as u64).to_le_bytes())?;
        self.sink.write_all(&manifest_crc.to_le_bytes())?;
        self.sink.write_all(&data_crc.to_le_bytes())?;
        self.sink.sync()?;

        let size = manifest_offset + manifest_bytes.len() as u64 + super::FOOTER_SIZE;
        Ok((self.manifest, size))
    }
}
