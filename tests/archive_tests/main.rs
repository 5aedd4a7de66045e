//! Tests for archive containers
//!
//! These tests verify:
//! - Writer/reader agreement on layout and member offsets
//! - Rejection of damaged containers
//! - The builder's handling of changed members and write faults
//! - What each verification level catches

mod builder_tests;
mod container_tests;
mod verify_tests;

use std::collections::HashMap;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use smallpack::archive::{ContainerSink, FileSink, SinkFactory};
use smallpack::checksum::ChecksumAlgorithm;
use smallpack::error::{PackError, Result};
use smallpack::namespace::SourceNamespace;
use smallpack::record::{EnrolledFile, FileRecord};

/// Namespace held in memory; contents can change under the builder
#[derive(Default)]
pub struct MemoryNamespace {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryNamespace {
    pub fn put(&self, path: &str, data: &[u8]) {
        self.files.lock().insert(path.to_string(), data.to_vec());
    }

    pub fn delete(&self, path: &str) {
        self.files.lock().remove(path);
    }
}

impl SourceNamespace for MemoryNamespace {
    fn read(&self, file: &FileRecord) -> Result<Bytes> {
        self.files
            .lock()
            .get(&file.path)
            .map(|data| Bytes::from(data.clone()))
            .ok_or_else(|| {
                PackError::Io(io::Error::new(io::ErrorKind::NotFound, file.path.clone()))
            })
    }
}

/// Sink factory whose first `failures` containers break mid-write
pub struct FaultySinks {
    pub failures: usize,
    pub created: AtomicUsize,
}

impl FaultySinks {
    pub fn new(failures: usize) -> Self {
        Self {
            failures,
            created: AtomicUsize::new(0),
        }
    }
}

struct BrokenSink {
    written: usize,
}

impl Write for BrokenSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 16 {
            return Err(io::Error::new(io::ErrorKind::Other, "device full"));
        }
        self.written += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ContainerSink for BrokenSink {
    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SinkFactory for FaultySinks {
    fn create(&self, path: &Path) -> io::Result<Box<dyn ContainerSink>> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            Ok(Box::new(BrokenSink { written: 0 }))
        } else {
            Ok(Box::new(FileSink::create(path)?))
        }
    }
}

/// Register `data` in `ns` and describe it as enrollment would
pub fn enroll(ns: &MemoryNamespace, i: usize, data: &[u8]) -> EnrolledFile {
    let path = format!("/data/raw/f{}.dat", i);
    ns.put(&path, data);
    EnrolledFile {
        record: FileRecord::new(format!("{:024X}", i), path),
        size: data.len() as u64,
        checksum: ChecksumAlgorithm::Crc32.digest(data),
        enrolled_at: 0,
    }
}

pub fn payload(i: usize, len: usize) -> Vec<u8> {
    (0..len).map(|j| ((i * 31 + j) % 251) as u8).collect()
}

pub fn namespace() -> Arc<MemoryNamespace> {
    Arc::new(MemoryNamespace::default())
}
