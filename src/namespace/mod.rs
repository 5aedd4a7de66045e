//! Source Namespace Module
//!
//! Access to the bytes of small files as the host's namespace holds them.
//! The namespace reports paths under `data_root`; this process sees the same
//! tree under `mount_point`.
//!
//! Reads run on a fixed pool of reader threads so a stalled mount turns into
//! a per-file timeout instead of a stuck builder. A stalled mount ties up at
//! most the pool and its queue; further reads are refused straight away with
//! a transient error.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Sender, TrySendError};

use crate::error::{PackError, Result};
use crate::record::FileRecord;

/// Reader threads of a [`LocalNamespace`] unless told otherwise
pub const DEFAULT_READERS: usize = 4;

/// Reads that may wait for a free reader, per reader
const QUEUE_PER_READER: usize = 4;

/// Reads small files from wherever the host keeps them
pub trait SourceNamespace: Send + Sync {
    /// Whole content of `file`
    fn read(&self, file: &FileRecord) -> Result<Bytes>;
}

#[derive(Debug)]
struct ReadRequest {
    path: PathBuf,
    reply: Sender<io::Result<Vec<u8>>>,
}

/// Namespace mounted on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalNamespace {
    data_root: PathBuf,
    mount_point: PathBuf,
    read_timeout: Duration,
    requests: Sender<ReadRequest>,
}

impl LocalNamespace {
    pub fn new(
        data_root: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
        read_timeout: Duration,
    ) -> Result<Self> {
        Self::with_readers(data_root, mount_point, read_timeout, DEFAULT_READERS)
    }

    /// Start `readers` reader threads; up to four reads per reader may queue
    pub fn with_readers(
        data_root: impl Into<PathBuf>,
        mount_point: impl Into<PathBuf>,
        read_timeout: Duration,
        readers: usize,
    ) -> Result<Self> {
        let readers = readers.max(1);
        let (requests, queue) = channel::bounded::<ReadRequest>(readers * QUEUE_PER_READER);

        for n in 0..readers {
            let queue = queue.clone();
            std::thread::Builder::new()
                .name(format!("ns-read-{}", n))
                .spawn(move || {
                    // Ends once every handle to the namespace is dropped
                    for request in queue.iter() {
                        let _ = request.reply.send(fs::read(&request.path));
                    }
                })?;
        }

        Ok(Self {
            data_root: data_root.into(),
            mount_point: mount_point.into(),
            read_timeout,
            requests,
        })
    }

    /// Translate a namespace path into the local mount
    pub fn local_path(&self, namespace_path: &str) -> Result<PathBuf> {
        let path = Path::new(namespace_path);
        if self.data_root == self.mount_point {
            return Ok(path.to_path_buf());
        }

        match path.strip_prefix(&self.data_root) {
            Ok(rest) => Ok(self.mount_point.join(rest)),
            Err(_) => Err(PackError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!(
                    "{} is not below data root {}",
                    namespace_path,
                    self.data_root.display()
                ),
            ))),
        }
    }
}

impl SourceNamespace for LocalNamespace {
    fn read(&self, file: &FileRecord) -> Result<Bytes> {
        let path = self.local_path(&file.path)?;
        let (reply, rx) = channel::bounded(1);

        match self.requests.try_send(ReadRequest { path, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Namespace readers saturated, refusing {}", file.path);
                return Err(PackError::Io(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    format!("namespace readers saturated, {} not read", file.path),
                )));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(PackError::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "namespace readers stopped",
                )))
            }
        }

        match rx.recv_timeout(self.read_timeout) {
            Ok(Ok(data)) => Ok(Bytes::from(data)),
            Ok(Err(e)) => Err(e.into()),
            Err(channel::RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Read of {} timed out after {:?}",
                    file.path,
                    self.read_timeout
                );
                Err(PackError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read of {} timed out", file.path),
                )))
            }
            Err(channel::RecvTimeoutError::Disconnected) => Err(PackError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("reader for {} vanished", file.path),
            ))),
        }
    }
}
