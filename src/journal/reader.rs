//! Journal Reader
//!
//! Handles reading entries from a journal file.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::marker::PhantomData;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

use super::entry::{FrameHeader, JournalEntry, HEADER_SIZE};

/// Reads entries from a journal file
pub struct JournalReader<T> {
    reader: BufReader<File>,
    /// Byte offset just past the last entry returned
    position: u64,
    /// Set when reading stopped at an incomplete trailing entry
    partial_tail: bool,
    _op: PhantomData<T>,
}

impl<T> JournalReader<T>
where
    T: Serialize + DeserializeOwned,
{
    /// Open a journal file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            partial_tail: false,
            _op: PhantomData,
        })
    }

    /// Read the next entry
    ///
    /// Returns `Ok(None)` at end of file, including when the file ends in the
    /// middle of an entry (a torn write). A complete entry that fails its CRC
    /// is an error.
    pub fn next_entry(&mut self) -> Result<Option<JournalEntry<T>>> {
        let mut header_bytes = [0u8; HEADER_SIZE];
        let n = read_full(&mut self.reader, &mut header_bytes)?;
        if n == 0 {
            return Ok(None);
        }
        if n < HEADER_SIZE {
            self.partial_tail = true;
            return Ok(None);
        }

        let header = FrameHeader::parse(&header_bytes)?;

        let mut data = vec![0u8; header.len as usize];
        let n = read_full(&mut self.reader, &mut data)?;
        if n < data.len() {
            self.partial_tail = true;
            return Ok(None);
        }

        let entry = JournalEntry::from_frame(header, &data)?;
        self.position += (HEADER_SIZE + data.len()) as u64;
        Ok(Some(entry))
    }

    /// Byte offset just past the last valid entry read so far
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether the file ended with an incomplete entry
    pub fn has_partial_tail(&self) -> bool {
        self.partial_tail
    }

    /// Iterate over all valid entries; stops after the first error
    pub fn entries(self) -> JournalIterator<T> {
        JournalIterator {
            reader: self,
            done: false,
        }
    }
}

/// Iterator over journal entries
pub struct JournalIterator<T> {
    reader: JournalReader<T>,
    done: bool,
}

impl<T> Iterator for JournalIterator<T>
where
    T: Serialize + DeserializeOwned,
{
    type Item = Result<JournalEntry<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Fill `buf` as far as the reader allows; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
