//! Tests for the operation journal
//!
//! These tests verify:
//! - Entry framing and CRC detection
//! - Appending, LSN continuity across reopen
//! - Recovery from torn and corrupted tails
//! - Atomic rewrite (compaction)

mod recovery_tests;
mod writer_tests;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use smallpack::config::JournalSyncStrategy;
use smallpack::journal::JournalWriter;
use tempfile::TempDir;

/// Operation type used by every journal test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestOp {
    Enroll { file_id: String, size: u64 },
    Clear { bin_id: u64 },
}

pub fn enroll(i: usize) -> TestOp {
    TestOp::Enroll {
        file_id: format!("file{:04}", i),
        size: i as u64 * 100,
    }
}

pub fn setup_temp_journal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.journal");
    (temp_dir, path)
}

/// Write `count` enroll ops through the writer
pub fn write_ops(path: &Path, count: usize) {
    let mut writer = JournalWriter::<TestOp>::open(path, JournalSyncStrategy::EveryWrite).unwrap();
    for i in 0..count {
        writer.append(enroll(i)).unwrap();
    }
}
