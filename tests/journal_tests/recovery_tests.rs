use std::fs::{self, File, OpenOptions};
use std::io::Write;

use smallpack::config::JournalSyncStrategy;
use smallpack::journal::{JournalEntry, JournalRecovery, JournalWriter};

use crate::{enroll, setup_temp_journal, write_ops, TestOp};

// =============================================================================
// Clean Journals
// =============================================================================

#[test]
fn test_recover_empty_file() {
    let (_temp, path) = setup_temp_journal();
    File::create(&path).unwrap();

    let (entries, result) = JournalRecovery::recover::<TestOp>(&path).unwrap();

    assert!(entries.is_empty());
    assert_eq!(result.entries_recovered, 0);
    assert_eq!(result.last_lsn, 0);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_clean_journal() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 12);

    let (entries, result) = JournalRecovery::recover::<TestOp>(&path).unwrap();

    assert_eq!(entries.len(), 12);
    assert_eq!(result.entries_recovered, 12);
    assert_eq!(result.entries_corrupted, 0);
    assert_eq!(result.last_lsn, 12);
    assert!(!result.was_truncated);
    assert_eq!(entries[3].op, enroll(3));
}

#[test]
fn test_recover_missing_file_is_error() {
    let (_temp, path) = setup_temp_journal();
    assert!(JournalRecovery::recover::<TestOp>(&path).is_err());
}

// =============================================================================
// Torn and Corrupted Tails
// =============================================================================

#[test]
fn test_recover_truncates_torn_tail() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 4);
    let clean_len = fs::metadata(&path).unwrap().len();

    // Half of a fifth entry
    let partial = JournalEntry::new(5, enroll(4)).serialize().unwrap();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&partial[..partial.len() / 2]).unwrap();
    drop(file);

    let (entries, result) = JournalRecovery::recover::<TestOp>(&path).unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(result.last_lsn, 4);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), clean_len);
}

#[test]
fn test_recover_stops_at_first_corrupt_entry() {
    let (_temp, path) = setup_temp_journal();
    let mut bytes = Vec::new();
    let mut offsets = Vec::new();
    for lsn in 1..=5u64 {
        offsets.push(bytes.len());
        bytes.extend(JournalEntry::new(lsn, enroll(lsn as usize)).serialize().unwrap());
    }
    // Flip a data byte in entry 3
    let target = offsets[3] - 1;
    bytes[target] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let (entries, result) = JournalRecovery::recover::<TestOp>(&path).unwrap();

    assert_eq!(entries.len(), 2);
    assert_eq!(result.entries_corrupted, 1);
    assert_eq!(result.last_lsn, 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), offsets[2] as u64);
}

#[test]
fn test_verify_leaves_file_untouched() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 3);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);
    let len = fs::metadata(&path).unwrap().len();

    let result = JournalRecovery::verify::<TestOp>(&path).unwrap();

    assert_eq!(result.entries_recovered, 3);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), len);
}

#[test]
fn test_append_after_recovery_continues() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 3);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);

    JournalRecovery::recover::<TestOp>(&path).unwrap();
    let mut writer = JournalWriter::<TestOp>::open(&path, JournalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.append(enroll(3)).unwrap(), 4);

    let (entries, result) = JournalRecovery::recover::<TestOp>(&path).unwrap();
    assert_eq!(entries.len(), 4);
    assert!(!result.was_truncated);
}
