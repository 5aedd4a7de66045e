use smallpack::config::JournalSyncStrategy;
use smallpack::journal::{JournalReader, JournalWriter};

use crate::{enroll, setup_temp_journal, write_ops, TestOp};

fn read_all(path: &std::path::Path) -> Vec<(u64, TestOp)> {
    JournalReader::<TestOp>::open(path)
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .map(|e| (e.lsn, e.op))
        .collect()
}

#[test]
fn test_append_assigns_increasing_lsns() {
    let (_temp, path) = setup_temp_journal();
    let mut writer = JournalWriter::open(&path, JournalSyncStrategy::EveryWrite).unwrap();

    assert_eq!(writer.append(enroll(0)).unwrap(), 1);
    assert_eq!(writer.append(enroll(1)).unwrap(), 2);
    assert_eq!(writer.append(TestOp::Clear { bin_id: 9 }).unwrap(), 3);
    assert_eq!(writer.current_lsn(), 4);
    assert_eq!(writer.entry_count(), 3);

    let entries = read_all(&path);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[2], (3, TestOp::Clear { bin_id: 9 }));
}

#[test]
fn test_reopen_continues_lsn_sequence() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 5);

    let mut writer = JournalWriter::<TestOp>::open(&path, JournalSyncStrategy::EveryWrite).unwrap();
    assert_eq!(writer.entry_count(), 5);
    assert_eq!(writer.append(enroll(5)).unwrap(), 6);

    let lsns: Vec<u64> = read_all(&path).into_iter().map(|(lsn, _)| lsn).collect();
    assert_eq!(lsns, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_batched_sync_still_writes_every_entry() {
    let (_temp, path) = setup_temp_journal();
    {
        let mut writer =
            JournalWriter::open(&path, JournalSyncStrategy::EveryNEntries { count: 4 }).unwrap();
        for i in 0..10 {
            writer.append(enroll(i)).unwrap();
        }
        writer.sync().unwrap();
    }

    assert_eq!(read_all(&path).len(), 10);
}

#[test]
fn test_rewrite_replaces_contents() {
    let (_temp, path) = setup_temp_journal();
    write_ops(&path, 20);

    let mut writer = JournalWriter::<TestOp>::open(&path, JournalSyncStrategy::EveryWrite).unwrap();
    writer
        .rewrite(vec![TestOp::Clear { bin_id: 1 }, enroll(99)])
        .unwrap();

    assert_eq!(writer.entry_count(), 2);
    assert_eq!(writer.current_lsn(), 23);
    assert!(!path.with_extension("compact").exists());

    writer.append(enroll(100)).unwrap();
    let entries = read_all(&path);
    assert_eq!(
        entries,
        vec![
            (21, TestOp::Clear { bin_id: 1 }),
            (22, enroll(99)),
            (23, enroll(100)),
        ]
    );
}

#[test]
fn test_truncate_keeps_lsns_monotonic() {
    let (_temp, path) = setup_temp_journal();
    let mut writer = JournalWriter::open(&path, JournalSyncStrategy::EveryWrite).unwrap();
    writer.append(enroll(0)).unwrap();
    writer.append(enroll(1)).unwrap();

    writer.truncate().unwrap();
    assert_eq!(writer.entry_count(), 0);
    assert_eq!(writer.append(enroll(2)).unwrap(), 3);

    assert_eq!(read_all(&path), vec![(3, enroll(2))]);
}
