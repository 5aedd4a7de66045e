use std::sync::atomic::Ordering;
use std::sync::Arc;

use smallpack::archive::{ArchiveBuilder, ArchiveReader, FileSinkFactory};
use smallpack::checksum::ChecksumAlgorithm;
use smallpack::error::PackError;
use smallpack::verify::VerificationLevel;
use tempfile::TempDir;

use crate::{enroll, namespace, payload, FaultySinks};

#[test]
fn test_build_packs_members_in_order() {
    let dir = TempDir::new().unwrap();
    let ns = namespace();
    let members: Vec<_> = (0..3).map(|i| enroll(&ns, i, &payload(i, 1200))).collect();
    let builder = ArchiveBuilder::new(
        dir.path(),
        ns.clone(),
        Arc::new(FileSinkFactory),
        ChecksumAlgorithm::Crc32,
        3,
    );

    let built = builder.build(1, 42, "raw/2026", &members).unwrap();
    let archive = built.archive.unwrap();

    assert_eq!(archive.archive_id, 42);
    assert_eq!(archive.name, "raw/2026/archive_000000000042.sfa");
    assert_eq!(archive.verification, VerificationLevel::Off);
    assert_eq!(archive.payload_size(), 3600);
    assert_eq!(built.path, dir.path().join(&archive.name));
    assert_eq!(built.included, members);
    assert!(built.lost.is_empty());

    let mut reader = ArchiveReader::open(&built.path).unwrap();
    let names: Vec<_> = reader.manifest().iter().map(|e| e.name.clone()).collect();
    let expected: Vec<_> = members.iter().map(|m| m.record.file_id.clone()).collect();
    assert_eq!(names, expected);
    assert_eq!(reader.read_member(&expected[1]).unwrap(), payload(1, 1200));
}

#[test]
fn test_changed_member_is_dropped() {
    let dir = TempDir::new().unwrap();
    let ns = namespace();
    let members: Vec<_> = (0..3).map(|i| enroll(&ns, i, &payload(i, 50))).collect();
    ns.put(&members[1].record.path, b"rewritten after enrollment");
    ns.delete(&members[2].record.path);
    let builder = ArchiveBuilder::new(
        dir.path(),
        ns.clone(),
        Arc::new(FileSinkFactory),
        ChecksumAlgorithm::Crc32,
        1,
    );

    let built = builder.build(1, 1, "", &members).unwrap();

    assert_eq!(built.included, vec![members[0].clone()]);
    assert_eq!(built.lost.len(), 2);
    assert_eq!(built.lost[0].file, members[1]);
    assert_eq!(built.archive.unwrap().manifest.len(), 1);
}

#[test]
fn test_same_size_content_change_is_dropped() {
    let dir = TempDir::new().unwrap();
    let ns = namespace();
    let member = enroll(&ns, 0, &payload(0, 64));
    ns.put(&member.record.path, &payload(9, 64));
    let builder = ArchiveBuilder::new(
        dir.path(),
        ns.clone(),
        Arc::new(FileSinkFactory),
        ChecksumAlgorithm::Crc32,
        1,
    );

    let built = builder.build(1, 1, "", &[member]).unwrap();

    assert!(built.archive.is_none());
    assert!(built.included.is_empty());
    assert_eq!(built.lost.len(), 1);
    assert!(!built.path.exists());
}

#[test]
fn test_write_fault_is_retried() {
    let dir = TempDir::new().unwrap();
    let ns = namespace();
    let members: Vec<_> = (0..2).map(|i| enroll(&ns, i, &payload(i, 500))).collect();
    let sinks = Arc::new(FaultySinks::new(2));
    let builder = ArchiveBuilder::new(
        dir.path(),
        ns.clone(),
        sinks.clone(),
        ChecksumAlgorithm::Crc32,
        3,
    );

    let built = builder.build(5, 9, "", &members).unwrap();

    assert_eq!(sinks.created.load(Ordering::SeqCst), 3);
    assert_eq!(built.archive.unwrap().manifest.len(), 2);
    ArchiveReader::open(&built.path).unwrap();
}

#[test]
fn test_write_faults_exhaust_attempts() {
    let dir = TempDir::new().unwrap();
    let ns = namespace();
    let members = vec![enroll(&ns, 0, &payload(0, 500))];
    let builder = ArchiveBuilder::new(
        dir.path(),
        ns.clone(),
        Arc::new(FaultySinks::new(10)),
        ChecksumAlgorithm::Crc32,
        2,
    );

    let err = builder.build(5, 9, "", &members).unwrap_err();

    assert!(matches!(err, PackError::BuildFailure { bin_id: 5, .. }));
    assert!(!dir.path().join("archive_000000000009.sfa").exists());
}
