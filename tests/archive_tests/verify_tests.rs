use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::sync::Arc;

use smallpack::archive::{ArchiveBuilder, BuiltArchive, FileSinkFactory};
use smallpack::checksum::ChecksumAlgorithm;
use smallpack::error::PackError;
use smallpack::verify::{VerificationLevel, Verifier};
use tempfile::TempDir;

use crate::{enroll, namespace, payload};

fn build(dir: &TempDir, count: usize) -> BuiltArchive {
    let ns = namespace();
    let members: Vec<_> = (0..count).map(|i| enroll(&ns, i, &payload(i, 300))).collect();
    ArchiveBuilder::new(
        dir.path(),
        ns,
        Arc::new(FileSinkFactory),
        ChecksumAlgorithm::Sha256,
        1,
    )
    .build(1, 1, "", &members)
    .unwrap()
}

fn check(built: &BuiltArchive, level: VerificationLevel) -> Result<(), PackError> {
    let archive = built.archive.as_ref().unwrap();
    Verifier::new().verify(&built.path, archive, &built.included, level)
}

#[test]
fn test_intact_container_passes_every_level() {
    let dir = TempDir::new().unwrap();
    let built = build(&dir, 4);

    for level in [
        VerificationLevel::Off,
        VerificationLevel::Filelist,
        VerificationLevel::Chksum,
    ] {
        check(&built, level).unwrap();
    }
}

#[test]
fn test_flipped_member_byte_caught_only_by_chksum() {
    let dir = TempDir::new().unwrap();
    let built = build(&dir, 2);
    let offset = built.archive.as_ref().unwrap().manifest[1].offset;

    let mut file = OpenOptions::new().write(true).open(&built.path).unwrap();
    file.seek(SeekFrom::Start(offset + 5)).unwrap();
    file.write_all(&[0xFF ^ payload(1, 300)[5]]).unwrap();
    drop(file);

    check(&built, VerificationLevel::Filelist).unwrap();
    assert!(matches!(
        check(&built, VerificationLevel::Chksum),
        Err(PackError::VerificationFailure { archive_id: 1, .. })
    ));
}

#[test]
fn test_truncation_caught_by_filelist() {
    let dir = TempDir::new().unwrap();
    let built = build(&dir, 2);
    let size = fs::metadata(&built.path).unwrap().len();

    let file = OpenOptions::new().write(true).open(&built.path).unwrap();
    file.set_len(size - 1).unwrap();
    drop(file);

    check(&built, VerificationLevel::Off).unwrap();
    assert!(check(&built, VerificationLevel::Filelist).is_err());
}

#[test]
fn test_missing_member_caught_by_filelist() {
    let dir = TempDir::new().unwrap();
    let mut built = build(&dir, 3);
    let extra = built.included[0].clone();
    built.included.push(extra);

    assert!(check(&built, VerificationLevel::Filelist).is_err());
}

#[test]
fn test_wrong_enrollment_size_caught_by_filelist() {
    let dir = TempDir::new().unwrap();
    let mut built = build(&dir, 2);
    built.included[0].size += 1;

    assert!(check(&built, VerificationLevel::Filelist).is_err());
}
