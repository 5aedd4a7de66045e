use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};

use smallpack::archive::{ArchiveReader, ArchiveWriter, FileSink};
use smallpack::checksum::ChecksumAlgorithm;
use smallpack::error::PackError;
use tempfile::TempDir;

use crate::payload;

fn write_container(path: &std::path::Path, members: &[(&str, Vec<u8>)]) -> u64 {
    let sink = FileSink::create(path).unwrap();
    let mut writer = ArchiveWriter::new(sink, ChecksumAlgorithm::Md5).unwrap();
    for (name, data) in members {
        writer.add_member(name, data).unwrap();
    }
    writer.finish().unwrap().1
}

#[test]
fn test_reader_serves_every_member() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    let members = vec![
        ("alpha", payload(1, 1200)),
        ("beta", payload(2, 0)),
        ("gamma", payload(3, 77)),
    ];
    let size = write_container(&path, &members);

    assert_eq!(fs::metadata(&path).unwrap().len(), size);

    let mut reader = ArchiveReader::open(&path).unwrap();
    assert_eq!(reader.manifest().len(), 3);
    assert_eq!(reader.file_size(), size);
    for (name, data) in &members {
        assert_eq!(&reader.read_member(name).unwrap(), data);
        assert_eq!(reader.entry(name).unwrap().checksum, ChecksumAlgorithm::Md5.digest(data));
    }
    reader.check_data_crc().unwrap();
}

#[test]
fn test_manifest_offsets_match_member_frames() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    write_container(&path, &[("one", payload(1, 10)), ("two", payload(2, 20))]);

    let mut reader = ArchiveReader::open(&path).unwrap();
    let manifest = reader.manifest().to_vec();
    let frames: Vec<_> = reader.members().unwrap().map(|f| f.unwrap()).collect();

    assert_eq!(frames.len(), 2);
    for (frame, entry) in frames.iter().zip(&manifest) {
        assert_eq!(frame.name, entry.name);
        assert_eq!(frame.offset, entry.offset);
        assert_eq!(frame.length, entry.length);
    }
    // Header (8) + frame header (12) + "one"
    assert_eq!(manifest[0].offset, 23);
    assert_eq!(reader.data_end(), manifest[1].offset + 20);
}

#[test]
fn test_unknown_member_is_not_found() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    write_container(&path, &[("one", payload(1, 10))]);

    let mut reader = ArchiveReader::open(&path).unwrap();
    assert!(matches!(reader.read_member("two"), Err(PackError::NotFound(_))));
}

#[test]
fn test_duplicate_member_rejected() {
    let dir = TempDir::new().unwrap();
    let sink = FileSink::create(&dir.path().join("a.sfa")).unwrap();
    let mut writer = ArchiveWriter::new(sink, ChecksumAlgorithm::Crc32).unwrap();

    writer.add_member("one", b"x").unwrap();
    assert!(matches!(writer.add_member("one", b"y"), Err(PackError::Archive(_))));
    assert_eq!(writer.member_count(), 1);
}

#[test]
fn test_bad_magic_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    write_container(&path, &[("one", payload(1, 10))]);

    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = b'X';
    fs::write(&path, &bytes).unwrap();

    assert!(ArchiveReader::open(&path).is_err());
}

#[test]
fn test_truncated_container_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    let size = write_container(&path, &[("one", payload(1, 100))]);

    let file = OpenOptions::new().write(true).open(&path).unwrap();
    file.set_len(size - 10).unwrap();
    drop(file);

    assert!(ArchiveReader::open(&path).is_err());
}

#[test]
fn test_corrupt_manifest_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    let size = write_container(&path, &[("one", payload(1, 100))]);

    let mut bytes = fs::read(&path).unwrap();
    // Last manifest byte sits right before the footer
    let idx = size as usize - 24 - 1;
    bytes[idx] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    assert!(ArchiveReader::open(&path).is_err());
}

#[test]
fn test_flipped_data_byte_fails_data_crc() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("a.sfa");
    write_container(&path, &[("one", payload(1, 100))]);

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(30)).unwrap();
    file.write_all(&[0xEE]).unwrap();
    drop(file);

    let mut reader = ArchiveReader::open(&path).unwrap();
    assert!(reader.check_data_crc().is_err());
}
