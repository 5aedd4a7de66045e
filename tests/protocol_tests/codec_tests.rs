//! Codec Tests
//!
//! Tests for command and response encoding/decoding.

use std::io::Cursor;

use smallpack::error::PackError;
use smallpack::protocol::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, Command, Response, Status, HEADER_SIZE,
    MAX_PAYLOAD_SIZE,
};
use smallpack::FileRecord;

fn store_command() -> Command {
    Command::Store {
        record: FileRecord::new("000A7B3C", "/data/exp1/run7/evt.dat")
            .with_group("exp1")
            .with_class("tape"),
    }
}

// =============================================================================
// Command Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_store_wire_layout() {
    let encoded = encode_command(&store_command());

    assert_eq!(encoded[0], 0x01);
    let len = u32::from_be_bytes([encoded[1], encoded[2], encoded[3], encoded[4]]) as usize;
    assert_eq!(encoded.len(), HEADER_SIZE + len);
    // First field: file id, length-prefixed
    assert_eq!(&encoded[5..9], &8u32.to_be_bytes());
    assert_eq!(&encoded[9..17], b"000A7B3C");
}

#[test]
fn test_store_preserves_every_field() {
    let decoded = decode_command(&encode_command(&store_command())).unwrap();
    assert_eq!(decoded, store_command());
}

#[test]
fn test_store_without_tags() {
    let cmd = Command::Store {
        record: FileRecord::new("1", "/a/b"),
    };
    let encoded = encode_command(&cmd);

    // Absent tags are marked, not sent as empty strings
    assert_eq!(&encoded[encoded.len() - 8..], &[0xFF; 8]);
    match decode_command(&encoded).unwrap() {
        Command::Store { record } => {
            assert_eq!(record.storage_group, None);
            assert_eq!(record.storage_class, None);
        }
        other => panic!("Expected STORE command, got {:?}", other),
    }
}

#[test]
fn test_empty_tag_differs_from_absent_tag() {
    let cmd = Command::Store {
        record: FileRecord::new("1", "/a/b").with_group(""),
    };
    match decode_command(&encode_command(&cmd)).unwrap() {
        Command::Store { record } => assert_eq!(record.storage_group.as_deref(), Some("")),
        other => panic!("Expected STORE command, got {:?}", other),
    }
}

#[test]
fn test_restore_remove_locate() {
    let cmds = vec![
        Command::Restore {
            file_id: "42".to_string(),
            dest: "/restore/here.dat".to_string(),
        },
        Command::Remove {
            file_id: "42".to_string(),
        },
        Command::Locate {
            file_id: "42".to_string(),
        },
    ];
    for cmd in cmds {
        assert_eq!(decode_command(&encode_command(&cmd)).unwrap(), cmd);
    }
}

#[test]
fn test_status_and_ping_have_empty_payload() {
    assert_eq!(encode_command(&Command::Status), vec![0x05, 0, 0, 0, 0]);
    assert_eq!(encode_command(&Command::Ping), vec![0x06, 0, 0, 0, 0]);
}

#[test]
fn test_unknown_command_type() {
    let err = decode_command(&[0x7F, 0, 0, 0, 0]).unwrap_err();
    assert!(matches!(err, PackError::Protocol(_)));
}

#[test]
fn test_incomplete_header() {
    assert!(decode_command(&[0x01, 0, 0]).is_err());
}

#[test]
fn test_incomplete_payload() {
    let encoded = encode_command(&store_command());
    assert!(decode_command(&encoded[..encoded.len() - 3]).is_err());
}

#[test]
fn test_missing_required_field() {
    // REMOVE whose file id is marked absent
    let bytes = [0x03, 0, 0, 0, 4, 0xFF, 0xFF, 0xFF, 0xFF];
    assert!(matches!(decode_command(&bytes), Err(PackError::Protocol(_))));
}

#[test]
fn test_trailing_bytes_rejected() {
    let mut encoded = encode_command(&Command::Remove {
        file_id: "x".to_string(),
    });
    encoded.push(0);
    encoded[4] += 1;

    assert!(decode_command(&encoded).is_err());
}

#[test]
fn test_non_utf8_field_rejected() {
    let bytes = [0x04, 0, 0, 0, 6, 0, 0, 0, 2, 0xC3, 0x28];
    assert!(decode_command(&bytes).is_err());
}

#[test]
fn test_oversized_payload_rejected() {
    let len = (MAX_PAYLOAD_SIZE + 1).to_be_bytes();
    let bytes = [0x06, len[0], len[1], len[2], len[3]];

    assert!(decode_command(&bytes).is_err());
    assert!(read_command(&mut Cursor::new(bytes.to_vec())).is_err());
}

// =============================================================================
// Response Encoding/Decoding Tests
// =============================================================================

#[test]
fn test_response_statuses() {
    let responses = vec![
        Response::ok(Some(b"17".to_vec())),
        Response::ok(None),
        Response::not_found(),
        Response::error("boom"),
        Response::deferred("mount stalled"),
        Response::unmatched(),
    ];
    for response in responses {
        assert_eq!(decode_response(&encode_response(&response)).unwrap(), response);
    }
}

#[test]
fn test_response_text() {
    assert_eq!(Response::deferred("mount stalled").text(), "mount stalled");
    assert_eq!(Response::unmatched().text(), "");
}

#[test]
fn test_unknown_status_rejected() {
    assert!(decode_response(&[0x09, 0, 0, 0, 0]).is_err());
}

#[test]
fn test_status_byte_mapping() {
    assert_eq!(Status::from_byte(0x03), Some(Status::Deferred));
    assert_eq!(Status::from_byte(0x04), Some(Status::Unmatched));
    assert_eq!(Status::from_byte(0x05), None);
}

// =============================================================================
// Stream I/O Tests
// =============================================================================

#[test]
fn test_stream_carries_consecutive_frames() {
    let mut buf = Vec::new();
    write_command(&mut buf, &store_command()).unwrap();
    write_command(&mut buf, &Command::Ping).unwrap();
    write_response(&mut buf, &Response::deferred("later")).unwrap();

    let mut cursor = Cursor::new(buf);
    assert_eq!(read_command(&mut cursor).unwrap(), store_command());
    assert_eq!(read_command(&mut cursor).unwrap(), Command::Ping);
    assert_eq!(read_response(&mut cursor).unwrap(), Response::deferred("later"));
}

#[test]
fn test_stream_eof_is_io_error() {
    let mut cursor = Cursor::new(vec![0x01, 0, 0]);
    assert!(matches!(read_command(&mut cursor), Err(PackError::Io(_))));
}
