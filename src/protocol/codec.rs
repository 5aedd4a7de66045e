//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Payload by Command Type
//! Every field is `len (4 bytes) + UTF-8 bytes`; an optional field that is
//! absent has `len = 0xFFFFFFFF` and no bytes.
//! - STORE:   file_id, path, storage_group?, storage_class?
//! - RESTORE: file_id, dest
//! - REMOVE:  file_id
//! - LOCATE:  file_id
//! - STATUS:  empty
//! - PING:    empty
//!
//! ### Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```

use std::io::{Read, Write};

use crate::error::{PackError, Result};
use crate::record::FileRecord;

use super::{Command, Response, Status};

/// Header size: 1 byte command/status + 4 bytes length
pub const HEADER_SIZE: usize = 5;

/// Maximum payload size (16 MB)
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;

/// Length marker of an absent optional field
const ABSENT: u32 = u32::MAX;

// =============================================================================
// Command Encoding/Decoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: cmd_type (1) + payload_len (4) + payload
pub fn encode_command(command: &Command) -> Vec<u8> {
    let mut payload = Vec::new();
    match command {
        Command::Store { record } => {
            put_str(&mut payload, &record.file_id);
            put_str(&mut payload, &record.path);
            put_opt_str(&mut payload, record.storage_group.as_deref());
            put_opt_str(&mut payload, record.storage_class.as_deref());
        }
        Command::Restore { file_id, dest } => {
            put_str(&mut payload, file_id);
            put_str(&mut payload, dest);
        }
        Command::Remove { file_id } | Command::Locate { file_id } => {
            put_str(&mut payload, file_id);
        }
        Command::Status | Command::Ping => {}
    }

    frame(command.command_type() as u8, &payload)
}

/// Decode a command from bytes
pub fn decode_command(bytes: &[u8]) -> Result<Command> {
    let (cmd_type, payload) = unframe(bytes, "command")?;
    let mut fields = Fields::new(payload);

    let command = match cmd_type {
        0x01 => {
            let file_id = fields.string("STORE", "file_id")?;
            let path = fields.string("STORE", "path")?;
            let storage_group = fields.opt_string("STORE", "storage_group")?;
            let storage_class = fields.opt_string("STORE", "storage_class")?;
            Command::Store {
                record: FileRecord {
                    file_id,
                    path,
                    storage_group,
                    storage_class,
                },
            }
        }
        0x02 => Command::Restore {
            file_id: fields.string("RESTORE", "file_id")?,
            dest: fields.string("RESTORE", "dest")?,
        },
        0x03 => Command::Remove {
            file_id: fields.string("REMOVE", "file_id")?,
        },
        0x04 => Command::Locate {
            file_id: fields.string("LOCATE", "file_id")?,
        },
        0x05 => Command::Status,
        0x06 => Command::Ping,
        _ => {
            return Err(PackError::Protocol(format!(
                "Unknown command type: 0x{:02x}",
                cmd_type
            )))
        }
    };

    fields.finish(cmd_type)?;
    Ok(command)
}

// =============================================================================
// Response Encoding/Decoding
// =============================================================================

/// Encode a response to bytes
///
/// Format: status (1) + payload_len (4) + payload
pub fn encode_response(response: &Response) -> Vec<u8> {
    let payload = response.payload.as_deref().unwrap_or(&[]);
    frame(response.status as u8, payload)
}

/// Decode a response from bytes
pub fn decode_response(bytes: &[u8]) -> Result<Response> {
    let (status_byte, payload) = unframe(bytes, "response")?;

    let status = Status::from_byte(status_byte).ok_or_else(|| {
        PackError::Protocol(format!("Unknown response status: 0x{:02x}", status_byte))
    })?;

    let payload = if payload.is_empty() {
        None
    } else {
        Some(payload.to_vec())
    };

    Ok(Response { status, payload })
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Read a complete command from a stream
///
/// Blocks until a complete command is received or an error occurs
pub fn read_command<R: Read>(reader: &mut R) -> Result<Command> {
    decode_command(&read_frame(reader)?)
}

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    writer.write_all(&encode_command(command))?;
    writer.flush()?;
    Ok(())
}

/// Read a complete response from a stream
pub fn read_response<R: Read>(reader: &mut R) -> Result<Response> {
    decode_response(&read_frame(reader)?)
}

/// Write a response to a stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> Result<()> {
    writer.write_all(&encode_response(response))?;
    writer.flush()?;
    Ok(())
}

fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header)?;

    let payload_len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(PackError::Protocol(format!(
            "Payload too large: {} bytes (max {})",
            payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let mut message = vec![0u8; HEADER_SIZE + payload_len as usize];
    message[..HEADER_SIZE].copy_from_slice(&header);
    reader.read_exact(&mut message[HEADER_SIZE..])?;
    Ok(message)
}

// =============================================================================
// Framing & Fields
// =============================================================================

fn frame(kind: u8, payload: &[u8]) -> Vec<u8> {
    let mut message = Vec::with_capacity(HEADER_SIZE + payload.len());
    message.push(kind);
    message.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    message.extend_from_slice(payload);
    message
}

fn unframe<'a>(bytes: &'a [u8], what: &str) -> Result<(u8, &'a [u8])> {
    if bytes.len() < HEADER_SIZE {
        return Err(PackError::Protocol(format!(
            "Incomplete {} header: expected {} bytes, got {}",
            what,
            HEADER_SIZE,
            bytes.len()
        )));
    }

    let payload_len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(PackError::Protocol(format!(
            "{} payload too large: {} bytes (max {})",
            what, payload_len, MAX_PAYLOAD_SIZE
        )));
    }

    let total_len = HEADER_SIZE + payload_len as usize;
    if bytes.len() < total_len {
        return Err(PackError::Protocol(format!(
            "Incomplete {} payload: expected {} bytes, got {}",
            what,
            total_len,
            bytes.len()
        )));
    }

    Ok((bytes[0], &bytes[HEADER_SIZE..total_len]))
}

fn put_str(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_be_bytes());
    buf.extend_from_slice(value.as_bytes());
}

fn put_opt_str(buf: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(v) => put_str(buf, v),
        None => buf.extend_from_slice(&ABSENT.to_be_bytes()),
    }
}

/// Cursor over length-prefixed payload fields
struct Fields<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Fields<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn opt_string(&mut self, cmd: &str, field: &str) -> Result<Option<String>> {
        if self.bytes.len() < self.pos + 4 {
            return Err(PackError::Protocol(format!(
                "{} command: missing {} length",
                cmd, field
            )));
        }
        let len = u32::from_be_bytes([
            self.bytes[self.pos],
            self.bytes[self.pos + 1],
            self.bytes[self.pos + 2],
            self.bytes[self.pos + 3],
        ]);
        self.pos += 4;

        if len == ABSENT {
            return Ok(None);
        }

        let len = len as usize;
        let available = self.bytes.len() - self.pos;
        if available < len {
            return Err(PackError::Protocol(format!(
                "{} command: incomplete {} (expected {}, got {})",
                cmd, field, len, available
            )));
        }

        let raw = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        String::from_utf8(raw.to_vec())
            .map(Some)
            .map_err(|_| PackError::Protocol(format!("{} command: {} is not UTF-8", cmd, field)))
    }

    fn string(&mut self, cmd: &str, field: &str) -> Result<String> {
        self.opt_string(cmd, field)?
            .ok_or_else(|| PackError::Protocol(format!("{} command: {} is required", cmd, field)))
    }

    fn finish(&self, cmd_type: u8) -> Result<()> {
        if self.pos != self.bytes.len() {
            return Err(PackError::Protocol(format!(
                "Command 0x{:02x}: {} unexpected trailing bytes",
                cmd_type,
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}
