//! Response definitions
//!
//! Represents responses to the host.

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    /// File could not be read; the packer retries it later
    Deferred = 0x03,
    /// No bin definition matches; the file stays unpacked
    Unmatched = 0x04,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::NotFound),
            0x02 => Some(Status::Error),
            0x03 => Some(Status::Deferred),
            0x04 => Some(Status::Unmatched),
            _ => None,
        }
    }
}

/// A response to send to the host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code
    pub status: Status,

    /// Optional payload (bin id, locator, restored path, status text, error message)
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// Create a NOT_FOUND response
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            payload: None,
        }
    }

    /// Create an ERROR response
    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    pub fn deferred(reason: &str) -> Self {
        Self {
            status: Status::Deferred,
            payload: Some(reason.as_bytes().to_vec()),
        }
    }

    pub fn unmatched() -> Self {
        Self {
            status: Status::Unmatched,
            payload: None,
        }
    }

    /// Payload as UTF-8 text (lossy), empty when absent
    pub fn text(&self) -> String {
        self.payload
            .as_deref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    }
}
