//! Command definitions
//!
//! Represents host calls.

use crate::record::FileRecord;

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Store = 0x01,
    Restore = 0x02,
    Remove = 0x03,
    Locate = 0x04,
    Status = 0x05,
    Ping = 0x06,
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Hand a newly written small file to the packer
    Store { record: FileRecord },

    /// Write a packed file's bytes to `dest` on the packer's host
    Restore { file_id: String, dest: String },

    /// Withdraw a file, or forget its packed mapping
    Remove { file_id: String },

    /// Locator URI of a packed file
    Locate { file_id: String },

    /// Engine counters
    Status,

    /// Ping (health check)
    Ping,
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Store { .. } => CommandType::Store,
            Command::Restore { .. } => CommandType::Restore,
            Command::Remove { .. } => CommandType::Remove,
            Command::Locate { .. } => CommandType::Locate,
            Command::Status => CommandType::Status,
            Command::Ping => CommandType::Ping,
        }
    }
}
