//! Journal Module
//!
//! Append-only, checksummed operation log. The Bin State Store journals
//! enrollments and bin transitions through it; the Bookkeeping Store
//! journals archive records. Both rebuild their state by replaying it.
//!
//! ## Responsibilities
//! - Append log entries before any in-memory mutation
//! - CRC32 checksums for corruption detection
//! - Log Sequence Numbers (LSN) for ordering
//! - Crash recovery and replay
//! - Compaction by atomic rewrite
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2                                 │
//! │ ┌─────────┬─────────┬────────┬────────┐ │
//! │ │ LSN (8) │ CRC (4) │Len (4) │ Data   │ │
//! │ └─────────┴─────────┴────────┴────────┘ │
//! └─────────────────────────────────────────┘
//! ```
//! Data is the bincode encoding of `(timestamp, operation)`.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{JournalEntry, HEADER_SIZE, MAX_ENTRY_SIZE};
pub use reader::{JournalIterator, JournalReader};
pub use recovery::{JournalRecovery, RecoveryResult};
pub use writer::JournalWriter;
