//! Engine counters
//!
//! Monotonic counters bumped by the engine, plus a point-in-time view of
//! the bin table, rendered for the `STATUS` host command.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters since process start
#[derive(Debug, Default)]
pub struct EngineStats {
    pub(crate) files_enrolled: AtomicU64,
    pub(crate) files_unmatched: AtomicU64,
    pub(crate) files_deferred: AtomicU64,
    pub(crate) files_abandoned: AtomicU64,
    pub(crate) archives_packed: AtomicU64,
    pub(crate) bytes_packed: AtomicU64,
    pub(crate) members_lost: AtomicU64,
    pub(crate) build_failures: AtomicU64,
    pub(crate) verification_failures: AtomicU64,
}

impl EngineStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn load(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

/// Counters plus bin table gauges
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub files_enrolled: u64,
    pub files_unmatched: u64,
    pub files_deferred: u64,
    pub files_abandoned: u64,
    pub archives_packed: u64,
    pub bytes_packed: u64,
    pub members_lost: u64,
    pub build_failures: u64,
    pub verification_failures: u64,
    pub open_bins: u64,
    pub flushing_bins: u64,
    pub deferred_queue: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "files_enrolled={}", self.files_enrolled)?;
        writeln!(f, "files_unmatched={}", self.files_unmatched)?;
        writeln!(f, "files_deferred={}", self.files_deferred)?;
        writeln!(f, "files_abandoned={}", self.files_abandoned)?;
        writeln!(f, "archives_packed={}", self.archives_packed)?;
        writeln!(f, "bytes_packed={}", self.bytes_packed)?;
        writeln!(f, "members_lost={}", self.members_lost)?;
        writeln!(f, "build_failures={}", self.build_failures)?;
        writeln!(f, "verification_failures={}", self.verification_failures)?;
        writeln!(f, "open_bins={}", self.open_bins)?;
        writeln!(f, "flushing_bins={}", self.flushing_bins)?;
        write!(f, "deferred_queue={}", self.deferred_queue)
    }
}
