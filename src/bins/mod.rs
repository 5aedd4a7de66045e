//! Bin State Store Module
//!
//! Durable record of open bins, their membership and the deferred queue.
//!
//! ## Responsibilities
//! - Enroll files into the current bin of a definition (one current bin per
//!   definition, created lazily so empty bins never exist)
//! - Move a bin from `Open` to `Flushing` exactly once
//! - Journal every mutation before applying it
//! - Rebuild all of the above after a restart
//!
//! ## Locking
//! One mutex guards the journal and the table together. Enrollment and the
//! flush transition are therefore serialized, which is what makes
//! `begin_flush` a compare-and-swap.

mod state;

use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;

pub use state::{BinId, BinLifecycle, BinOp, BinState, DeferredFile};

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{PackError, Result};
use crate::journal::{JournalRecovery, JournalWriter, RecoveryResult};
use crate::record::{EnrolledFile, FileRecord};
use crate::retry::RetryPolicy;

use state::BinTable;

/// What a restart found in the bin journal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinRecovery {
    pub open_bins: usize,
    /// Bins that were mid-flush and will be rebuilt
    pub flushing_bins: usize,
    pub members: usize,
    pub deferred: usize,
    /// Members dropped because bookkeeping already records them as packed
    pub already_packed: usize,
    pub journal: Option<RecoveryResult>,
}

struct Inner {
    journal: JournalWriter<BinOp>,
    table: BinTable,
}

/// Journal-backed Bin State Store
pub struct BinStateStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    compact_threshold: u64,
}

impl BinStateStore {
    /// Open the store, replaying the journal at `config.journal_path()`
    ///
    /// `is_packed` tells whether bookkeeping already maps a file id to an
    /// archive; such members are dropped from recovered bins.
    pub fn open<F>(config: &Config, clock: Arc<dyn Clock>, is_packed: F) -> Result<(Self, BinRecovery)>
    where
        F: Fn(&str) -> bool,
    {
        std::fs::create_dir_all(&config.working_dir)?;
        let path = config.journal_path();

        let mut table = BinTable::new();
        let mut recovery = BinRecovery::default();

        if path.exists() {
            let (entries, result) = JournalRecovery::recover::<BinOp>(&path)?;
            for entry in &entries {
                table.apply(&entry.op);
            }
            recovery.journal = Some(result);
        }

        recovery.already_packed = sanitize(&mut table, &is_packed);

        for bin in table.bins.values() {
            match bin.lifecycle {
                BinLifecycle::Open => recovery.open_bins += 1,
                _ => recovery.flushing_bins += 1,
            }
            recovery.members += bin.members.len();
        }
        recovery.deferred = table.deferred.len();

        let mut journal = JournalWriter::open(&path, config.journal_sync_strategy)?;
        journal.rewrite(table.snapshot_ops())?;

        if recovery.journal.is_some() {
            tracing::info!(
                "Bin store recovered: {} open, {} mid-flush, {} members, {} deferred, {} already packed",
                recovery.open_bins,
                recovery.flushing_bins,
                recovery.members,
                recovery.deferred,
                recovery.already_packed
            );
        }

        Ok((
            Self {
                inner: Mutex::new(Inner { journal, table }),
                clock,
                retry: config.retry,
                compact_threshold: config.journal_compact_threshold,
            },
            recovery,
        ))
    }

    // -------------------------------------------------------------------------
    // Enrollment
    // -------------------------------------------------------------------------

    /// Add `file` to the current bin of `definition`
    ///
    /// Opens a new bin when the definition has no open one. Enrolling a file
    /// that already sits in a bin returns that bin and changes nothing.
    pub fn enroll(&self, definition: &str, file: EnrolledFile) -> Result<BinId> {
        let mut inner = self.inner.lock();

        if let Some(&bin_id) = inner.table.index.get(file.file_id()) {
            return Ok(bin_id);
        }
        self.enroll_locked(&mut inner, definition, file)
    }

    /// Enroll `file` unless `is_packed` says an archive already holds it
    ///
    /// Returns `None` for a packed file. `is_packed` runs under the store
    /// lock; a flush records its archive before clearing the bin, so a file
    /// missing from every bin here is either unpacked or visible to
    /// `is_packed`.
    pub fn enroll_unpacked<F>(
        &self,
        definition: &str,
        file: EnrolledFile,
        is_packed: F,
    ) -> Result<Option<BinId>>
    where
        F: FnOnce(&str) -> Result<bool>,
    {
        let mut inner = self.inner.lock();

        if let Some(&bin_id) = inner.table.index.get(file.file_id()) {
            return Ok(Some(bin_id));
        }
        if is_packed(file.file_id())? {
            return Ok(None);
        }
        self.enroll_locked(&mut inner, definition, file).map(Some)
    }

    fn enroll_locked(&self, inner: &mut Inner, definition: &str, file: EnrolledFile) -> Result<BinId> {
        let current = inner
            .table
            .current
            .get(definition)
            .copied()
            .filter(|id| {
                inner
                    .table
                    .bins
                    .get(id)
                    .map_or(false, |bin| bin.lifecycle == BinLifecycle::Open)
            });

        let bin_id = match current {
            Some(id) => id,
            None => {
                let bin_id = inner.table.next_bin_id;
                self.commit(
                    inner,
                    BinOp::BinOpened {
                        bin_id,
                        definition: definition.to_string(),
                        created_at: self.clock.now_millis(),
                    },
                )?;
                tracing::info!("Opened bin {} for [{}]", bin_id, definition);
                bin_id
            }
        };

        let file_id = file.file_id().to_string();
        self.commit(inner, BinOp::Enrolled { bin_id, file })?;
        tracing::debug!("Enrolled {} into bin {} [{}]", file_id, bin_id, definition);

        self.maybe_compact(inner)?;
        Ok(bin_id)
    }

    /// Take `file_id` out of its open bin
    ///
    /// Returns the bin it left, or `None` if no bin holds it. Refuses with
    /// `Busy` while the bin is being flushed.
    pub fn withdraw(&self, file_id: &str) -> Result<Option<BinId>> {
        let mut inner = self.inner.lock();

        let bin_id = match inner.table.index.get(file_id) {
            Some(&id) => id,
            None => return Ok(None),
        };
        let (lifecycle, remaining) = match inner.table.bins.get(&bin_id) {
            Some(bin) => (bin.lifecycle, bin.members.len() - 1),
            None => return Ok(None),
        };
        if lifecycle != BinLifecycle::Open {
            return Err(PackError::Busy(format!(
                "{} belongs to bin {} which is being flushed",
                file_id, bin_id
            )));
        }

        self.commit(
            &mut inner,
            BinOp::Withdrawn {
                bin_id,
                file_id: file_id.to_string(),
            },
        )?;
        if remaining == 0 {
            self.commit(&mut inner, BinOp::BinCleared { bin_id })?;
        }

        tracing::info!("Withdrew {} from bin {}", file_id, bin_id);
        Ok(Some(bin_id))
    }

    // -------------------------------------------------------------------------
    // Flush Lifecycle
    // -------------------------------------------------------------------------

    /// Move an open bin to `Flushing`
    ///
    /// Returns `false` if the bin is not open (someone else won the race).
    /// The definition has no current bin afterwards; the next enrollment
    /// opens one.
    pub fn begin_flush(&self, bin_id: BinId) -> Result<bool> {
        let mut inner = self.inner.lock();

        match inner.table.bins.get(&bin_id) {
            Some(bin) if bin.lifecycle == BinLifecycle::Open => {}
            _ => return Ok(false),
        }

        self.commit(&mut inner, BinOp::FlushStarted { bin_id })?;
        Ok(true)
    }

    /// Note that the bin's container is under verification
    pub fn mark_verifying(&self, bin_id: BinId) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.table.bins.get_mut(&bin_id) {
            Some(bin) if bin.lifecycle != BinLifecycle::Open => {
                bin.lifecycle = BinLifecycle::Verifying;
                Ok(())
            }
            Some(_) => Err(PackError::Busy(format!("bin {} is still open", bin_id))),
            None => Err(PackError::NotFound(format!("bin {}", bin_id))),
        }
    }

    /// Hand one member of a flushing bin back for re-enrollment
    pub fn release(&self, bin_id: BinId, file: &EnrolledFile, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock();
        self.release_locked(&mut inner, bin_id, file, reason)
    }

    /// Discard a bin whose archive failed; every member is released
    pub fn fail(&self, bin_id: BinId, reason: &str) -> Result<usize> {
        let mut inner = self.inner.lock();

        let members = match inner.table.bins.get(&bin_id) {
            Some(bin) => bin.members.clone(),
            None => return Err(PackError::NotFound(format!("bin {}", bin_id))),
        };
        for file in &members {
            self.release_locked(&mut inner, bin_id, file, reason)?;
        }
        self.commit(&mut inner, BinOp::BinCleared { bin_id })?;

        tracing::warn!("Bin {} failed, {} members released: {}", bin_id, members.len(), reason);
        Ok(members.len())
    }

    /// Discard a packed bin
    pub fn clear(&self, bin_id: BinId) -> Result<()> {
        let mut inner = self.inner.lock();
        if !inner.table.bins.contains_key(&bin_id) {
            return Err(PackError::NotFound(format!("bin {}", bin_id)));
        }
        self.commit(&mut inner, BinOp::BinCleared { bin_id })?;
        self.maybe_compact(&mut inner)
    }

    fn release_locked(
        &self,
        inner: &mut Inner,
        bin_id: BinId,
        file: &EnrolledFile,
        reason: &str,
    ) -> Result<()> {
        self.commit(
            inner,
            BinOp::Withdrawn {
                bin_id,
                file_id: file.file_id().to_string(),
            },
        )?;
        self.commit(
            inner,
            BinOp::Deferred {
                file: DeferredFile {
                    record: file.record.clone(),
                    attempts: 0,
                    reason: reason.to_string(),
                },
            },
        )
    }

    // -------------------------------------------------------------------------
    // Deferred Queue
    // -------------------------------------------------------------------------

    /// Queue a file whose enrollment failed; bumps its attempt count
    pub fn defer(&self, record: &FileRecord, reason: &str) -> Result<DeferredFile> {
        let mut inner = self.inner.lock();

        let attempts = inner
            .table
            .deferred
            .get(&record.file_id)
            .map_or(0, |d| d.attempts)
            + 1;
        let file = DeferredFile {
            record: record.clone(),
            attempts,
            reason: reason.to_string(),
        };

        self.commit(&mut inner, BinOp::Deferred { file: file.clone() })?;
        self.maybe_compact(&mut inner)?;
        Ok(file)
    }

    /// Drop a file from the deferred queue; `false` if it was not queued
    pub fn undefer(&self, file_id: &str) -> Result<bool> {
        let mut inner = self.inner.lock();
        if !inner.table.deferred.contains_key(file_id) {
            return Ok(false);
        }
        self.commit(
            &mut inner,
            BinOp::DeferredDropped {
                file_id: file_id.to_string(),
            },
        )?;
        Ok(true)
    }

    pub fn deferred(&self) -> Vec<DeferredFile> {
        self.inner.lock().table.deferred.values().cloned().collect()
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn snapshot(&self, bin_id: BinId) -> Result<BinState> {
        self.inner
            .lock()
            .table
            .bins
            .get(&bin_id)
            .cloned()
            .ok_or_else(|| PackError::NotFound(format!("bin {}", bin_id)))
    }

    /// All live bins, by id
    pub fn bins(&self) -> Vec<BinState> {
        self.inner.lock().table.bins.values().cloned().collect()
    }

    /// Bins still accepting files
    pub fn open_bins(&self) -> Vec<BinState> {
        self.bins_where(|bin| bin.lifecycle == BinLifecycle::Open)
    }

    /// Bins handed to the builder but not yet packed or failed
    pub fn flushing_bins(&self) -> Vec<BinState> {
        self.bins_where(|bin| bin.lifecycle != BinLifecycle::Open)
    }

    /// Current bin of a definition
    pub fn current_bin(&self, definition: &str) -> Option<BinId> {
        self.inner.lock().table.current.get(definition).copied()
    }

    /// Bin holding `file_id`
    pub fn bin_of(&self, file_id: &str) -> Option<BinId> {
        self.inner.lock().table.index.get(file_id).copied()
    }

    pub fn is_deferred(&self, file_id: &str) -> bool {
        self.inner.lock().table.deferred.contains_key(file_id)
    }

    /// Force the journal to disk
    pub fn sync(&self) -> Result<()> {
        self.inner.lock().journal.sync()
    }

    pub fn journal_entry_count(&self) -> u64 {
        self.inner.lock().journal.entry_count()
    }

    pub fn journal_path(&self) -> PathBuf {
        self.inner.lock().journal.path().to_path_buf()
    }

    fn bins_where<P: Fn(&BinState) -> bool>(&self, predicate: P) -> Vec<BinState> {
        self.inner
            .lock()
            .table
            .bins
            .values()
            .filter(|bin| predicate(bin))
            .cloned()
            .collect()
    }

    // -------------------------------------------------------------------------
    // Journal Plumbing
    // -------------------------------------------------------------------------

    /// Journal `op`, then apply it
    fn commit(&self, inner: &mut Inner, op: BinOp) -> Result<()> {
        let journal = &mut inner.journal;
        self.retry.run("bin journal append", || journal.append(op.clone()))?;
        inner.table.apply(&op);
        Ok(())
    }

    fn maybe_compact(&self, inner: &mut Inner) -> Result<()> {
        if self.compact_threshold == 0 || inner.journal.entry_count() < self.compact_threshold {
            return Ok(());
        }

        let before = inner.journal.entry_count();
        let ops = inner.table.snapshot_ops();
        let journal = &mut inner.journal;
        self.retry.run("bin journal compaction", || journal.rewrite(ops.clone()))?;

        tracing::info!(
            "Compacted bin journal {}: {} -> {} entries",
            journal.path().display(),
            before,
            journal.entry_count()
        );
        Ok(())
    }
}

/// Drop members bookkeeping already knows as packed; returns how many
fn sanitize<F: Fn(&str) -> bool>(table: &mut BinTable, is_packed: &F) -> usize {
    let mut ops = Vec::new();

    for bin in table.bins.values() {
        let packed: Vec<_> = bin
            .members
            .iter()
            .filter(|file| is_packed(file.file_id()))
            .map(|file| file.file_id().to_string())
            .collect();

        let emptied = packed.len() == bin.members.len();
        for file_id in packed {
            ops.push(BinOp::Withdrawn {
                bin_id: bin.bin_id,
                file_id,
            });
        }
        if emptied {
            ops.push(BinOp::BinCleared { bin_id: bin.bin_id });
        }
    }

    for file_id in table.deferred.keys() {
        if is_packed(file_id) {
            ops.push(BinOp::DeferredDropped {
                file_id: file_id.clone(),
            });
        }
    }

    let dropped = ops
        .iter()
        .filter(|op| matches!(op, BinOp::Withdrawn { .. } | BinOp::DeferredDropped { .. }))
        .count();
    for op in &ops {
        table.apply(op);
    }
    dropped
}

impl std::fmt::Debug for BinStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BinStateStore")
            .field("bins", &inner.table.bins.len())
            .field("deferred", &inner.table.deferred.len())
            .field("journal", &inner.journal.path())
            .finish()
    }
}

