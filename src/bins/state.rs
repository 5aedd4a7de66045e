//! Bin table and its journal operations
//!
//! Every change to the table is one [`BinOp`]. The store journals an op
//! before applying it, and recovery applies the same ops in journal order,
//! so live state and replayed state go through one code path.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::record::{EnrolledFile, FileRecord};

/// Bin identifier, unique for the life of the journal
pub type BinId = u64;

/// Where a live bin is in its lifecycle
///
/// Packed and failed bins are discarded, so they never appear here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinLifecycle {
    /// Current bin for its definition; accepts enrollments
    Open,
    /// Handed to the builder; no longer accepts files
    Flushing,
    /// Container built, verification running
    Verifying,
}

/// Snapshot of one bin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinState {
    pub bin_id: BinId,

    /// Name of the bin definition
    pub definition: String,

    /// Creation time (unix millis)
    pub created_at: u64,

    /// Sum of member sizes
    pub size: u64,

    /// Members in enrollment order
    pub members: Vec<EnrolledFile>,

    pub lifecycle: BinLifecycle,
}

impl BinState {
    pub fn age_millis(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }
}

/// A file waiting to be (re-)enrolled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredFile {
    pub record: FileRecord,

    /// Failed enrollment attempts so far
    pub attempts: u32,

    /// Why it was deferred last
    pub reason: String,
}

/// Journaled mutation of the bin table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// Carries the id counter across compactions
    Checkpoint { next_bin_id: BinId },
    BinOpened { bin_id: BinId, definition: String, created_at: u64 },
    Enrolled { bin_id: BinId, file: EnrolledFile },
    Withdrawn { bin_id: BinId, file_id: String },
    FlushStarted { bin_id: BinId },
    BinCleared { bin_id: BinId },
    Deferred { file: DeferredFile },
    DeferredDropped { file_id: String },
}

/// In-memory bin table
#[derive(Debug, Default)]
pub(crate) struct BinTable {
    pub bins: BTreeMap<BinId, BinState>,
    /// Definition name → current (open) bin
    pub current: HashMap<String, BinId>,
    /// File id → bin holding it
    pub index: HashMap<String, BinId>,
    pub deferred: BTreeMap<String, DeferredFile>,
    pub next_bin_id: BinId,
}

impl BinTable {
    pub fn new() -> Self {
        Self {
            next_bin_id: 1,
            ..Default::default()
        }
    }

    /// Apply one operation; ops naming unknown bins are ignored
    pub fn apply(&mut self, op: &BinOp) {
        match op {
            BinOp::Checkpoint { next_bin_id } => {
                self.next_bin_id = self.next_bin_id.max(*next_bin_id);
            }
            BinOp::BinOpened {
                bin_id,
                definition,
                created_at,
            } => {
                self.bins.insert(
                    *bin_id,
                    BinState {
                        bin_id: *bin_id,
                        definition: definition.clone(),
                        created_at: *created_at,
                        size: 0,
                        members: Vec::new(),
                        lifecycle: BinLifecycle::Open,
                    },
                );
                self.current.insert(definition.clone(), *bin_id);
                self.next_bin_id = self.next_bin_id.max(bin_id + 1);
            }
            BinOp::Enrolled { bin_id, file } => {
                if self.index.contains_key(file.file_id()) {
                    return;
                }
                if let Some(bin) = self.bins.get_mut(bin_id) {
                    bin.size += file.size;
                    bin.members.push(file.clone());
                    self.index.insert(file.file_id().to_string(), *bin_id);
                    self.deferred.remove(file.file_id());
                }
            }
            BinOp::Withdrawn { bin_id, file_id } => {
                if let Some(bin) = self.bins.get_mut(bin_id) {
                    if let Some(pos) = bin.members.iter().position(|f| f.file_id() == file_id) {
                        let file = bin.members.remove(pos);
                        bin.size -= file.size;
                        self.index.remove(file_id);
                    }
                }
            }
            BinOp::FlushStarted { bin_id } => {
                if let Some(bin) = self.bins.get_mut(bin_id) {
                    bin.lifecycle = BinLifecycle::Flushing;
                    if self.current.get(&bin.definition) == Some(bin_id) {
                        self.current.remove(&bin.definition);
                    }
                }
            }
            BinOp::BinCleared { bin_id } => {
                if let Some(bin) = self.bins.remove(bin_id) {
                    for file in &bin.members {
                        self.index.remove(file.file_id());
                    }
                    if self.current.get(&bin.definition) == Some(bin_id) {
                        self.current.remove(&bin.definition);
                    }
                }
            }
            BinOp::Deferred { file } => {
                self.deferred.insert(file.record.file_id.clone(), file.clone());
            }
            BinOp::DeferredDropped { file_id } => {
                self.deferred.remove(file_id);
            }
        }
    }

    /// Minimal op sequence that rebuilds this table
    pub fn snapshot_ops(&self) -> Vec<BinOp> {
        let mut ops = vec![BinOp::Checkpoint {
            next_bin_id: self.next_bin_id,
        }];

        for bin in self.bins.values() {
            ops.push(BinOp::BinOpened {
                bin_id: bin.bin_id,
                definition: bin.definition.clone(),
                created_at: bin.created_at,
            });
            for file in &bin.members {
                ops.push(BinOp::Enrolled {
                    bin_id: bin.bin_id,
                    file: file.clone(),
                });
            }
            if bin.lifecycle != BinLifecycle::Open {
                ops.push(BinOp::FlushStarted { bin_id: bin.bin_id });
            }
        }

        for file in self.deferred.values() {
            ops.push(BinOp::Deferred { file: file.clone() });
        }

        ops
    }
}
