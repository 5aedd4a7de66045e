//! Flush Scheduler Module
//!
//! Evaluated once per loop delay. Each tick moves every due open bin to
//! `Flushing` and returns all bins that need building, including bins that
//! were mid-flush when the process last stopped.

pub mod policy;

use std::sync::Arc;
use std::time::Duration;

pub use policy::{flush_reason, should_flush, FlushReason};

use crate::bins::{BinState, BinStateStore};
use crate::clock::Clock;
use crate::error::Result;
use crate::matcher::{BinDefinition, BinMatcher};

/// A bin ready for the Archive Builder, with its definition
#[derive(Debug, Clone)]
pub struct FlushJob {
    pub bin: BinState,
    pub definition: Arc<BinDefinition>,
}

/// Decides which bins flush
pub struct FlushScheduler {
    bins: Arc<BinStateStore>,
    matcher: Arc<BinMatcher>,
    clock: Arc<dyn Clock>,
}

impl FlushScheduler {
    pub fn new(bins: Arc<BinStateStore>, matcher: Arc<BinMatcher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            bins,
            matcher,
            clock,
        }
    }

    /// Run one evaluation pass
    pub fn tick(&self) -> Result<Vec<FlushJob>> {
        let now = self.clock.now_millis();

        for bin in self.bins.open_bins() {
            let definition = match self.matcher.definition(&bin.definition) {
                Some(def) => def,
                None => {
                    self.bins
                        .fail(bin.bin_id, "bin definition no longer configured")?;
                    continue;
                }
            };

            let age = Duration::from_millis(bin.age_millis(now));
            if let Some(reason) = flush_reason(definition, bin.size, age) {
                if self.bins.begin_flush(bin.bin_id)? {
                    tracing::info!(
                        "Flushing bin {} [{}]: {:?} trigger, {} members, {} bytes, age {:?}",
                        bin.bin_id,
                        bin.definition,
                        reason,
                        bin.members.len(),
                        bin.size,
                        age
                    );
                }
            }
        }

        let mut jobs = Vec::new();
        for bin in self.bins.flushing_bins() {
            match self.matcher.definition(&bin.definition) {
                Some(def) => jobs.push(FlushJob {
                    definition: Arc::clone(def),
                    bin,
                }),
                None => {
                    self.bins
                        .fail(bin.bin_id, "bin definition no longer configured")?;
                }
            }
        }

        Ok(jobs)
    }
}
