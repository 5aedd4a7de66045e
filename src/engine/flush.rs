//! One flush-loop tick
//!
//! ```text
//! deferred queue ──► re-enroll
//! scheduler ──► [bin, bin, ...] ──► workers ──► build ──► verify ──► commit ──► bookkeeping ──► clear
//!                                                 │          │          │
//!                                                 └──────────┴──────────┴──► fail: release members
//! ```

use std::fmt;
use std::fs::{self, File};
use std::path::Path;

use crossbeam::channel;

use super::{Engine, EngineStats, Enrollment};
use crate::archive::Archive;
use crate::bookkeeping::ArchiveRecord;
use crate::error::{PackError, Result};
use crate::hsm::StorageHandle;
use crate::scheduler::FlushJob;

/// What became of one flushed bin
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackOutcome {
    Packed { archive_id: u64, members: usize },
    /// Build or verification failed; members were released
    Failed,
    /// Nothing left to pack
    Empty,
}

/// Summary of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Archive ids packed during this tick
    pub packed: Vec<u64>,
    pub failed_bins: usize,
    pub empty_bins: usize,
    pub deferred_enrolled: usize,
    pub deferred_abandoned: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.packed.is_empty()
            && self.failed_bins == 0
            && self.empty_bins == 0
            && self.deferred_enrolled == 0
            && self.deferred_abandoned == 0
    }
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packed {:?}, {} failed, {} empty, {} deferred enrolled, {} abandoned",
            self.packed.len(),
            self.packed,
            self.failed_bins,
            self.empty_bins,
            self.deferred_enrolled,
            self.deferred_abandoned
        )
    }
}

impl Engine {
    /// Run one pass of the flush loop
    ///
    /// Only fatal errors are returned; per-bin failures are absorbed and
    /// counted. Once any fatal error is latched every tick returns it.
    pub fn tick(&self) -> Result<TickReport> {
        let _tick = self.tick_lock.lock();
        self.check_fatal()?;
        let report = self.tick_unlatched();
        self.latch(report)
    }

    fn tick_unlatched(&self) -> Result<TickReport> {
        let mut report = TickReport::default();

        self.retry_deferred(&mut report)?;

        let jobs = self.scheduler.tick()?;
        if jobs.is_empty() {
            return Ok(report);
        }

        for outcome in self.pack_all(jobs)? {
            match outcome {
                PackOutcome::Packed { archive_id, .. } => report.packed.push(archive_id),
                PackOutcome::Failed => report.failed_bins += 1,
                PackOutcome::Empty => report.empty_bins += 1,
            }
        }
        report.packed.sort_unstable();

        Ok(report)
    }

    /// Build `jobs` on at most `workers` threads
    fn pack_all(&self, jobs: Vec<FlushJob>) -> Result<Vec<PackOutcome>> {
        let workers = self.config.workers.max(1).min(jobs.len());
        let total = jobs.len();

        let (job_tx, job_rx) = channel::bounded::<FlushJob>(total);
        for job in jobs {
            job_tx
                .send(job)
                .map_err(|_| PackError::Fatal("flush queue closed".to_string()))?;
        }
        drop(job_tx);

        let (result_tx, result_rx) = channel::bounded::<Result<PackOutcome>>(total);

        crossbeam::scope(|scope| {
            for _ in 0..workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                scope.spawn(move |_| {
                    for job in job_rx.iter() {
                        let result = self.pack_bin(job);
                        let fatal = matches!(&result, Err(e) if e.is_fatal());
                        if result_tx.send(result).is_err() || fatal {
                            break;
                        }
                    }
                });
            }
        })
        .map_err(|_| PackError::Fatal("archive builder thread panicked".to_string()))?;
        drop(result_tx);

        let mut outcomes = Vec::with_capacity(total);
        let mut first_error = None;
        for result in result_rx.iter() {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    if first_error.is_none() || e.is_fatal() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(outcomes),
        }
    }

    /// Build, verify, commit and record one bin
    fn pack_bin(&self, job: FlushJob) -> Result<PackOutcome> {
        let bin_id = job.bin.bin_id;
        let definition = job.definition;

        if job.bin.members.is_empty() {
            self.bins.clear(bin_id)?;
            return Ok(PackOutcome::Empty);
        }

        let archive_id = self.bookkeeping.allocate_archive_id()?;

        let built = match self
            .builder
            .build(bin_id, archive_id, &definition.archive_path, &job.bin.members)
        {
            Ok(built) => built,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                EngineStats::bump(&self.stats.build_failures);
                tracing::error!("Bin {} [{}]: {}", bin_id, definition.name, e);
                self.bins.fail(bin_id, &e.to_string())?;
                return Ok(PackOutcome::Failed);
            }
        };

        for lost in &built.lost {
            EngineStats::bump(&self.stats.members_lost);
            self.bins.release(bin_id, &lost.file, &lost.reason)?;
        }

        let mut archive = match built.archive {
            Some(archive) => archive,
            None => {
                self.bins.clear(bin_id)?;
                return Ok(PackOutcome::Empty);
            }
        };

        self.bins.mark_verifying(bin_id)?;
        if let Err(e) = self
            .verifier
            .verify(&built.path, &archive, &built.included, definition.verify)
        {
            return self.reject_archive(bin_id, &built.path, e);
        }
        archive.verification = definition.verify;

        let handle = match self.commit_archive(&built.path, &archive) {
            Ok(handle) => handle,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return self.reject_archive(bin_id, &built.path, e),
        };

        let members = built.included.len();
        let payload = archive.payload_size();
        let record = ArchiveRecord {
            archive,
            handle,
            definition: definition.name.clone(),
            packed_at: self.clock.now_millis(),
        };
        self.bookkeeping.record_archive(record, &built.included)?;

        remove_container(&built.path);
        self.bins.clear(bin_id)?;

        EngineStats::bump(&self.stats.archives_packed);
        EngineStats::add(&self.stats.bytes_packed, payload);
        tracing::info!(
            "Packed bin {} [{}] into archive {}: {} members, {} bytes, verify={}",
            bin_id,
            definition.name,
            archive_id,
            members,
            payload,
            definition.verify
        );

        Ok(PackOutcome::Packed {
            archive_id,
            members,
        })
    }

    /// Discard a container that failed verification or commit
    fn reject_archive(&self, bin_id: u64, path: &Path, error: PackError) -> Result<PackOutcome> {
        EngineStats::bump(&self.stats.verification_failures);
        tracing::error!("Bin {}: {}", bin_id, error);
        remove_container(path);
        self.bins.fail(bin_id, &error.to_string())?;
        Ok(PackOutcome::Failed)
    }

    /// Store the container and compare the stored digest with the local one
    fn commit_archive(&self, path: &Path, archive: &Archive) -> Result<StorageHandle> {
        let local = self
            .config
            .checksum
            .digest_reader(&mut File::open(path)?)?;

        let retry = self.config.retry;
        let handle = retry.run("archive commit", || self.hsm.store(path, &archive.name))?;
        let stored = retry.run("archive digest", || self.hsm.digest(&handle, local.algorithm))?;

        if stored != local {
            if let Err(e) = self.hsm.remove(&handle) {
                tracing::warn!("Could not remove mismatched object {}: {}", handle, e);
            }
            return Err(PackError::VerificationFailure {
                archive_id: archive.archive_id,
                reason: format!("stored digest {} != local {}", stored, local),
            });
        }

        Ok(handle)
    }

    /// Retry every deferred file once
    fn retry_deferred(&self, report: &mut TickReport) -> Result<()> {
        for deferred in self.bins.deferred() {
            let record = deferred.record;

            if self.bookkeeping.locate(&record.file_id)?.is_some() {
                self.bins.undefer(&record.file_id)?;
                continue;
            }

            let definition = match self.matcher.match_file(&record) {
                Some(def) => def.name.clone(),
                None => {
                    self.bins.undefer(&record.file_id)?;
                    EngineStats::bump(&self.stats.files_unmatched);
                    tracing::info!("Deferred {} no longer matches any bin", record.file_id);
                    continue;
                }
            };

            match self.enroll(&definition, record.clone()) {
                Ok(Enrollment::Bin(bin_id)) => {
                    report.deferred_enrolled += 1;
                    tracing::info!("Deferred {} enrolled into bin {}", record.file_id, bin_id);
                }
                Ok(Enrollment::Packed(_)) => {
                    self.bins.undefer(&record.file_id)?;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    let entry = self.bins.defer(&record, &e.to_string())?;
                    let limit = self.config.max_deferred_attempts;
                    if limit > 0 && entry.attempts >= limit {
                        self.bins.undefer(&record.file_id)?;
                        EngineStats::bump(&self.stats.files_abandoned);
                        report.deferred_abandoned += 1;
                        tracing::error!(
                            "Abandoned {} ({}) after {} attempts: {}",
                            record.file_id,
                            record.path,
                            entry.attempts,
                            e
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

fn remove_container(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Could not remove container {}: {}", path.display(), e);
        }
    }
}
