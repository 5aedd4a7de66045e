//! Engine Module
//!
//! The packer that coordinates all components.
//!
//! ## Responsibilities
//! - Serve the host calls: store, restore, remove, locate
//! - Run the flush loop: deferred retries, scheduler, parallel builds,
//!   verification, commit to the storage manager, bookkeeping
//! - Sanitize state left behind by a previous run
//!
//! ## Concurrency Model
//!
//! - **Host calls** run on any thread. Enrollment serializes inside the
//!   Bin State Store; nothing else is shared mutably.
//! - **Ticks** are serialized by `tick_lock`. Within a tick, bins are built
//!   by at most `workers` threads; one bin is only ever built by one thread.
//! - A packed check and an enrollment happen under the same Bin State Store
//!   lock. A flush records its archive before clearing the bin, so a file is
//!   never enrolled again once packed.
//! - The first fatal error is latched. Every later host call and tick fails
//!   with it, and `run` returns it.

mod flush;
mod stats;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

pub use flush::{PackOutcome, TickReport};
pub use stats::{EngineStats, StatsSnapshot};

use crate::archive::{ArchiveBuilder, FileSinkFactory, SinkFactory};
use crate::bins::{BinId, BinRecovery, BinStateStore};
use crate::bookkeeping::{BookkeepingStore, FileLocation, JournalBookkeeping};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{PackError, Result};
use crate::hsm::{DirectoryStorageManager, StorageManager};
use crate::matcher::BinMatcher;
use crate::namespace::{LocalNamespace, SourceNamespace, DEFAULT_READERS};
use crate::protocol::{Command, Response};
use crate::record::{EnrolledFile, FileRecord};
use crate::retrieval::RetrievalEngine;
use crate::scheduler::FlushScheduler;
use crate::verify::Verifier;

/// What happened to a file handed to `store_small_file`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    /// Accepted into a bin
    Enrolled { bin_id: BinId },
    /// No bin definition matches; the file stays unpacked
    Unmatched,
    /// Could not be read now; queued for retry
    Deferred { reason: String },
    /// Already in a packed archive
    AlreadyPacked { locator: String },
}

/// Where `Engine::enroll` put a file
enum Enrollment {
    Bin(BinId),
    /// A flush archived it first
    Packed(FileLocation),
}

/// The main packing engine
pub struct Engine {
    config: Config,
    clock: Arc<dyn Clock>,
    matcher: Arc<BinMatcher>,
    bins: Arc<BinStateStore>,
    scheduler: FlushScheduler,
    builder: ArchiveBuilder,
    verifier: Verifier,
    bookkeeping: Arc<dyn BookkeepingStore>,
    hsm: Arc<dyn StorageManager>,
    namespace: Arc<dyn SourceNamespace>,
    retrieval: RetrievalEngine,
    stats: EngineStats,
    recovery: BinRecovery,
    tick_lock: Mutex<()>,
    fatal: Mutex<Option<String>>,
}

/// Assembles an [`Engine`], with defaults for every collaborator
pub struct EngineBuilder {
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    namespace: Option<Arc<dyn SourceNamespace>>,
    bookkeeping: Option<Arc<dyn BookkeepingStore>>,
    hsm: Option<Arc<dyn StorageManager>>,
    sinks: Option<Arc<dyn SinkFactory>>,
}

impl EngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn namespace(mut self, namespace: Arc<dyn SourceNamespace>) -> Self {
        self.namespace = Some(namespace);
        self
    }

    pub fn bookkeeping(mut self, bookkeeping: Arc<dyn BookkeepingStore>) -> Self {
        self.bookkeeping = Some(bookkeeping);
        self
    }

    pub fn storage_manager(mut self, hsm: Arc<dyn StorageManager>) -> Self {
        self.hsm = Some(hsm);
        self
    }

    /// Where container bytes go while a bin is built
    pub fn sinks(mut self, sinks: Arc<dyn SinkFactory>) -> Self {
        self.sinks = Some(sinks);
        self
    }

    /// Open the engine
    ///
    /// On startup:
    /// 1. Compile bin definitions (none usable → configuration error)
    /// 2. Discard half-built containers from a previous run
    /// 3. Open bookkeeping and the storage manager
    /// 4. Replay the bin journal, dropping members bookkeeping already packed
    pub fn open(self) -> Result<Engine> {
        let config = self.config;

        let matcher = Arc::new(BinMatcher::new(config.bins.clone())?);
        if matcher.is_empty() {
            return Err(PackError::Config("no bin definitions configured".to_string()));
        }

        fs::create_dir_all(&config.working_dir)?;
        let container_dir = config.container_dir();
        if container_dir.exists() {
            fs::remove_dir_all(&container_dir)?;
        }
        fs::create_dir_all(&container_dir)?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let bookkeeping: Arc<dyn BookkeepingStore> = match self.bookkeeping {
            Some(bk) => bk,
            None => Arc::new(JournalBookkeeping::open(
                &config.bookkeeping_dir(),
                config.journal_sync_strategy,
                config.retry,
            )?),
        };
        let hsm: Arc<dyn StorageManager> = match self.hsm {
            Some(hsm) => hsm,
            None => Arc::new(DirectoryStorageManager::open(config.store_root())?),
        };
        let namespace: Arc<dyn SourceNamespace> = match self.namespace {
            Some(ns) => ns,
            None => Arc::new(LocalNamespace::with_readers(
                config.data_root.clone(),
                config.mount_point.clone(),
                config.member_read_timeout,
                (config.workers * 2).max(DEFAULT_READERS),
            )?),
        };
        let sinks = self.sinks.unwrap_or_else(|| Arc::new(FileSinkFactory));

        let (bins, recovery) = BinStateStore::open(&config, Arc::clone(&clock), |file_id| {
            matches!(bookkeeping.locate(file_id), Ok(Some(_)))
        })?;
        let bins = Arc::new(bins);

        let scheduler = FlushScheduler::new(Arc::clone(&bins), Arc::clone(&matcher), Arc::clone(&clock));
        let builder = ArchiveBuilder::new(
            container_dir,
            Arc::clone(&namespace),
            sinks,
            config.checksum,
            config.build_attempts,
        );
        let retrieval = RetrievalEngine::new(Arc::clone(&bookkeeping), Arc::clone(&hsm));

        tracing::info!(
            "[{}] Engine open: {} bin definitions, working dir {}",
            config.script_id,
            matcher.len(),
            config.working_dir.display()
        );

        Ok(Engine {
            config,
            clock,
            matcher,
            bins,
            scheduler,
            builder,
            verifier: Verifier::new(),
            bookkeeping,
            hsm,
            namespace,
            retrieval,
            stats: EngineStats::default(),
            recovery,
            tick_lock: Mutex::new(()),
            fatal: Mutex::new(None),
        })
    }
}

impl Engine {
    pub fn builder(config: Config) -> EngineBuilder {
        EngineBuilder {
            config,
            clock: None,
            namespace: None,
            bookkeeping: None,
            hsm: None,
            sinks: None,
        }
    }

    /// Open with default collaborators
    pub fn open(config: Config) -> Result<Self> {
        Self::builder(config).open()
    }

    // =========================================================================
    // Host Calls
    // =========================================================================

    /// Classify and enroll a newly observed small file
    pub fn store_small_file(&self, record: FileRecord) -> Result<StoreOutcome> {
        self.check_fatal()?;
        let outcome = self.store_unlatched(record);
        self.latch(outcome)
    }

    fn store_unlatched(&self, record: FileRecord) -> Result<StoreOutcome> {
        record.validate()?;

        if let Some(bin_id) = self.bins.bin_of(&record.file_id) {
            return Ok(StoreOutcome::Enrolled { bin_id });
        }

        if let Some(location) = self.bookkeeping.locate(&record.file_id)? {
            return Ok(StoreOutcome::AlreadyPacked {
                locator: self.locator_for(&location)?,
            });
        }

        let definition = match self.matcher.match_file(&record) {
            Some(def) => Arc::clone(def),
            None => {
                EngineStats::bump(&self.stats.files_unmatched);
                tracing::info!("{} ({}) matches no bin definition", record.file_id, record.path);
                return Ok(StoreOutcome::Unmatched);
            }
        };

        match self.enroll(&definition.name, record.clone()) {
            Ok(Enrollment::Bin(bin_id)) => Ok(StoreOutcome::Enrolled { bin_id }),
            Ok(Enrollment::Packed(location)) => Ok(StoreOutcome::AlreadyPacked {
                locator: self.locator_for(&location)?,
            }),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let reason = e.to_string();
                let deferred = self.bins.defer(&record, &reason)?;
                EngineStats::bump(&self.stats.files_deferred);
                tracing::warn!(
                    "Deferred {} (attempt {}): {}",
                    record.file_id,
                    deferred.attempts,
                    reason
                );
                Ok(StoreOutcome::Deferred { reason })
            }
        }
    }

    /// Write a packed file's bytes to `dest`
    ///
    /// The member is checked against its enrollment checksum first.
    pub fn restore_small_file(&self, file_id: &str, dest: &Path) -> Result<PathBuf> {
        self.check_fatal()?;
        let restored = self.restore_unlatched(file_id, dest);
        self.latch(restored)
    }

    fn restore_unlatched(&self, file_id: &str, dest: &Path) -> Result<PathBuf> {
        let (location, data) = self.retrieval.retrieve_file(file_id, true)?;

        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut partial = dest.as_os_str().to_os_string();
        partial.push(".partial");
        let partial = PathBuf::from(partial);
        fs::write(&partial, &data)?;
        fs::rename(&partial, dest)?;

        tracing::info!(
            "Restored {} from archive {} to {} ({} bytes)",
            file_id,
            location.archive_id,
            dest.display(),
            data.len()
        );
        Ok(dest.to_path_buf())
    }

    /// Withdraw a file from packing, or forget its packed mapping
    ///
    /// Fails with `Busy` while the file's bin is being flushed. Archives stay
    /// untouched.
    pub fn remove_small_file(&self, file_id: &str) -> Result<()> {
        self.check_fatal()?;
        let removed = self.remove_unlatched(file_id);
        self.latch(removed)
    }

    fn remove_unlatched(&self, file_id: &str) -> Result<()> {
        if self.bins.withdraw(file_id)?.is_some() {
            return Ok(());
        }
        if self.bins.undefer(file_id)? {
            tracing::info!("Dropped {} from the deferred queue", file_id);
            return Ok(());
        }
        if self.bookkeeping.forget_file(file_id)? {
            tracing::info!("Forgot packed file {}", file_id);
            return Ok(());
        }
        Err(PackError::NotFound(format!("file {}", file_id)))
    }

    /// Locator URI of a packed file
    pub fn locate(&self, file_id: &str) -> Result<Option<String>> {
        self.check_fatal()?;
        let located = match self.bookkeeping.locate(file_id) {
            Ok(Some(location)) => self.locator_for(&location).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.latch(located)
    }

    /// The error that stopped the engine, if any
    pub fn fatal_error(&self) -> Option<String> {
        self.fatal.lock().clone()
    }

    /// Route a host command
    pub fn execute(&self, command: Command) -> Response {
        let result = match command {
            Command::Store { record } => self.store_small_file(record).map(|outcome| match outcome {
                StoreOutcome::Enrolled { bin_id } => Response::ok(Some(bin_id.to_string().into_bytes())),
                StoreOutcome::AlreadyPacked { locator } => Response::ok(Some(locator.into_bytes())),
                StoreOutcome::Unmatched => Response::unmatched(),
                StoreOutcome::Deferred { reason } => Response::deferred(&reason),
            }),
            Command::Restore { file_id, dest } => self
                .restore_small_file(&file_id, Path::new(&dest))
                .map(|path| Response::ok(Some(path.to_string_lossy().into_owned().into_bytes()))),
            Command::Remove { file_id } => self.remove_small_file(&file_id).map(|()| Response::ok(None)),
            Command::Locate { file_id } => self.locate(&file_id).map(|found| match found {
                Some(locator) => Response::ok(Some(locator.into_bytes())),
                None => Response::not_found(),
            }),
            Command::Status => Ok(Response::ok(Some(self.status().to_string().into_bytes()))),
            Command::Ping => Ok(Response::ok(Some(b"PONG".to_vec()))),
        };

        match result {
            Ok(response) => response,
            Err(PackError::NotFound(_)) => Response::not_found(),
            Err(e) => Response::error(&e.to_string()),
        }
    }

    // =========================================================================
    // Flush Loop
    // =========================================================================

    /// Run ticks every `loop_delay` until `shutdown` is set
    ///
    /// Returns on shutdown, or with the error that made a tick fatal.
    pub fn run(&self, shutdown: &AtomicBool) -> Result<()> {
        tracing::info!(
            "[{}] Flush loop started (delay {:?}, {} workers)",
            self.config.script_id,
            self.config.loop_delay,
            self.config.workers
        );

        while !shutdown.load(Ordering::SeqCst) {
            match self.tick() {
                Ok(report) if !report.is_idle() => tracing::info!("Tick: {}", report),
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    tracing::error!("Flush loop stopping: {}", e);
                    return Err(e);
                }
                Err(e) => tracing::error!("Tick failed: {}", e),
            }
            tracing::debug!("Stats: {:?}", self.status());
            self.sleep_until_next_tick(shutdown);
        }

        tracing::info!("[{}] Flush loop stopped", self.config.script_id);
        Ok(())
    }

    fn sleep_until_next_tick(&self, shutdown: &AtomicBool) {
        let slice = Duration::from_millis(100);
        let mut remaining = self.config.loop_delay;
        while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
            let step = remaining.min(slice);
            std::thread::sleep(step);
            remaining -= step;
        }
    }

    /// Sync journals
    pub fn close(&self) -> Result<()> {
        self.bins.sync()?;
        self.bookkeeping.sync()
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Read, checksum and enroll a file that matched `definition`
    ///
    /// The packed check runs again under the bin store lock, so a file a
    /// concurrent flush just archived comes back as `Packed`.
    fn enroll(&self, definition: &str, record: FileRecord) -> Result<Enrollment> {
        let data = self.namespace.read(&record)?;
        let file = EnrolledFile {
            size: data.len() as u64,
            checksum: self.config.checksum.digest(&data),
            enrolled_at: self.clock.now_millis(),
            record,
        };

        let mut packed = None;
        let enrolled = self.bins.enroll_unpacked(definition, file, |file_id| {
            packed = self.bookkeeping.locate(file_id)?;
            Ok(packed.is_some())
        })?;

        match (enrolled, packed) {
            (Some(bin_id), _) => {
                EngineStats::bump(&self.stats.files_enrolled);
                Ok(Enrollment::Bin(bin_id))
            }
            (None, Some(location)) => Ok(Enrollment::Packed(location)),
            (None, None) => Err(PackError::Fatal(
                "bin store refused an unpacked file".to_string(),
            )),
        }
    }

    /// Fail with the latched fatal error, if there is one
    fn check_fatal(&self) -> Result<()> {
        match self.fatal.lock().as_ref() {
            Some(reason) => Err(PackError::Fatal(reason.clone())),
            None => Ok(()),
        }
    }

    /// Latch the first fatal error in `result`
    fn latch<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(PackError::Fatal(reason)) = &result {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                tracing::error!("Engine stopped by fatal error: {}", reason);
                *fatal = Some(reason.clone());
            }
        }
        result
    }

    fn locator_for(&self, location: &FileLocation) -> Result<String> {
        let record = self
            .bookkeeping
            .archive(location.archive_id)?
            .ok_or_else(|| PackError::NotFound(format!("archive {}", location.archive_id)))?;

        Ok(format!(
            "{}://{}/?store={}&group={}&bfid={}:{}",
            self.config.hsm_type,
            self.config.hsm_name,
            location.record.storage_class.as_deref().unwrap_or(""),
            location.record.storage_group.as_deref().unwrap_or(""),
            location.record.file_id,
            record.handle
        ))
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn status(&self) -> StatsSnapshot {
        let bins = self.bins.bins();
        let open = bins
            .iter()
            .filter(|b| b.lifecycle == crate::bins::BinLifecycle::Open)
            .count() as u64;

        StatsSnapshot {
            files_enrolled: EngineStats::load(&self.stats.files_enrolled),
            files_unmatched: EngineStats::load(&self.stats.files_unmatched),
            files_deferred: EngineStats::load(&self.stats.files_deferred),
            files_abandoned: EngineStats::load(&self.stats.files_abandoned),
            archives_packed: EngineStats::load(&self.stats.archives_packed),
            bytes_packed: EngineStats::load(&self.stats.bytes_packed),
            members_lost: EngineStats::load(&self.stats.members_lost),
            build_failures: EngineStats::load(&self.stats.build_failures),
            verification_failures: EngineStats::load(&self.stats.verification_failures),
            open_bins: open,
            flushing_bins: bins.len() as u64 - open,
            deferred_queue: self.bins.deferred().len() as u64,
        }
    }

    pub fn bins(&self) -> &BinStateStore {
        &self.bins
    }

    pub fn bookkeeping(&self) -> &dyn BookkeepingStore {
        self.bookkeeping.as_ref()
    }

    pub fn matcher(&self) -> &BinMatcher {
        &self.matcher
    }

    /// What the bin journal held at startup
    pub fn recovery(&self) -> &BinRecovery {
        &self.recovery
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}
