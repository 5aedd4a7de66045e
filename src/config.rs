//! Configuration for smallpack
//!
//! Centralized configuration with sensible defaults. Built programmatically
//! through [`Config::builder`] or loaded from a TOML file with one
//! `[default]` table and an ordered `[[bins]]` array:
//!
//! ```toml
//! [default]
//! working_dir = "/sapphire"
//! data_root = "/data"
//! mount_point = "/pnfs/data"
//! loop_delay = 5
//!
//! [[bins]]
//! name = "exp1"
//! path_expression = "/data/exp1"
//! file_expression = ".*"
//! s_group = ".*"
//! store_name = ".*"
//! archive_size = "10G"
//! min_age = 5
//! max_age = 60
//! verify = "chksum"
//! archive_path = "archives/exp1"
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::checksum::ChecksumAlgorithm;
use crate::error::{PackError, Result};
use crate::matcher::{parse_size, BinDefinition};
use crate::retry::RetryPolicy;
use crate::verify::VerificationLevel;

/// Main configuration for a packer instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Identity & Logging
    // -------------------------------------------------------------------------
    /// Instance identifier (log lines, locks)
    pub script_id: String,

    /// Default tracing filter, e.g. "info" or "smallpack=debug"
    pub log_level: String,

    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for packer state
    /// Internal structure:
    ///   {working_dir}/
    ///     ├── bins.journal     (bin state journal)
    ///     ├── container/       (archives being built)
    ///     ├── bookkeeping/     (default bookkeeping database)
    ///     └── store/           (default storage-manager root)
    pub working_dir: PathBuf,

    /// Bookkeeping database directory (defaults to `{working_dir}/bookkeeping`)
    pub bookkeeping_dir: Option<PathBuf>,

    /// Storage-manager root for the directory backend (defaults to `{working_dir}/store`)
    pub store_root: Option<PathBuf>,

    /// Namespace prefix as the host reports paths
    pub data_root: PathBuf,

    /// Where `data_root` is mounted locally
    pub mount_point: PathBuf,

    // -------------------------------------------------------------------------
    // Storage Manager & Transport
    // -------------------------------------------------------------------------
    /// Storage-manager type used in file locators
    pub hsm_type: String,

    /// Storage-manager instance name used in file locators
    pub hsm_name: String,

    /// Transport door address for bulk archive transfers
    ///
    /// Reserved for a transport-backed storage manager;
    /// `DirectoryStorageManager` does not read it.
    pub transport_door: String,

    /// Bearer token for the transport door
    ///
    /// Reserved like `transport_door`. Redacted in `Debug`.
    pub authorization_token: Option<Secret>,

    // -------------------------------------------------------------------------
    // Scheduling
    // -------------------------------------------------------------------------
    /// Polling interval of the flush loop
    pub loop_delay: Duration,

    /// Archive builders running in parallel
    pub workers: usize,

    /// Per-member read timeout on the source namespace
    pub member_read_timeout: Duration,

    /// Attempts at writing one container before the build fails
    pub build_attempts: u32,

    /// Retries of deferred files before they are abandoned; 0 never abandons
    pub max_deferred_attempts: u32,

    // -------------------------------------------------------------------------
    // Integrity & Durability
    // -------------------------------------------------------------------------
    /// Checksum algorithm used at enrollment and in manifests
    pub checksum: ChecksumAlgorithm,

    /// Retry policy for journal, bookkeeping and storage-manager writes
    pub retry: RetryPolicy,

    /// Journal sync strategy
    pub journal_sync_strategy: JournalSyncStrategy,

    /// Compact the bin journal once it holds this many entries
    pub journal_compact_threshold: u64,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// TCP listen address for host calls
    pub listen_addr: String,

    /// Max concurrent host connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Bin Definitions
    // -------------------------------------------------------------------------
    /// Definitions in priority order
    pub bins: Vec<BinDefinition>,

    /// Definitions flagged at load time and left out of `bins`
    pub rejected_bins: Vec<RejectedBin>,
}

/// Journal sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// A bin definition that failed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedBin {
    pub name: String,
    pub reason: String,
}

/// A credential that never shows up in logs
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            script_id: "pack".to_string(),
            log_level: "info".to_string(),
            working_dir: PathBuf::from("./smallpack_data"),
            bookkeeping_dir: None,
            store_root: None,
            data_root: PathBuf::from("/"),
            mount_point: PathBuf::from("/"),
            hsm_type: "osm".to_string(),
            hsm_name: "smallpack".to_string(),
            transport_door: String::new(),
            authorization_token: None,
            loop_delay: Duration::from_secs(5),
            workers: 4,
            member_read_timeout: Duration::from_secs(60),
            build_attempts: 3,
            max_deferred_attempts: 10,
            checksum: ChecksumAlgorithm::Crc32,
            retry: RetryPolicy::default(),
            journal_sync_strategy: JournalSyncStrategy::EveryWrite,
            journal_compact_threshold: 100_000,
            listen_addr: "127.0.0.1:7410".to_string(),
            max_connections: 64,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            bins: Vec::new(),
            rejected_bins: Vec::new(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PackError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse a TOML configuration
    ///
    /// Invalid bin definitions are flagged and skipped; the load fails only
    /// when no usable definition is left.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let raw: RawFile =
            toml::from_str(text).map_err(|e| PackError::Config(format!("invalid TOML: {}", e)))?;

        let mut config = Config::default();
        raw.default.apply(&mut config)?;

        let mut seen = HashSet::new();
        for raw_bin in raw.bins {
            let name = raw_bin.name.clone();
            if !seen.insert(name.clone()) {
                config.reject(name, "duplicate bin definition".to_string());
                continue;
            }
            match raw_bin.into_definition() {
                Ok(def) => config.bins.push(def),
                Err(e) => config.reject(name, e.to_string()),
            }
        }

        if config.bins.is_empty() {
            return Err(PackError::Config(format!(
                "no usable bin definitions ({} rejected)",
                config.rejected_bins.len()
            )));
        }

        Ok(config)
    }

    fn reject(&mut self, name: String, reason: String) {
        tracing::error!("Bin definition [{}] rejected: {}", name, reason);
        self.rejected_bins.push(RejectedBin { name, reason });
    }

    /// Path of the bin state journal
    pub fn journal_path(&self) -> PathBuf {
        self.working_dir.join("bins.journal")
    }

    /// Directory where containers are assembled
    pub fn container_dir(&self) -> PathBuf {
        self.working_dir.join("container")
    }

    pub fn bookkeeping_dir(&self) -> PathBuf {
        self.bookkeeping_dir
            .clone()
            .unwrap_or_else(|| self.working_dir.join("bookkeeping"))
    }

    pub fn store_root(&self) -> PathBuf {
        self.store_root
            .clone()
            .unwrap_or_else(|| self.working_dir.join("store"))
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the working directory (root for packer state)
    pub fn working_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.working_dir = path.into();
        self
    }

    pub fn bookkeeping_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.bookkeeping_dir = Some(path.into());
        self
    }

    pub fn store_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.store_root = Some(path.into());
        self
    }

    /// Set the namespace root and where it is mounted locally
    pub fn namespace(mut self, data_root: impl Into<PathBuf>, mount_point: impl Into<PathBuf>) -> Self {
        self.config.data_root = data_root.into();
        self.config.mount_point = mount_point.into();
        self
    }

    pub fn loop_delay(mut self, delay: Duration) -> Self {
        self.config.loop_delay = delay;
        self
    }

    pub fn workers(mut self, count: usize) -> Self {
        self.config.workers = count.max(1);
        self
    }

    pub fn member_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.member_read_timeout = timeout;
        self
    }

    pub fn build_attempts(mut self, attempts: u32) -> Self {
        self.config.build_attempts = attempts.max(1);
        self
    }

    pub fn max_deferred_attempts(mut self, attempts: u32) -> Self {
        self.config.max_deferred_attempts = attempts;
        self
    }

    pub fn checksum(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.config.checksum = algorithm;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.config.retry = policy;
        self
    }

    pub fn journal_sync_strategy(mut self, strategy: JournalSyncStrategy) -> Self {
        self.config.journal_sync_strategy = strategy;
        self
    }

    pub fn journal_compact_threshold(mut self, entries: u64) -> Self {
        self.config.journal_compact_threshold = entries;
        self
    }

    pub fn hsm(mut self, hsm_type: impl Into<String>, hsm_name: impl Into<String>) -> Self {
        self.config.hsm_type = hsm_type.into();
        self.config.hsm_name = hsm_name.into();
        self
    }

    /// Set the TCP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set per-connection socket timeouts (0 disables)
    pub fn timeouts_ms(mut self, read_ms: u64, write_ms: u64) -> Self {
        self.config.read_timeout_ms = read_ms;
        self.config.write_timeout_ms = write_ms;
        self
    }

    /// Append a bin definition (lowest priority so far)
    pub fn bin(mut self, definition: BinDefinition) -> Self {
        self.config.bins.push(definition);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

// =============================================================================
// TOML Representation
// =============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawFile {
    #[serde(default)]
    default: RawDefaults,

    #[serde(default)]
    bins: Vec<RawBin>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefaults {
    script_id: Option<String>,
    log_level: Option<String>,
    bookkeeping_dir: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    store_root: Option<PathBuf>,
    /// seconds
    loop_delay: Option<u64>,
    mount_point: Option<PathBuf>,
    data_root: Option<PathBuf>,
    hsm_type: Option<String>,
    hsm_name: Option<String>,
    transport_door: Option<String>,
    authorization_token: Option<String>,
    workers: Option<usize>,
    /// seconds
    member_read_timeout: Option<u64>,
    build_attempts: Option<u32>,
    max_deferred_attempts: Option<u32>,
    checksum: Option<String>,
    retry_attempts: Option<u32>,
    /// seconds
    retry_backoff: Option<u64>,
    journal_compact_threshold: Option<u64>,
    listen_addr: Option<String>,
    max_connections: Option<usize>,
}

impl RawDefaults {
    fn apply(self, config: &mut Config) -> Result<()> {
        if let Some(v) = self.script_id {
            config.script_id = v;
        }
        if let Some(v) = self.log_level {
            config.log_level = v;
        }
        if let Some(v) = self.working_dir {
            config.working_dir = v;
        }
        config.bookkeeping_dir = self.bookkeeping_dir.or(config.bookkeeping_dir.take());
        config.store_root = self.store_root.or(config.store_root.take());
        if let Some(v) = self.loop_delay {
            config.loop_delay = Duration::from_secs(v);
        }
        if let Some(v) = self.mount_point {
            config.mount_point = v;
        }
        if let Some(v) = self.data_root {
            config.data_root = v;
        }
        if let Some(v) = self.hsm_type {
            config.hsm_type = v;
        }
        if let Some(v) = self.hsm_name {
            config.hsm_name = v;
        }
        if let Some(v) = self.transport_door {
            config.transport_door = v;
        }
        config.authorization_token = self.authorization_token.map(Secret::new);
        if let Some(v) = self.workers {
            if v == 0 {
                return Err(PackError::Config("workers must be at least 1".to_string()));
            }
            config.workers = v;
        }
        if let Some(v) = self.member_read_timeout {
            config.member_read_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.build_attempts {
            config.build_attempts = v.max(1);
        }
        if let Some(v) = self.max_deferred_attempts {
            config.max_deferred_attempts = v;
        }
        if let Some(v) = self.checksum {
            config.checksum = v.parse()?;
        }
        if let Some(v) = self.retry_attempts {
            config.retry.max_attempts = v.max(1);
        }
        if let Some(v) = self.retry_backoff {
            config.retry.backoff = Duration::from_secs(v);
        }
        if let Some(v) = self.journal_compact_threshold {
            config.journal_compact_threshold = v;
        }
        if let Some(v) = self.listen_addr {
            config.listen_addr = v;
        }
        if let Some(v) = self.max_connections {
            config.max_connections = v;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawSize {
    Bytes(u64),
    Text(String),
}

#[derive(Debug, Deserialize)]
struct RawBin {
    name: String,
    path_expression: Option<String>,
    file_expression: Option<String>,
    s_group: Option<String>,
    store_name: Option<String>,
    archive_size: RawSize,
    /// minutes
    min_age: u64,
    /// minutes
    max_age: u64,
    verify: String,
    archive_path: String,
}

impl RawBin {
    fn into_definition(self) -> Result<BinDefinition> {
        let archive_size = match self.archive_size {
            RawSize::Bytes(n) => n,
            RawSize::Text(s) => parse_size(&s)?,
        };

        let mut builder = BinDefinition::builder(self.name)
            .archive_size(archive_size)
            .min_age(Duration::from_secs(self.min_age * 60))
            .max_age(Duration::from_secs(self.max_age * 60))
            .verify(self.verify.parse::<VerificationLevel>()?)
            .archive_path(self.archive_path);

        if let Some(expr) = self.path_expression {
            builder = builder.path_expression(expr);
        }
        if let Some(expr) = self.file_expression {
            builder = builder.file_expression(expr);
        }
        if let Some(expr) = self.s_group {
            builder = builder.group_expression(expr);
        }
        if let Some(expr) = self.store_name {
            builder = builder.class_expression(expr);
        }

        builder.build()
    }
}
