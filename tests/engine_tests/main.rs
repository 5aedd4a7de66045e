//! Tests for the packing engine
//!
//! These tests drive the engine tick by tick with a manual clock:
//! - Size and age triggered flushes
//! - Host calls: store, restore, remove, locate
//! - Lost members, deferred files, failed commits
//! - Restart behavior
//! - Stores racing flushes, fatal error latching

mod pack_tests;
mod recovery_tests;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use smallpack::clock::ManualClock;
use smallpack::config::Config;
use smallpack::matcher::BinDefinition;
use smallpack::record::FileRecord;
use smallpack::retry::RetryPolicy;
use smallpack::verify::VerificationLevel;
use smallpack::Engine;
use tempfile::TempDir;

pub const MINUTE: Duration = Duration::from_secs(60);

/// Bin definition for files below a `raw` directory
pub fn raw_bin(target: u64, min_age: Duration, max_age: Duration) -> BinDefinition {
    BinDefinition::builder("raw")
        .path_expression(".*/raw")
        .archive_size(target)
        .min_age(min_age)
        .max_age(max_age)
        .verify(VerificationLevel::Chksum)
        .archive_path("raw")
        .build()
        .unwrap()
}

/// A data directory, a working directory and a clock
pub struct Fixture {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub config: Config,
}

impl Fixture {
    pub fn new(definitions: Vec<BinDefinition>) -> Self {
        Self::with(definitions, |builder| builder)
    }

    pub fn with<F>(definitions: Vec<BinDefinition>, customize: F) -> Self
    where
        F: FnOnce(smallpack::config::ConfigBuilder) -> smallpack::config::ConfigBuilder,
    {
        let dir = TempDir::new().unwrap();
        let mut builder = Config::builder()
            .working_dir(dir.path().join("work"))
            .retry(RetryPolicy::immediate(2))
            .workers(2)
            .loop_delay(Duration::from_millis(10));
        for definition in definitions {
            builder = builder.bin(definition);
        }
        let config = customize(builder).build();

        Self {
            dir,
            clock: Arc::new(ManualClock::new(1_000_000)),
            config,
        }
    }

    pub fn path(&self, dir: &str, name: &str) -> PathBuf {
        self.dir.path().join("data").join(dir).join(name)
    }

    /// Write a source file below `data/{dir}` and describe it
    pub fn write(&self, dir: &str, name: &str, data: &[u8]) -> FileRecord {
        let path = self.path(dir, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, data).unwrap();
        self.record(dir, name)
    }

    /// Describe a source file without creating it
    pub fn record(&self, dir: &str, name: &str) -> FileRecord {
        let path = self.path(dir, name);
        FileRecord::new(format!("ID-{}-{}", dir, name), path.to_string_lossy())
            .with_group("exp1")
            .with_class("tape")
    }

    pub fn open(&self) -> Engine {
        Engine::builder(self.config.clone())
            .clock(self.clock.clone())
            .open()
            .unwrap()
    }
}

pub fn payload(seed: usize, len: usize) -> Vec<u8> {
    (0..len).map(|j| ((seed * 17 + j) % 253) as u8).collect()
}
