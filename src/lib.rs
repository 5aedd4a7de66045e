//! # smallpack
//!
//! Aggregates small files into large archive containers before they reach
//! tape, so the tape system sees a few big objects instead of many tiny ones:
//! - Rule-based classification of files into bins
//! - Journal-backed bin state that survives crashes
//! - Size/age flush policy with parallel, verified container builds
//! - Bookkeeping that maps every packed file to its archive and offset
//! - TCP-based host protocol
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 TCP Server (host calls)                     │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ store / restore / remove / locate
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                        Engine                               │
//! │     matcher ──► bin state store (journal)  ◄── scheduler    │
//! └──────────┬──────────────────────────────────────┬───────────┘
//!            │ flush jobs                           │ retrieval
//!            ▼                                      ▼
//!   ┌─────────────────┐   ┌──────────┐   ┌───────────────────┐
//!   │ archive builder │──►│ verifier │──►│  storage manager  │
//!   │   (workers)     │   └──────────┘   │   + bookkeeping   │
//!   └─────────────────┘                  └───────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod clock;
pub mod retry;
pub mod checksum;
pub mod record;

pub mod journal;
pub mod matcher;
pub mod bins;
pub mod scheduler;
pub mod archive;
pub mod verify;
pub mod namespace;
pub mod hsm;
pub mod bookkeeping;
pub mod retrieval;
pub mod engine;

pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::Config;
pub use engine::{Engine, StoreOutcome};
pub use error::{PackError, Result};
pub use record::FileRecord;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of smallpack
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
