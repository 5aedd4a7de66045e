//! Bin Matcher Module
//!
//! Classifies newly observed small files into bin definitions.
//!
//! ## Responsibilities
//! - Hold the configured definitions in declaration order
//! - Return the first definition whose four patterns all accept a file
//! - No side effects: enrollment is the Bin State Store's job
//!
//! ## Pattern Subjects
//! ```text
//! /data/exp1/run7/evt_0001.dat   group=exp1   class=tape
//! └──── path ────┘└─── name ───┘ └─ group ─┘  └─ class ─┘
//! ```

mod definition;
mod pattern;

use std::sync::Arc;

pub use definition::{parse_size, BinDefinition, BinDefinitionBuilder};
pub use pattern::Pattern;

use crate::error::{PackError, Result};
use crate::record::FileRecord;

/// Deterministic, first-match-wins classifier
#[derive(Debug, Clone, Default)]
pub struct BinMatcher {
    definitions: Vec<Arc<BinDefinition>>,
}

impl BinMatcher {
    /// Create a matcher; priority is the order of `definitions`
    ///
    /// Definition names must be unique.
    pub fn new(definitions: Vec<BinDefinition>) -> Result<Self> {
        let mut seen = std::collections::HashSet::new();
        for def in &definitions {
            if !seen.insert(def.name.as_str()) {
                return Err(PackError::Config(format!(
                    "duplicate bin definition '{}'",
                    def.name
                )));
            }
        }

        Ok(Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
        })
    }

    /// Classify a file; `None` means the file stays unpacked
    pub fn match_file(&self, file: &FileRecord) -> Option<&Arc<BinDefinition>> {
        self.definitions.iter().find(|def| def.matches(file))
    }

    /// Look up a definition by name
    pub fn definition(&self, name: &str) -> Option<&Arc<BinDefinition>> {
        self.definitions.iter().find(|def| def.name == name)
    }

    pub fn definitions(&self) -> &[Arc<BinDefinition>] {
        &self.definitions
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}
