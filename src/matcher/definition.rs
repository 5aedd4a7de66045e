//! Bin definitions
//!
//! A definition is loaded once per run and never mutated afterwards. All
//! patterns are compiled by [`BinDefinitionBuilder::build`].

use std::time::Duration;

use crate::error::{PackError, Result};
use crate::record::FileRecord;
use crate::verify::VerificationLevel;

use super::Pattern;

/// Immutable policy for one family of bins
#[derive(Debug, Clone, PartialEq)]
pub struct BinDefinition {
    /// Section name; identifies the definition
    pub name: String,

    /// Matched against the start of the file's parent directory
    pub path_pattern: Pattern,

    /// Matched against the file's name
    pub name_pattern: Pattern,

    /// Matched against the storage group tag
    pub group_pattern: Pattern,

    /// Matched against the storage class tag
    pub class_pattern: Pattern,

    /// Target archive size in bytes
    pub archive_size: u64,

    /// A full bin is not flushed before it is this old
    pub min_age: Duration,

    /// A bin is flushed once it is this old, whatever its size
    pub max_age: Duration,

    /// Post-build verification level
    pub verify: VerificationLevel,

    /// Relative prefix for archive names (never starts with '/')
    pub archive_path: String,
}

impl BinDefinition {
    pub fn builder(name: impl Into<String>) -> BinDefinitionBuilder {
        BinDefinitionBuilder::new(name)
    }

    /// Whether every pattern of this definition accepts `file`
    pub fn matches(&self, file: &FileRecord) -> bool {
        self.path_pattern.is_match(file.parent())
            && self.name_pattern.is_match(file.name())
            && self.group_pattern.is_match_opt(file.storage_group.as_deref())
            && self.class_pattern.is_match_opt(file.storage_class.as_deref())
    }
}

/// Builder for BinDefinition; validation happens in `build`
#[derive(Debug, Clone)]
pub struct BinDefinitionBuilder {
    name: String,
    path_expression: String,
    file_expression: String,
    group_expression: String,
    class_expression: String,
    archive_size: u64,
    min_age: Duration,
    max_age: Duration,
    verify: VerificationLevel,
    archive_path: String,
}

impl BinDefinitionBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_expression: ".*".to_string(),
            file_expression: ".*".to_string(),
            group_expression: ".*".to_string(),
            class_expression: ".*".to_string(),
            archive_size: 1_000_000_000,
            min_age: Duration::ZERO,
            max_age: Duration::from_secs(60 * 60),
            verify: VerificationLevel::Filelist,
            archive_path: "archives".to_string(),
        }
    }

    pub fn path_expression(mut self, expr: impl Into<String>) -> Self {
        self.path_expression = expr.into();
        self
    }

    pub fn file_expression(mut self, expr: impl Into<String>) -> Self {
        self.file_expression = expr.into();
        self
    }

    pub fn group_expression(mut self, expr: impl Into<String>) -> Self {
        self.group_expression = expr.into();
        self
    }

    pub fn class_expression(mut self, expr: impl Into<String>) -> Self {
        self.class_expression = expr.into();
        self
    }

    pub fn archive_size(mut self, bytes: u64) -> Self {
        self.archive_size = bytes;
        self
    }

    pub fn min_age(mut self, age: Duration) -> Self {
        self.min_age = age;
        self
    }

    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = age;
        self
    }

    pub fn verify(mut self, level: VerificationLevel) -> Self {
        self.verify = level;
        self
    }

    pub fn archive_path(mut self, prefix: impl Into<String>) -> Self {
        self.archive_path = prefix.into();
        self
    }

    pub fn build(self) -> Result<BinDefinition> {
        if self.name.trim().is_empty() {
            return Err(PackError::Config("bin definition without a name".to_string()));
        }
        if self.archive_size == 0 {
            return Err(PackError::Config(format!(
                "[{}] archive_size must be positive",
                self.name
            )));
        }
        if self.min_age > self.max_age {
            return Err(PackError::Config(format!(
                "[{}] min_age ({}s) exceeds max_age ({}s)",
                self.name,
                self.min_age.as_secs(),
                self.max_age.as_secs()
            )));
        }
        if self.archive_path.starts_with('/') {
            return Err(PackError::Config(format!(
                "[{}] archive_path '{}' must not begin with a path separator",
                self.name, self.archive_path
            )));
        }
        if self.archive_path.split('/').any(|c| c == "..") {
            return Err(PackError::Config(format!(
                "[{}] archive_path '{}' must not contain '..'",
                self.name, self.archive_path
            )));
        }

        let compile = |what: &str, pattern: Result<Pattern>| {
            pattern.map_err(|e| PackError::Config(format!("[{}] {}: {}", self.name, what, e)))
        };

        Ok(BinDefinition {
            path_pattern: compile("path_expression", Pattern::prefix(&self.path_expression))?,
            name_pattern: compile("file_expression", Pattern::new(&self.file_expression))?,
            group_pattern: compile("s_group", Pattern::new(&self.group_expression))?,
            class_pattern: compile("store_name", Pattern::new(&self.class_expression))?,
            name: self.name,
            archive_size: self.archive_size,
            min_age: self.min_age,
            max_age: self.max_age,
            verify: self.verify,
            archive_path: self.archive_path.trim_end_matches('/').to_string(),
        })
    }
}

/// Parse a size with an optional decimal unit suffix: `1200`, `500K`, `10G`
pub fn parse_size(text: &str) -> Result<u64> {
    let trimmed = text.trim();
    let (digits, multiplier) = match trimmed.chars().last() {
        Some(c) if c.is_ascii_digit() => (trimmed, 1u64),
        Some(c) => {
            let multiplier = match c.to_ascii_uppercase() {
                'K' => 1_000,
                'M' => 1_000_000,
                'G' => 1_000_000_000,
                'T' => 1_000_000_000_000,
                _ => {
                    return Err(PackError::Config(format!(
                        "unknown size suffix in '{}'",
                        text
                    )))
                }
            };
            (&trimmed[..trimmed.len() - c.len_utf8()], multiplier)
        }
        None => return Err(PackError::Config("empty size".to_string())),
    };

    let value: u64 = digits
        .trim()
        .parse()
        .map_err(|_| PackError::Config(format!("invalid size '{}'", text)))?;

    value
        .checked_mul(multiplier)
        .ok_or_else(|| PackError::Config(format!("size '{}' overflows", text)))
}
