//! Compiled name patterns
//!
//! Bin definitions carry four regular expressions. They are compiled once, at
//! load time. Name and tag patterns match the whole subject; path patterns
//! match a leading part of the directory, so a directory pattern also covers
//! everything below it.

use std::fmt;

use regex::Regex;

use crate::error::{PackError, Result};

/// A compiled, anchored regular expression
#[derive(Clone)]
pub struct Pattern {
    source: String,
    /// `None` accepts every subject
    regex: Option<Regex>,
}

impl Pattern {
    /// Compile `source`, anchored at both ends
    pub fn new(source: &str) -> Result<Self> {
        Self::compile(source, "$")
    }

    /// Compile `source`, anchored at the start only
    pub fn prefix(source: &str) -> Result<Self> {
        Self::compile(source, "")
    }

    fn compile(source: &str, end: &str) -> Result<Self> {
        if source == ".*" {
            return Ok(Self::any());
        }
        let regex = Regex::new(&format!("^(?:{}){}", source, end))
            .map_err(|e| PackError::Config(format!("invalid pattern '{}': {}", source, e)))?;
        Ok(Self {
            source: source.to_string(),
            regex: Some(regex),
        })
    }

    /// Pattern that accepts anything, including an absent tag
    pub fn any() -> Self {
        Self {
            source: ".*".to_string(),
            regex: None,
        }
    }

    pub fn is_match(&self, subject: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(subject),
            None => true,
        }
    }

    /// Match an optional tag; an absent tag is treated as the empty string
    pub fn is_match_opt(&self, subject: Option<&str>) -> bool {
        self.is_match(subject.unwrap_or(""))
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl fmt::Debug for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pattern({:?})", self.source)
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}
