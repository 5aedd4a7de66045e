//! Flush policy evaluation logic.

use std::time::Duration;

use crate::matcher::BinDefinition;

/// Why a bin is due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Reached its target size and is past the minimum age
    Size,
    /// Reached the maximum age
    Age,
}

/// Evaluate whether a bin of `size` bytes and `age` should flush.
///
/// `(size >= target && age >= min_age) || age >= max_age`
pub fn flush_reason(definition: &BinDefinition, size: u64, age: Duration) -> Option<FlushReason> {
    if age >= definition.max_age {
        return Some(FlushReason::Age);
    }
    if size >= definition.archive_size && age >= definition.min_age {
        return Some(FlushReason::Size);
    }
    None
}

pub fn should_flush(definition: &BinDefinition, size: u64, age: Duration) -> bool {
    flush_reason(definition, size, age).is_some()
}
