//! Batch tokenizers.
//!
//! Each tokenizer is a one-pass producer of [`Batch`]es. A batch is the
//! unit committed in one transaction; construct a new tokenizer to iterate
//! again.

mod day;
mod identity;
mod record;
#[cfg(test)]
mod scripted;

pub use day::DayTokenizer;
pub use identity::{IdentitySettings, IdentityTokenizer};
pub use record::RecordTokenizer;

use super::template::ResolvedDetail;

/// Resolved details making up one bounded unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Human-readable description, written to the batch log.
    pub label: String,
    pub details: Vec<ResolvedDetail>,
}
