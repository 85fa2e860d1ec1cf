use std::collections::BTreeSet;

use serde::Serialize;

use super::{ReconciliationError, Result};
use crate::evidence::SourceId;

/// A regular file found by the enumeration. Identity is the absolute path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FileRecord {
    pub path: String,
    pub size_bytes: u64,
}

impl FileRecord {
    pub fn new(path: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            path: path.into(),
            size_bytes,
        }
    }
}

/// Used, unused and excluded files of one analysis, with their size totals.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UsagePartition {
    pub used: BTreeSet<FileRecord>,
    pub unused: BTreeSet<FileRecord>,
    pub excluded: BTreeSet<FileRecord>,
    pub total_size: u64,
    pub used_size: u64,
    pub unused_size: u64,
    pub excluded_size: u64,
    /// Evidence paths that matched no enumerated regular file.
    pub unmatched_evidence: BTreeSet<String>,
    /// Sources whose evidence was incomplete.
    pub degraded_sources: BTreeSet<SourceId>,
    /// Enumeration entries that could not be read.
    pub skipped_entries: usize,
    /// The listing hit its time limit, so files it never reached are absent.
    pub enumeration_truncated: bool,
}

impl UsagePartition {
    pub fn used_paths(&self) -> impl Iterator<Item = &str> {
        self.used.iter().map(|r| r.path.as_str())
    }

    pub fn file_count(&self) -> usize {
        self.used.len() + self.unused.len() + self.excluded.len()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded_sources.is_empty() || self.enumeration_truncated
    }
}

pub(super) fn checked_total<'a>(
    records: impl IntoIterator<Item = &'a FileRecord>,
    partition: &'static str,
) -> Result<u64> {
    records
        .into_iter()
        .try_fold(0u64, |acc, r| acc.checked_add(r.size_bytes))
        .ok_or(ReconciliationError::Overflow { partition })
}
