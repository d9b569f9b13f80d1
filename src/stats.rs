//! Per-run counters

use crate::filter::SkipReason;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one run and shared with its worker pools
#[derive(Debug, Default)]
pub struct RunStats {
    discovered: AtomicU64,
    deleted: AtomicU64,
    irregular: AtomicU64,
    excluded: AtomicU64,
    wrong_type: AtomicU64,
    too_big: AtomicU64,
    too_old: AtomicU64,
    duplicates: AtomicU64,
    already_scanned: AtomicU64,
    extraction_errors: AtomicU64,
    submitted: AtomicU64,
    submission_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub discovered: u64,
    pub deleted: u64,
    pub irregular: u64,
    pub excluded: u64,
    pub wrong_type: u64,
    pub too_big: u64,
    pub too_old: u64,
    pub duplicates: u64,
    pub already_scanned: u64,
    pub extraction_errors: u64,
    pub submitted: u64,
    pub submission_errors: u64,
}

impl StatsSnapshot {
    /// Candidates dropped before submission for any reason
    pub fn skipped(&self) -> u64 {
        self.deleted
            + self.irregular
            + self.excluded
            + self.wrong_type
            + self.too_big
            + self.too_old
            + self.duplicates
            + self.already_scanned
            + self.extraction_errors
    }
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_error(&self) {
        self.submission_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_skip(&self, reason: &SkipReason) {
        let counter = match reason {
            SkipReason::Deleted => &self.deleted,
            SkipReason::NotRegularFile => &self.irregular,
            SkipReason::Excluded { .. } => &self.excluded,
            SkipReason::WrongType => &self.wrong_type,
            SkipReason::TooBig { .. } => &self.too_big,
            SkipReason::TooOld { .. } => &self.too_old,
            SkipReason::Duplicate { .. } => &self.duplicates,
            SkipReason::AlreadyScanned => &self.already_scanned,
            SkipReason::Unreadable { .. } => &self.extraction_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            discovered: load(&self.discovered),
            deleted: load(&self.deleted),
            irregular: load(&self.irregular),
            excluded: load(&self.excluded),
            wrong_type: load(&self.wrong_type),
            too_big: load(&self.too_big),
            too_old: load(&self.too_old),
            duplicates: load(&self.duplicates),
            already_scanned: load(&self.already_scanned),
            extraction_errors: load(&self.extraction_errors),
            submitted: load(&self.submitted),
            submission_errors: load(&self.submission_errors),
        }
    }
}
