//! Ordered, short-circuiting candidate filters
//!
//! The chain is evaluated several times per candidate as it acquires
//! metadata (after enumeration, after probing, after extraction, after
//! deduplication). A filter whose input is still unknown passes, so every
//! evaluation is safe to repeat.

use crate::candidate::Candidate;
use crate::config::CollectorConfig;
use crate::exclusion::ExclusionPolicy;
use crate::fingerprint::Fingerprint;
use crate::source::{ChangeKind, EntryKind};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Why a candidate left the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    Deleted,
    NotRegularFile,
    Excluded { rule: String },
    WrongType,
    TooBig { size_bytes: u64, max_bytes: u64 },
    TooOld { age_days: i64 },
    Duplicate { original: String },
    AlreadyScanned,
    Unreadable { message: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Deleted => write!(f, "deleted"),
            SkipReason::NotRegularFile => write!(f, "not a regular file"),
            SkipReason::Excluded { rule } => write!(f, "excluded by {}", rule),
            SkipReason::WrongType => write!(f, "no matching extension"),
            SkipReason::TooBig {
                size_bytes,
                max_bytes,
            } => write!(f, "size {} bytes exceeds limit of {} bytes", size_bytes, max_bytes),
            SkipReason::TooOld { age_days } => write!(f, "last modified {} days ago", age_days),
            SkipReason::Duplicate { original } => write!(f, "duplicate of {}", original),
            SkipReason::AlreadyScanned => write!(f, "already scanned in a previous run"),
            SkipReason::Unreadable { message } => write!(f, "unreadable: {}", message),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Filter {
    /// Deleted paths have no content
    Deleted,
    /// Symlinks, sockets, devices, directories
    NotRegular,
    /// Path regexes and hard-skip prefixes
    PathPattern(Arc<ExclusionPolicy>),
    /// Extension allow-list
    Extension(Vec<String>),
    /// `size > max` in bytes
    MaxSize(u64),
    /// `now - mtime > max`
    MaxAge(chrono::Duration),
    /// Fingerprints recorded in earlier runs
    History(Arc<HashSet<Fingerprint>>),
}

impl Filter {
    pub fn check(&self, candidate: &Candidate, now: DateTime<Utc>) -> Option<SkipReason> {
        match self {
            Filter::Deleted => {
                (candidate.record.kind == ChangeKind::Deleted).then_some(SkipReason::Deleted)
            }
            Filter::NotRegular => match candidate.entry_kind {
                Some(kind) if kind != EntryKind::Regular => Some(SkipReason::NotRegularFile),
                _ => None,
            },
            Filter::PathPattern(policy) => policy
                .excludes_path(&candidate.record.path)
                .map(|rule| SkipReason::Excluded {
                    rule: rule.to_string(),
                }),
            Filter::Extension(extensions) => {
                let path = candidate.record.path.to_string_lossy();
                let wanted = extensions.iter().any(|ext| path.ends_with(ext.as_str()));
                (!wanted).then_some(SkipReason::WrongType)
            }
            Filter::MaxSize(max_bytes) => match candidate.size_bytes {
                Some(size_bytes) if size_bytes > *max_bytes => Some(SkipReason::TooBig {
                    size_bytes,
                    max_bytes: *max_bytes,
                }),
                _ => None,
            },
            Filter::MaxAge(max_age) => match candidate.mtime {
                Some(mtime) if now.signed_duration_since(mtime) > *max_age => {
                    Some(SkipReason::TooOld {
                        age_days: now.signed_duration_since(mtime).num_days(),
                    })
                }
                _ => None,
            },
            Filter::History(known) => match &candidate.fingerprint {
                Some(fingerprint) if known.contains(fingerprint) => {
                    Some(SkipReason::AlreadyScanned)
                }
                _ => None,
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    filters: Vec<Filter>,
}

impl FilterChain {
    /// Standard chain: deleted, type, path, extension, size, age, history
    ///
    /// Disabled checks (size 0, age 0, no extensions, no history) are left out.
    pub fn from_config(
        config: &CollectorConfig,
        policy: Arc<ExclusionPolicy>,
        known: Option<HashSet<Fingerprint>>,
    ) -> Self {
        let mut filters = vec![Filter::Deleted, Filter::NotRegular, Filter::PathPattern(policy)];
        if !config.extensions.is_empty() {
            filters.push(Filter::Extension(config.extensions.clone()));
        }
        if config.max_size_bytes > 0 {
            filters.push(Filter::MaxSize(config.max_size_bytes));
        }
        if let Some(max_age) = config.max_age() {
            filters.push(Filter::MaxAge(max_age));
        }
        if let Some(known) = known {
            filters.push(Filter::History(Arc::new(known)));
        }
        Self { filters }
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// First filter that rejects the candidate, in chain order
    pub fn evaluate(&self, candidate: &Candidate, now: DateTime<Utc>) -> Result<(), SkipReason> {
        match self.filters.iter().find_map(|f| f.check(candidate, now)) {
            Some(reason) => Err(reason),
            None => Ok(()),
        }
    }
}
