//! Sources of change records
//!
//! A source is a scannable origin: the host filesystem or one running
//! container. Each runtime lists its sources and, per source, the files that
//! changed relative to its baseline.

pub mod docker;
pub mod host;
pub mod mounts;

use crate::error::CollectorError;
use crate::staging::StagingArea;
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::fmt;
use std::path::PathBuf;
use tracing::{info, warn};

pub use docker::ContainerRuntime;
pub use host::HostRuntime;
pub use mounts::{FixedMounts, MountExclusionProvider, MountTable};

/// A scannable origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub id: String,
    /// Human-readable description (image name, host name)
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
}

impl ChangeKind {
    /// Map a `docker diff` status letter
    pub fn from_diff_code(code: char) -> Option<Self> {
        match code {
            'A' => Some(ChangeKind::Added),
            'C' => Some(ChangeKind::Modified),
            'D' => Some(ChangeKind::Deleted),
            _ => None,
        }
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChangeKind::Added => "added",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
        };
        f.write_str(name)
    }
}

/// One changed path inside one source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRecord {
    pub source_id: String,
    pub path: PathBuf,
    pub kind: ChangeKind,
}

impl ChangeRecord {
    pub fn new(source_id: impl Into<String>, path: impl Into<PathBuf>, kind: ChangeKind) -> Self {
        Self {
            source_id: source_id.into(),
            path: path.into(),
            kind,
        }
    }

    /// Stable identifier used as the results key: `<source>:<path>`
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.source_id, self.path.display())
    }
}

/// File type as seen inside the source's namespace, without following links
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Regular,
    Directory,
    Symlink,
    Other,
}

/// Metadata a runtime can report before extraction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileProbe {
    pub kind: EntryKind,
    pub size_bytes: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
}

/// Capability consumed from the container runtime or the host
pub trait SourceRuntime: Send + Sync {
    /// List the sources that are currently active
    fn list_sources(&self) -> Result<Vec<Source>, CollectorError>;

    /// Changed paths in one source relative to its baseline
    fn changes(&self, source: &Source) -> Result<Vec<ChangeRecord>, CollectorError>;

    /// Entry type, size and mtime of a path, without following symlinks
    fn probe(&self, record: &ChangeRecord) -> Result<FileProbe, CollectorError>;

    /// Materialize the path's current bytes locally and return the staged path
    fn extract(&self, record: &ChangeRecord, staging: &StagingArea)
        -> Result<PathBuf, CollectorError>;
}

/// Enumerate every source; a failing source contributes nothing
///
/// Sources are diffed in parallel but the records keep source order.
pub fn enumerate_all(runtime: &dyn SourceRuntime) -> Vec<ChangeRecord> {
    let sources = match runtime.list_sources() {
        Ok(sources) => sources,
        Err(e) => {
            warn!("{}", e);
            return Vec::new();
        }
    };
    info!("Found {} active source(s)", sources.len());

    let per_source: Vec<Vec<ChangeRecord>> = sources
        .par_iter()
        .map(|source| match runtime.changes(source) {
            Ok(records) => {
                if records.is_empty() {
                    info!("No changes detected in {} ({})", source.id, source.label);
                } else {
                    info!(
                        "Found {} change(s) in {} ({})",
                        records.len(),
                        source.id,
                        source.label
                    );
                }
                records
            }
            Err(e) => {
                warn!("{}; skipping source", e);
                Vec::new()
            }
        })
        .collect();

    per_source.into_iter().flatten().collect()
}
