//! Host filesystem as a single source
//!
//! Every non-directory entry under the walk roots is a candidate. Excluded
//! directories (hard skips, network and pseudo mounts, cloud-sync folders)
//! are pruned before descent; symlinks are never followed. Files are
//! submitted from where they are, without a staged copy.

use super::{ChangeKind, ChangeRecord, EntryKind, FileProbe, Source, SourceRuntime};
use crate::error::CollectorError;
use crate::exclusion::ExclusionPolicy;
use crate::staging::StagingArea;
use chrono::{DateTime, Utc};
use std::fs::{self, File};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

pub struct HostRuntime {
    roots: Vec<PathBuf>,
    source_name: String,
    policy: Arc<ExclusionPolicy>,
}

impl HostRuntime {
    pub fn new(roots: Vec<PathBuf>, source_name: impl Into<String>, policy: Arc<ExclusionPolicy>) -> Self {
        Self {
            roots,
            source_name: source_name.into(),
            policy,
        }
    }

    /// Host name as reported by the OS, if any
    pub fn local_host_name() -> Option<String> {
        sysinfo::System::host_name().filter(|name| !name.is_empty())
    }
}

fn entry_kind(file_type: fs::FileType) -> EntryKind {
    if file_type.is_symlink() {
        EntryKind::Symlink
    } else if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_file() {
        EntryKind::Regular
    } else {
        EntryKind::Other
    }
}

impl SourceRuntime for HostRuntime {
    fn list_sources(&self) -> Result<Vec<Source>, CollectorError> {
        Ok(vec![Source {
            id: self.source_name.clone(),
            label: "host".to_string(),
        }])
    }

    fn changes(&self, source: &Source) -> Result<Vec<ChangeRecord>, CollectorError> {
        let mut records = Vec::new();
        let mut walked = 0usize;
        for root in &self.roots {
            if !root.exists() {
                warn!("Walk root {} does not exist, skipping", root.display());
                continue;
            }
            walked += 1;
            let walker = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_entry(|entry| {
                    if !entry.file_type().is_dir() {
                        return true;
                    }
                    match self.policy.prunes_dir(entry.path()) {
                        Some(rule) => {
                            debug!("Not descending into {}: {}", entry.path().display(), rule);
                            false
                        }
                        None => true,
                    }
                });
            for entry in walker {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!("Walk error: {}", e);
                        continue;
                    }
                };
                if entry.file_type().is_dir() {
                    continue;
                }
                records.push(ChangeRecord::new(
                    &source.id,
                    entry.into_path(),
                    ChangeKind::Added,
                ));
            }
        }
        if walked == 0 && !self.roots.is_empty() {
            return Err(CollectorError::SourceEnumeration {
                source_id: source.id.clone(),
                message: "none of the walk roots exist".to_string(),
            });
        }
        Ok(records)
    }

    fn probe(&self, record: &ChangeRecord) -> Result<FileProbe, CollectorError> {
        let metadata = fs::symlink_metadata(&record.path)
            .map_err(|e| CollectorError::extraction(&record.path, e))?;
        Ok(FileProbe {
            kind: entry_kind(metadata.file_type()),
            size_bytes: Some(metadata.len()),
            mtime: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    fn extract(
        &self,
        record: &ChangeRecord,
        _staging: &StagingArea,
    ) -> Result<PathBuf, CollectorError> {
        // Scanned in place; only confirm it can still be read
        File::open(&record.path).map_err(|e| CollectorError::extraction(&record.path, e))?;
        Ok(record.path.clone())
    }
}
