//! A change record on its way through the pipeline

use crate::fingerprint::Fingerprint;
use crate::source::{ChangeRecord, EntryKind, FileProbe};
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// A change record plus whatever has been learned about it so far
///
/// Metadata fields start empty and are filled by probing, extraction and
/// hashing. Filters treat an unknown field as passing.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub record: ChangeRecord,
    pub entry_kind: Option<EntryKind>,
    pub size_bytes: Option<u64>,
    pub mtime: Option<DateTime<Utc>>,
    pub staged_path: Option<PathBuf>,
    pub fingerprint: Option<Fingerprint>,
}

impl Candidate {
    pub fn new(record: ChangeRecord) -> Self {
        Self {
            record,
            entry_kind: None,
            size_bytes: None,
            mtime: None,
            staged_path: None,
            fingerprint: None,
        }
    }

    pub fn apply_probe(&mut self, probe: FileProbe) {
        self.entry_kind = Some(probe.kind);
        if probe.size_bytes.is_some() {
            self.size_bytes = probe.size_bytes;
        }
        if probe.mtime.is_some() {
            self.mtime = probe.mtime;
        }
    }

    pub fn identifier(&self) -> String {
        self.record.identifier()
    }
}
