//! Persistent scan history
//!
//! A JSON object mapping each run's timestamp to the fingerprints it
//! submitted:
//!
//! ```json
//! { "2024-05-01_10-00-00": ["9f86d0...", "..."] }
//! ```
//!
//! Incremental runs skip any fingerprint found under any timestamp.

use crate::error::CollectorError;
use crate::fingerprint::Fingerprint;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct ScanHistory {
    runs: BTreeMap<String, Vec<Fingerprint>>,
}

impl ScanHistory {
    /// Union of fingerprints across every recorded run
    pub fn known_fingerprints(&self) -> HashSet<Fingerprint> {
        self.runs.values().flatten().cloned().collect()
    }

    /// Record a run's fingerprints; a repeated stamp extends the existing entry
    pub fn record_run(&mut self, stamp: &str, fingerprints: &[Fingerprint]) {
        let entry = self.runs.entry(stamp.to_string()).or_default();
        for fp in fingerprints {
            if !entry.contains(fp) {
                entry.push(fp.clone());
            }
        }
    }

    /// Runs in timestamp order
    pub fn runs(&self) -> impl Iterator<Item = (&str, &[Fingerprint])> {
        self.runs.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

/// File-backed history store
#[derive(Debug, Clone)]
pub struct ScanHistoryStore {
    path: PathBuf,
}

impl ScanHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the history; a missing file is an empty history
    ///
    /// A file that exists but cannot be parsed is an error, so callers never
    /// overwrite a history they could not read.
    pub fn load(&self) -> Result<ScanHistory, CollectorError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No scan history at {}", self.path.display());
                return Ok(ScanHistory::default());
            }
            Err(e) => return Err(CollectorError::persistence(&self.path, e)),
        };
        if content.trim().is_empty() {
            return Ok(ScanHistory::default());
        }
        serde_json::from_str(&content).map_err(|e| CollectorError::persistence(&self.path, e))
    }

    /// Append one run's fingerprints and rewrite the file
    ///
    /// The file is re-read first so entries written by earlier runs are kept.
    /// The write goes to a sibling temp file that is renamed over the target.
    pub fn append_run(
        &self,
        stamp: &str,
        fingerprints: &[Fingerprint],
    ) -> Result<ScanHistory, CollectorError> {
        let mut history = self.load()?;
        history.record_run(stamp, fingerprints);
        self.save(&history)?;
        debug!(
            "Recorded {} fingerprint(s) for run {} in {}",
            fingerprints.len(),
            stamp,
            self.path.display()
        );
        Ok(history)
    }

    fn save(&self, history: &ScanHistory) -> Result<(), CollectorError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| CollectorError::persistence(parent, e))?;
        }
        let json = serde_json::to_string_pretty(history)
            .map_err(|e| CollectorError::persistence(&self.path, e))?;

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, json).map_err(|e| CollectorError::persistence(&tmp_path, e))?;
        fs::rename(&tmp_path, &self.path).map_err(|e| CollectorError::persistence(&self.path, e))
    }
}
