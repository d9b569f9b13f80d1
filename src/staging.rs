//! Local staging area and artifact extraction
//!
//! Container files are copied to `<staging_dir>/diff_<stamp>/<source>/<path>`
//! so that identical paths from different sources never collide. Host files
//! are scanned in place and never written to the staging area.

use crate::candidate::Candidate;
use crate::error::CollectorError;
use crate::source::{ChangeRecord, SourceRuntime};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Staging area for one run
    pub fn for_run(staging_dir: &Path, stamp: &str) -> Self {
        Self {
            root: staging_dir.join(format!("diff_{}", stamp)),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where a record's bytes are staged
    pub fn path_for(&self, record: &ChangeRecord) -> PathBuf {
        let mut staged = self.root.join(sanitize_component(&record.source_id));
        for component in record.path.components() {
            // Drop root and `..` so a hostile path cannot escape the staging root
            if let Component::Normal(part) = component {
                staged.push(part);
            }
        }
        staged
    }

    /// Create the parent directories of a staged path
    pub fn prepare(&self, staged: &Path) -> Result<(), CollectorError> {
        if let Some(parent) = staged.parent() {
            fs::create_dir_all(parent).map_err(|e| CollectorError::extraction(staged, e))?;
        }
        Ok(())
    }

    /// Remove this run's staged copies
    pub fn cleanup(&self) {
        if !self.root.exists() {
            return;
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => debug!("Removed staging area {}", self.root.display()),
            Err(e) => warn!(
                "Could not remove staging area {}: {}",
                self.root.display(),
                e
            ),
        }
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c => c,
        })
        .collect()
}

/// Materializes candidates through a runtime into a staging area
pub struct ArtifactExtractor<'a> {
    runtime: &'a dyn SourceRuntime,
    staging: &'a StagingArea,
}

impl<'a> ArtifactExtractor<'a> {
    pub fn new(runtime: &'a dyn SourceRuntime, staging: &'a StagingArea) -> Self {
        Self { runtime, staging }
    }

    /// Stage the candidate's bytes and fill in size and mtime from the copy
    ///
    /// A staged path that is not a regular file is rejected, so a link that
    /// slipped past the probe is never hashed or submitted.
    pub fn extract(&self, candidate: &mut Candidate) -> Result<(), CollectorError> {
        let staged = self.runtime.extract(&candidate.record, self.staging)?;

        let metadata = fs::symlink_metadata(&staged)
            .map_err(|e| CollectorError::extraction(&candidate.record.path, e))?;
        if !metadata.file_type().is_file() {
            return Err(CollectorError::extraction(
                &candidate.record.path,
                "staged artifact is not a regular file",
            ));
        }

        candidate.size_bytes = Some(metadata.len());
        if candidate.mtime.is_none() {
            candidate.mtime = metadata.modified().ok().map(DateTime::<Utc>::from);
        }
        candidate.staged_path = Some(staged);
        Ok(())
    }
}
