//! Running containers as sources, through a Docker-compatible CLI
//!
//! `ps` lists sources, `diff` gives each container's changes against its
//! image, `exec stat` probes a path inside the container's namespace and
//! `cp` stages a copy of its bytes.

use super::{ChangeKind, ChangeRecord, EntryKind, FileProbe, Source, SourceRuntime};
use crate::error::CollectorError;
use crate::staging::StagingArea;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::{Command, Output};
use tracing::{debug, warn};

pub struct ContainerRuntime {
    cli: String,
}

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Names", default)]
    names: String,
}

impl ContainerRuntime {
    /// Runtime driven by `cli` (`docker`, `podman`, ...)
    pub fn new(cli: impl Into<String>) -> Self {
        Self { cli: cli.into() }
    }

    fn run(&self, args: &[&str]) -> std::io::Result<Output> {
        debug!("Running {} {}", self.cli, args.join(" "));
        Command::new(&self.cli).args(args).output()
    }

    fn is_running(&self, id: &str) -> Option<bool> {
        let output = self
            .run(&["inspect", "-f", "{{.State.Running}}", id])
            .ok()?;
        if !output.status.success() {
            return None;
        }
        Some(String::from_utf8_lossy(&output.stdout).trim() == "true")
    }

    /// `test`-based fallback for images without `stat`
    fn probe_with_test(&self, record: &ChangeRecord) -> Result<FileProbe, CollectorError> {
        let path = record.path.to_string_lossy();
        let test = |flag: &str| -> Result<bool, CollectorError> {
            let output = self
                .run(&["exec", &record.source_id, "test", flag, &path])
                .map_err(|e| CollectorError::extraction(&record.path, e))?;
            match output.status.code() {
                Some(0) => Ok(true),
                Some(1) => Ok(false),
                _ => Err(CollectorError::extraction(
                    &record.path,
                    format!(
                        "exec test failed: {}",
                        String::from_utf8_lossy(&output.stderr).trim()
                    ),
                )),
            }
        };

        let kind = if test("-L")? {
            EntryKind::Symlink
        } else if test("-f")? {
            EntryKind::Regular
        } else {
            EntryKind::Other
        };
        Ok(FileProbe {
            kind,
            size_bytes: None,
            mtime: None,
        })
    }
}

/// Parse `ps --format '{{json .}}'` output, one object per line
pub fn parse_ps_output(stdout: &str) -> Result<Vec<Source>, serde_json::Error> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let entry: PsEntry = serde_json::from_str(line)?;
            let label = if entry.names.is_empty() {
                entry.image
            } else {
                format!("{} ({})", entry.names, entry.image)
            };
            Ok(Source {
                id: entry.id,
                label,
            })
        })
        .collect()
}

/// Parse `diff` output lines such as `A /etc/app.conf`
///
/// Unknown status letters and malformed lines are skipped.
pub fn parse_diff_output(source_id: &str, stdout: &str) -> Vec<ChangeRecord> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut chars = line.chars();
            let kind = ChangeKind::from_diff_code(chars.next()?)?;
            let path = chars.as_str().trim();
            if !path.starts_with('/') {
                return None;
            }
            Some(ChangeRecord::new(source_id, path, kind))
        })
        .collect()
}

/// Parse `stat -c '%F|%s|%Y'` output
pub fn parse_stat_output(stdout: &str) -> Option<FileProbe> {
    let mut fields = stdout.trim().splitn(3, '|');
    let file_type = fields.next()?;
    let size = fields.next()?.trim().parse::<u64>().ok();
    let mtime = fields
        .next()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0));

    let kind = if file_type.starts_with("regular") {
        EntryKind::Regular
    } else if file_type == "symbolic link" {
        EntryKind::Symlink
    } else if file_type == "directory" {
        EntryKind::Directory
    } else {
        EntryKind::Other
    };
    Some(FileProbe {
        kind,
        size_bytes: size,
        mtime,
    })
}

impl SourceRuntime for ContainerRuntime {
    fn list_sources(&self) -> Result<Vec<Source>, CollectorError> {
        let enumeration = |message: String| CollectorError::SourceEnumeration {
            source_id: self.cli.clone(),
            message,
        };
        let output = self
            .run(&["ps", "--format", "{{json .}}"])
            .map_err(|e| enumeration(format!("cannot run {} ps: {}", self.cli, e)))?;
        if !output.status.success() {
            return Err(enumeration(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        parse_ps_output(&String::from_utf8_lossy(&output.stdout))
            .map_err(|e| enumeration(format!("unexpected ps output: {}", e)))
    }

    fn changes(&self, source: &Source) -> Result<Vec<ChangeRecord>, CollectorError> {
        let output = self.run(&["diff", &source.id]).map_err(|e| {
            CollectorError::SourceEnumeration {
                source_id: source.id.clone(),
                message: e.to_string(),
            }
        })?;
        if !output.status.success() {
            return Err(CollectorError::SourceEnumeration {
                source_id: source.id.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(parse_diff_output(
            &source.id,
            &String::from_utf8_lossy(&output.stdout),
        ))
    }

    fn probe(&self, record: &ChangeRecord) -> Result<FileProbe, CollectorError> {
        let path = record.path.to_string_lossy();
        let output = self
            .run(&["exec", &record.source_id, "stat", "-c", "%F|%s|%Y", "--", &path])
            .map_err(|e| CollectorError::extraction(&record.path, e))?;
        if output.status.success() {
            if let Some(probe) = parse_stat_output(&String::from_utf8_lossy(&output.stdout)) {
                return Ok(probe);
            }
        }
        debug!(
            "stat unavailable for {}; falling back to test",
            record.identifier()
        );
        self.probe_with_test(record)
    }

    fn extract(
        &self,
        record: &ChangeRecord,
        staging: &StagingArea,
    ) -> Result<PathBuf, CollectorError> {
        let staged = staging.path_for(record);
        staging.prepare(&staged)?;

        let source = format!("{}:{}", record.source_id, record.path.display());
        let dest = staged.to_string_lossy();
        let output = self
            .run(&["cp", &source, &dest])
            .map_err(|e| CollectorError::extraction(&record.path, e))?;
        if output.status.success() {
            return Ok(staged);
        }

        let mut message = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if self.is_running(&record.source_id) == Some(false) {
            warn!("Container {} stopped during collection", record.source_id);
            message = format!("container {} is no longer running: {}", record.source_id, message);
        }
        Err(CollectorError::extraction(&record.path, message))
    }
}
