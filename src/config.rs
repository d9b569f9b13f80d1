//! Collector configuration
//!
//! Defaults, optionally overridden by a TOML file and then by CLI flags.
//! Sizes are in bytes; the CLI accepts human units and converts them.

use crate::error::CollectorError;
use crate::exclusion::{DEFAULT_CLOUD_FOLDER_PATTERNS, DEFAULT_EXCLUDE_PATTERNS, DEFAULT_HARD_SKIPS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MAX_SIZE_BYTES: u64 = 20 * 1024 * 1024;
pub const DEFAULT_MAX_AGE_DAYS: u64 = 14;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_AFTER_SECS: u64 = 30;
pub const DEFAULT_BACKOFF_BASE_SECS: u64 = 2;
pub const DEFAULT_MAX_RETRY_WAIT_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CollectorConfig {
    /// Base URL of the scanning engine, e.g. `http://scanner:8080`
    pub server: String,
    /// Source name reported for host collection (defaults to the host name)
    pub source: Option<String>,
    /// Use the synchronous check endpoint and keep full verdicts
    pub sync: bool,
    /// Run the pipeline without sending anything
    pub dry_run: bool,
    /// Concurrent submissions
    pub threads: usize,
    /// Probe/extract/hash workers
    pub workers: usize,
    /// Largest file submitted, in bytes; 0 disables the check
    pub max_size_bytes: u64,
    /// Oldest modification time accepted, in days; 0 disables the check
    pub max_age_days: u64,
    /// Only collect files ending with one of these (empty collects everything)
    pub extensions: Vec<String>,
    pub exclude_patterns: Vec<String>,
    pub hard_skips: Vec<PathBuf>,
    pub cloud_folder_patterns: Vec<String>,
    /// Walk into network and pseudo filesystems too
    pub all_filesystems: bool,
    /// Skip content already recorded in the scan history
    pub incremental: bool,
    /// Record this run's submissions in the scan history
    pub save_history: bool,
    pub max_retries: u32,
    pub backoff_base_secs: u64,
    pub default_retry_after_secs: u64,
    /// Longest single wait between attempts; caps `Retry-After` and backoff
    pub max_retry_wait_secs: u64,
    pub request_timeout_secs: u64,
    /// 0 means unlimited
    pub uploads_per_minute: u32,
    /// Bracket the run with begin/end collection markers
    pub collection_markers: bool,
    pub insecure: bool,
    pub ca_files: Vec<PathBuf>,
    pub proxy: Option<String>,
    /// Docker-compatible CLI used in container mode
    pub container_cli: String,
    /// Walk roots in host mode
    pub roots: Vec<PathBuf>,
    pub lock_file: PathBuf,
    pub history_file: PathBuf,
    pub results_dir: PathBuf,
    pub staging_dir: PathBuf,
    /// Keep staged copies after the run
    pub keep_staged: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Self {
            server: String::new(),
            source: None,
            sync: false,
            dry_run: false,
            threads: 1,
            workers: default_workers(),
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_age_days: DEFAULT_MAX_AGE_DAYS,
            extensions: Vec::new(),
            exclude_patterns: DEFAULT_EXCLUDE_PATTERNS.iter().map(|s| s.to_string()).collect(),
            hard_skips: DEFAULT_HARD_SKIPS.iter().map(PathBuf::from).collect(),
            cloud_folder_patterns: DEFAULT_CLOUD_FOLDER_PATTERNS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            all_filesystems: false,
            incremental: true,
            save_history: true,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base_secs: DEFAULT_BACKOFF_BASE_SECS,
            default_retry_after_secs: DEFAULT_RETRY_AFTER_SECS,
            max_retry_wait_secs: DEFAULT_MAX_RETRY_WAIT_SECS,
            request_timeout_secs: 120,
            uploads_per_minute: 0,
            collection_markers: true,
            insecure: false,
            ca_files: Vec::new(),
            proxy: None,
            container_cli: "docker".to_string(),
            roots: vec![PathBuf::from("/")],
            lock_file: data_dir.join("diff-collector.lock"),
            history_file: data_dir.join("scan_history.json"),
            results_dir: data_dir.join("results"),
            staging_dir: data_dir.join("staging"),
            keep_staged: false,
        }
    }
}

impl CollectorConfig {
    /// Load a TOML config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: CollectorConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    pub fn validate(&self) -> Result<(), CollectorError> {
        if self.server.trim().is_empty() && !self.dry_run {
            return Err(CollectorError::Config(
                "server: not specified (required unless dry_run is set)".into(),
            ));
        }
        if self.threads == 0 {
            return Err(CollectorError::Config("threads: count must be > 0".into()));
        }
        if self.workers == 0 {
            return Err(CollectorError::Config("workers: count must be > 0".into()));
        }
        if self.max_retry_wait_secs == 0 {
            return Err(CollectorError::Config(
                "max_retry_wait_secs: must be > 0".into(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CollectorError::Config(
                "request_timeout_secs: must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Server URL without a trailing slash
    pub fn server_url(&self) -> &str {
        self.server.trim().trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn max_age(&self) -> Option<chrono::Duration> {
        if self.max_age_days == 0 {
            None
        } else {
            Some(chrono::Duration::days(self.max_age_days as i64))
        }
    }

    /// Minimum spacing between uploads, if rate limited
    pub fn min_upload_period(&self) -> Option<Duration> {
        if self.uploads_per_minute == 0 {
            None
        } else {
            Some(Duration::from_secs(60) / self.uploads_per_minute)
        }
    }
}

/// Parse a human size such as `20MB`, `512 KiB` or a bare byte count
pub fn parse_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    if let Ok(bytes) = trimmed.parse::<u64>() {
        return Ok(bytes);
    }
    trimmed
        .parse::<bytesize::ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("invalid size '{}': {}", input, e))
}

/// Data directory for lock, history, staging and results
///
/// Location: ~/.local/share/diff-collector (Linux), falling back to the
/// system temp directory when no home is available.
fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "diff-collector")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| std::env::temp_dir().join("diff-collector"))
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get().min(8))
        .unwrap_or(4)
}
