//! Declarative exclusion rules
//!
//! The policy is an ordered list of rules. Directory rules prune a host walk
//! before descent; path rules drop individual candidates in the filter chain.

use crate::config::CollectorConfig;
use crate::error::CollectorError;
use crate::source::MountExclusionProvider;
use regex::Regex;
use std::fmt;
use std::path::{Path, PathBuf};

/// Path regexes skipped by default (VM images, lock files, package caches)
pub const DEFAULT_EXCLUDE_PATTERNS: &[&str] = &[
    r"^/proc",
    r"^/mnt",
    r"\.dat$",
    r"\.npm",
    r"\.vmdk$",
    r"\.vswp$",
    r"\.nvram$",
    r"\.vmsd$",
    r"\.lck$",
];

/// Absolute prefixes never entered nor collected
pub const DEFAULT_HARD_SKIPS: &[&str] = &["/proc", "/dev", "/sys"];

/// Directory names of cloud-sync clients; their contents are placeholders
/// that would be downloaded on read
pub const DEFAULT_CLOUD_FOLDER_PATTERNS: &[&str] = &[
    r"^OneDrive( - .+)?$",
    r"^Dropbox( \(.+\))?$",
    r"^Google Drive$",
    r"^iCloud Drive$",
    r"^Mobile Documents$",
    r"^Nextcloud$",
    r"^ownCloud$",
    r"^pCloud Drive$",
    r"^Box( Sync)?$",
];

#[derive(Debug, Clone)]
pub enum ExclusionRule {
    /// Regex over the full path, case-sensitive
    PathPattern(Regex),
    /// Absolute prefix, matched component-wise
    HardSkip(PathBuf),
    /// Network or pseudo filesystem mount point
    Mount(PathBuf),
    /// Regex over a directory's own name
    CloudFolder(Regex),
}

impl fmt::Display for ExclusionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExclusionRule::PathPattern(re) => write!(f, "pattern {}", re.as_str()),
            ExclusionRule::HardSkip(prefix) => write!(f, "hard skip {}", prefix.display()),
            ExclusionRule::Mount(mount) => write!(f, "excluded mount {}", mount.display()),
            ExclusionRule::CloudFolder(re) => write!(f, "cloud folder {}", re.as_str()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExclusionPolicy {
    rules: Vec<ExclusionRule>,
}

impl ExclusionPolicy {
    pub fn new(rules: Vec<ExclusionRule>) -> Self {
        Self { rules }
    }

    /// Build the policy from configuration and a mount probe
    ///
    /// Mount exclusions are skipped when `all_filesystems` is set.
    pub fn from_config(
        config: &CollectorConfig,
        mounts: &dyn MountExclusionProvider,
    ) -> Result<Self, CollectorError> {
        let mut rules = Vec::new();

        for prefix in &config.hard_skips {
            rules.push(ExclusionRule::HardSkip(prefix.clone()));
        }
        if !config.all_filesystems {
            for mount in mounts.excluded_mounts() {
                rules.push(ExclusionRule::Mount(mount));
            }
        }
        for pattern in &config.cloud_folder_patterns {
            rules.push(ExclusionRule::CloudFolder(compile(pattern)?));
        }
        for pattern in &config.exclude_patterns {
            rules.push(ExclusionRule::PathPattern(compile(pattern)?));
        }

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ExclusionRule] {
        &self.rules
    }

    /// First rule that prunes the directory before descent
    pub fn prunes_dir(&self, dir: &Path) -> Option<&ExclusionRule> {
        self.rules.iter().find(|rule| match rule {
            ExclusionRule::HardSkip(prefix) => dir.starts_with(prefix),
            ExclusionRule::Mount(mount) => dir.starts_with(mount),
            ExclusionRule::CloudFolder(re) => dir
                .file_name()
                .map(|name| re.is_match(&name.to_string_lossy()))
                .unwrap_or(false),
            ExclusionRule::PathPattern(_) => false,
        })
    }

    /// First rule that excludes an individual file path
    pub fn excludes_path(&self, path: &Path) -> Option<&ExclusionRule> {
        let path_str = path.to_string_lossy();
        self.rules.iter().find(|rule| match rule {
            ExclusionRule::HardSkip(prefix) => path.starts_with(prefix),
            ExclusionRule::PathPattern(re) => re.is_match(&path_str),
            ExclusionRule::Mount(_) | ExclusionRule::CloudFolder(_) => false,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, CollectorError> {
    Regex::new(pattern)
        .map_err(|e| CollectorError::Config(format!("invalid pattern '{}': {}", pattern, e)))
}
