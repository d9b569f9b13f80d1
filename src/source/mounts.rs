//! Mount points the host walker must not descend into
//!
//! Network filesystems are slow and usually scanned from their own host;
//! pseudo filesystems expose kernel state rather than files.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Filesystem types backed by a remote server
pub const NETWORK_FILESYSTEMS: &[&str] = &[
    "nfs",
    "nfs4",
    "cifs",
    "smbfs",
    "smb3",
    "ncpfs",
    "afs",
    "ceph",
    "coda",
    "9p",
    "glusterfs",
    "lustre",
    "gpfs",
    "ocfs2",
    "davfs",
    "fuse.sshfs",
    "fuse.rclone",
    "fuse.s3fs",
    "vmblock",
    "xenfs",
];

/// Kernel pseudo filesystems
pub const PSEUDO_FILESYSTEMS: &[&str] = &[
    "proc",
    "sysfs",
    "devpts",
    "devtmpfs",
    "cgroup",
    "cgroup2",
    "debugfs",
    "tracefs",
    "securityfs",
    "pstore",
    "bpf",
    "binfmt_misc",
    "hugetlbfs",
    "mqueue",
    "efivarfs",
    "configfs",
    "fusectl",
    "selinuxfs",
    "smackfs",
    "autofs",
    "rpc_pipefs",
    "nsfs",
];

/// Supplies the set of mount points to prune during a host walk
pub trait MountExclusionProvider {
    fn excluded_mounts(&self) -> Vec<PathBuf>;
}

/// A fixed exclusion set, for tests and for container mode
#[derive(Debug, Clone, Default)]
pub struct FixedMounts(pub Vec<PathBuf>);

impl MountExclusionProvider for FixedMounts {
    fn excluded_mounts(&self) -> Vec<PathBuf> {
        self.0.clone()
    }
}

/// One line of the mount table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    pub fs_type: String,
}

impl MountEntry {
    pub fn is_network_or_pseudo(&self) -> bool {
        let fs_type = self.fs_type.as_str();
        NETWORK_FILESYSTEMS.contains(&fs_type) || PSEUDO_FILESYSTEMS.contains(&fs_type)
    }
}

/// The kernel mount table (`/proc/self/mounts`)
#[derive(Debug, Clone)]
pub struct MountTable {
    path: PathBuf,
}

impl Default for MountTable {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/proc/self/mounts"),
        }
    }
}

impl MountTable {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parse `/proc/mounts` formatted text
    pub fn parse(contents: &str) -> Vec<MountEntry> {
        contents
            .lines()
            .filter_map(|line| {
                let mut fields = line.split_whitespace();
                let _device = fields.next()?;
                let mount_point = fields.next()?;
                let fs_type = fields.next()?;
                Some(MountEntry {
                    mount_point: PathBuf::from(unescape_mount_field(mount_point)),
                    fs_type: fs_type.to_string(),
                })
            })
            .collect()
    }

    fn read(&self) -> Vec<MountEntry> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Self::parse(&contents),
            Err(e) => {
                debug!("Mount table {} unavailable: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }
}

impl MountExclusionProvider for MountTable {
    fn excluded_mounts(&self) -> Vec<PathBuf> {
        self.read()
            .into_iter()
            .filter(|entry| entry.is_network_or_pseudo())
            // Never prune the walk root itself
            .filter(|entry| entry.mount_point != Path::new("/"))
            .map(|entry| entry.mount_point)
            .collect()
    }
}

/// Decode the octal escapes (`\040` for space) used in the mount table
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(value) = decoded {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
