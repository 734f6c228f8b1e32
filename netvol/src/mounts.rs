//! Host mount table access.
//!
//! Mount consults the table before attaching so that a mountpoint that is
//! already in use is never attached twice.

use std::fs;
use std::path::{Path, PathBuf};

use netvol_shared::errors::{NetvolError, NetvolResult};

/// Default mount table on Linux.
pub const PROC_MOUNTS: &str = "/proc/self/mounts";

/// Read access to the set of active mount targets.
pub trait MountTable: Send + Sync {
    /// Targets (mount directories) of every active mount.
    fn targets(&self) -> NetvolResult<Vec<PathBuf>>;

    /// Whether some active mount has exactly `path` as its target.
    fn is_mounted(&self, path: &Path) -> NetvolResult<bool> {
        Ok(self.targets()?.iter().any(|target| target == path))
    }
}

/// Mount table backed by a `/proc/mounts`-format file.
#[derive(Debug, Clone)]
pub struct ProcMountTable {
    path: PathBuf,
}

impl ProcMountTable {
    pub fn new() -> Self {
        Self::at(PROC_MOUNTS)
    }

    /// Read the table from another file in the same format.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for ProcMountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable for ProcMountTable {
    fn targets(&self) -> NetvolResult<Vec<PathBuf>> {
        let content = fs::read_to_string(&self.path).map_err(|e| {
            NetvolError::Filesystem(format!(
                "failed to read mount table {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(parse_mount_targets(&content))
    }
}

/// Extract the target column from `/proc/mounts`-format content.
///
/// Lines with fewer than two fields are ignored.
pub fn parse_mount_targets(content: &str) -> Vec<PathBuf> {
    content
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_octal(field)))
        .collect()
}

// The kernel escapes space, tab, newline and backslash as \ooo.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\'
            && i + 3 < bytes.len()
            && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b))
        {
            let value = (bytes[i + 1] - b'0') as u32 * 64
                + (bytes[i + 2] - b'0') as u32 * 8
                + (bytes[i + 3] - b'0') as u32;
            if let Ok(byte) = u8::try_from(value) {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
