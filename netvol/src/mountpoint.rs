//! Local mountpoint tree.
//!
//! One subdirectory of the root per live volume. The directory is both the
//! marker that the volume exists and the path reported to the host.

use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use netvol_shared::errors::{NetvolError, NetvolResult};

/// Permission bits for created directories (not world-writable).
pub const DIR_MODE: u32 = 0o755;

#[derive(Debug, Clone)]
pub struct MountpointStore {
    root: PathBuf,
}

impl MountpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Mountpoint for a target name. Pure.
    pub fn path_for(&self, target: &str) -> PathBuf {
        self.root.join(target)
    }

    /// Create `path` (and parents) unless it already is a directory.
    ///
    /// Returns `true` if this call created it. Symlinks are not followed: a
    /// symlink at `path` is a collision.
    pub fn ensure_directory(&self, path: &Path) -> NetvolResult<bool> {
        ensure_directory(path)
    }

    /// Return `path` if it exists.
    pub fn resolve_existing(&self, path: &Path) -> NetvolResult<PathBuf> {
        match fs::symlink_metadata(path) {
            Ok(_) => Ok(path.to_path_buf()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(NetvolError::NotFound(format!("{}", path.display())))
            }
            Err(e) => Err(NetvolError::Filesystem(format!(
                "could not stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Remove an (empty) mountpoint directory.
    pub fn remove(&self, path: &Path) -> NetvolResult<()> {
        tracing::debug!(path = %path.display(), "rmdir");
        fs::remove_dir(path).map_err(|e| {
            NetvolError::Filesystem(format!("failed to remove {}: {}", path.display(), e))
        })
    }

    /// Names of the immediate subdirectories of the root.
    ///
    /// Order follows the filesystem and is not stable.
    pub fn list_subdirectories(&self) -> NetvolResult<Vec<String>> {
        let meta = fs::metadata(&self.root).map_err(|e| {
            NetvolError::Filesystem(format!(
                "problem stating directory {}: {}",
                self.root.display(),
                e
            ))
        })?;
        if !meta.is_dir() {
            return Err(NetvolError::NotADirectory(format!(
                "{}",
                self.root.display()
            )));
        }

        let entries = fs::read_dir(&self.root).map_err(|e| {
            NetvolError::Filesystem(format!(
                "problem opening directory {}: {}",
                self.root.display(),
                e
            ))
        })?;

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| {
                NetvolError::Filesystem(format!(
                    "problem reading directory {}: {}",
                    self.root.display(),
                    e
                ))
            })?;
            let file_type = entry.file_type().map_err(|e| {
                NetvolError::Filesystem(format!(
                    "problem stating {}: {}",
                    entry.path().display(),
                    e
                ))
            })?;
            if !file_type.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    tracing::warn!(name = ?raw, "skipping non UTF-8 directory name");
                }
            }
        }
        Ok(names)
    }
}

/// Create `path` with [`DIR_MODE`] unless it is already a directory.
///
/// Shared by the mountpoint store and driver bootstrap.
pub(crate) fn ensure_directory(path: &Path) -> NetvolResult<bool> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(false),
        Ok(_) => Err(NetvolError::NotADirectory(format!("{}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => fs::DirBuilder::new()
            .recursive(true)
            .mode(DIR_MODE)
            .create(path)
            .map(|()| true)
            .map_err(|e| {
                NetvolError::Filesystem(format!(
                    "failed to create directory {}: {}",
                    path.display(),
                    e
                ))
            }),
        Err(e) => Err(NetvolError::Filesystem(format!(
            "could not stat {}: {}",
            path.display(),
            e
        ))),
    }
}
