//! Single-host backend storing objects as directories.
//!
//! # On-disk layout
//!
//! ```text
//! <dataDir>/
//!   volumes/<target>/               # object contents
//!   snapshots/<target>/<snapshot>/  # full copies of the object
//! ```
//!
//! Attach bind-mounts `volumes/<target>` onto the mountpoint; detach unmounts
//! it. Both need Linux and CAP_SYS_ADMIN.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;
use walkdir::WalkDir;

use netvol_shared::errors::{NetvolError, NetvolResult};

use super::{SNAPSHOT_NAME_FORMAT, Snapshot, StorageBackend};
use crate::mountpoint;

pub(super) const NAME: &str = "local-dir";

const DEFAULT_PREFIX: &str = "netvol_";

/// Backend-specific keys of the configuration document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalDirConfig {
    pub data_dir: PathBuf,
}

impl LocalDirConfig {
    pub fn from_json(raw: &str) -> NetvolResult<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| {
            NetvolError::Config(format!("invalid {} configuration: {}", NAME, e))
        })?;
        if !config.data_dir.is_absolute() {
            return Err(NetvolError::Config(format!(
                "dataDir must be an absolute path, got: {}",
                config.data_dir.display()
            )));
        }
        Ok(config)
    }
}

pub struct LocalDirDriver {
    data_dir: PathBuf,
}

impl LocalDirDriver {
    /// Prepare the data directory layout.
    pub fn new(config: LocalDirConfig) -> NetvolResult<Self> {
        let driver = Self {
            data_dir: config.data_dir,
        };
        mountpoint::ensure_directory(&driver.volumes_dir())?;
        mountpoint::ensure_directory(&driver.snapshots_dir())?;
        Ok(driver)
    }

    fn volumes_dir(&self) -> PathBuf {
        self.data_dir.join("volumes")
    }

    fn snapshots_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    fn volume_path(&self, target: &str) -> PathBuf {
        self.volumes_dir().join(target)
    }

    fn snapshot_path(&self, target: &str, snapshot: &str) -> PathBuf {
        self.snapshots_dir().join(target).join(snapshot)
    }

    /// Timestamped snapshot name for `target` that no existing snapshot uses.
    /// Names taken within the same second get a `-N` suffix.
    fn fresh_snapshot(&self, target: &str, prefix: &str) -> NetvolResult<(String, PathBuf)> {
        let base = format!("{}{}", prefix, Utc::now().format(SNAPSHOT_NAME_FORMAT));
        (0u32..)
            .map(|n| match n {
                0 => base.clone(),
                n => format!("{}-{}", base, n),
            })
            .map(|name| {
                let path = self.snapshot_path(target, &name);
                (name, path)
            })
            .find(|(_, path)| !path.exists())
            .ok_or_else(|| NetvolError::Backend(format!("no free snapshot name for {}", base)))
    }

    fn require_volume(&self, target: &str) -> NetvolResult<PathBuf> {
        let path = self.volume_path(target);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(NetvolError::NotFound(format!("volume {}", target)))
        }
    }
}

impl StorageBackend for LocalDirDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn create(&self, target: &str, options: &HashMap<String, String>) -> NetvolResult<()> {
        let path = self.volume_path(target);
        if path.exists() {
            return Err(NetvolError::Backend(format!(
                "volume {} already exists",
                target
            )));
        }
        if !options.is_empty() {
            tracing::debug!(target = %target, ?options, "local-dir ignores create options");
        }
        mountpoint::ensure_directory(&path)?;
        tracing::info!(target = %target, path = %path.display(), "Created volume");
        Ok(())
    }

    fn create_clone(
        &self,
        target: &str,
        source: &str,
        snapshot: Option<&str>,
        snapshot_prefix: &str,
    ) -> NetvolResult<()> {
        let source_path = self.require_volume(source)?;
        let dest = self.volume_path(target);
        if dest.exists() {
            return Err(NetvolError::Backend(format!(
                "volume {} already exists",
                target
            )));
        }

        let snapshot_dir = match snapshot {
            Some(name) => {
                if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
                    return Err(NetvolError::InvalidArgument(format!(
                        "invalid snapshot name '{}'",
                        name
                    )));
                }
                let path = self.snapshot_path(source, name);
                if !path.is_dir() {
                    return Err(NetvolError::NotFound(format!(
                        "snapshot {} of volume {}",
                        name, source
                    )));
                }
                path
            }
            None => {
                let (name, path) = self.fresh_snapshot(source, snapshot_prefix)?;
                copy_tree(&source_path, &path)?;
                tracing::info!(source = %source, snapshot = %name, "Created snapshot");
                path
            }
        };

        if let Err(e) = copy_tree(&snapshot_dir, &dest) {
            let _ = fs::remove_dir_all(&dest);
            return Err(e);
        }
        tracing::info!(target = %target, source = %source, snapshot = %snapshot_dir.display(), "Cloned volume");
        Ok(())
    }

    fn destroy(&self, target: &str) -> NetvolResult<()> {
        for path in [
            self.volume_path(target),
            self.snapshots_dir().join(target),
        ] {
            match fs::remove_dir_all(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(NetvolError::Filesystem(format!(
                        "failed to remove {}: {}",
                        path.display(),
                        e
                    )));
                }
            }
        }
        tracing::info!(target = %target, "Destroyed volume");
        Ok(())
    }

    fn attach(
        &self,
        target: &str,
        mountpoint: &Path,
        _options: &HashMap<String, String>,
    ) -> NetvolResult<()> {
        let source = self.require_volume(target)?;
        bind_mount(&source, mountpoint)
    }

    fn detach(&self, _target: &str, mountpoint: &Path) -> NetvolResult<()> {
        unmount(mountpoint)
    }

    fn snapshot_list(&self, target: &str) -> NetvolResult<Vec<Snapshot>> {
        self.require_volume(target)?;

        let dir = self.snapshots_dir().join(target);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(NetvolError::Filesystem(format!(
                    "failed to read {}: {}",
                    dir.display(),
                    e
                )));
            }
        };

        let mut snapshots = Vec::new();
        for entry in entries.flatten() {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            let created = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            snapshots.push(Snapshot { name, created });
        }
        snapshots.sort_by(|a, b| a.created.cmp(&b.created).then(a.name.cmp(&b.name)));
        Ok(snapshots)
    }

    fn default_volume_prefix(&self) -> String {
        DEFAULT_PREFIX.to_string()
    }

    fn default_snapshot_prefix(&self) -> String {
        DEFAULT_PREFIX.to_string()
    }
}

/// Recursively copy `src` to a new directory `dst`.
fn copy_tree(src: &Path, dst: &Path) -> NetvolResult<()> {
    for entry in WalkDir::new(src) {
        let entry = entry.map_err(|e| {
            NetvolError::Filesystem(format!("failed to walk {}: {}", src.display(), e))
        })?;
        let relative = entry.path().strip_prefix(src).map_err(|e| {
            NetvolError::Internal(format!("walked outside {}: {}", src.display(), e))
        })?;
        let dest = dst.join(relative);
        let file_type = entry.file_type();

        let result = if file_type.is_dir() {
            mountpoint::ensure_directory(&dest).map(|_| ())
        } else if file_type.is_symlink() {
            fs::read_link(entry.path())
                .and_then(|link| std::os::unix::fs::symlink(link, &dest))
                .map_err(|e| copy_error(entry.path(), &dest, e))
        } else {
            fs::copy(entry.path(), &dest)
                .map(|_| ())
                .map_err(|e| copy_error(entry.path(), &dest, e))
        };
        result?;
    }
    Ok(())
}

fn copy_error(from: &Path, to: &Path, e: std::io::Error) -> NetvolError {
    NetvolError::Filesystem(format!(
        "failed to copy {} to {}: {}",
        from.display(),
        to.display(),
        e
    ))
}

#[cfg(target_os = "linux")]
fn bind_mount(source: &Path, mountpoint: &Path) -> NetvolResult<()> {
    use nix::mount::{MsFlags, mount};

    mount(
        Some(source),
        mountpoint,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| {
        NetvolError::Backend(format!(
            "failed to bind mount {} to {}: {}",
            source.display(),
            mountpoint.display(),
            e
        ))
    })?;

    tracing::info!(
        source = %source.display(),
        mountpoint = %mountpoint.display(),
        "Bind mounted volume"
    );
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn bind_mount(_source: &Path, mountpoint: &Path) -> NetvolResult<()> {
    Err(NetvolError::Backend(format!(
        "bind mounts are only supported on Linux (mountpoint {})",
        mountpoint.display()
    )))
}

#[cfg(target_os = "linux")]
fn unmount(mountpoint: &Path) -> NetvolResult<()> {
    use nix::errno::Errno;
    use nix::mount::umount;

    match umount(mountpoint) {
        Ok(()) => {
            tracing::info!(mountpoint = %mountpoint.display(), "Unmounted volume");
            Ok(())
        }
        // Not a mount point: nothing to detach
        Err(Errno::EINVAL) | Err(Errno::ENOENT) => {
            tracing::debug!(mountpoint = %mountpoint.display(), "Not mounted, nothing to detach");
            Ok(())
        }
        Err(e) => Err(NetvolError::Backend(format!(
            "failed to unmount {}: {}",
            mountpoint.display(),
            e
        ))),
    }
}

#[cfg(not(target_os = "linux"))]
fn unmount(mountpoint: &Path) -> NetvolResult<()> {
    Err(NetvolError::Backend(format!(
        "unmount is only supported on Linux (mountpoint {})",
        mountpoint.display()
    )))
}
