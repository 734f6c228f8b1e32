//! Volume lifecycle manager.
//!
//! [`VolumeDriver`] turns the host's lifecycle verbs into backend calls while
//! keeping a mountpoint directory per live volume under its root. Every verb
//! runs under the driver's [`LockStrategy`], held until the verb returns.
//!
//! There is no journal across the directory tree and the backend. The
//! failure windows are:
//! - Create: backend failure removes the directory if this call created it
//!   (best effort)
//! - Remove: backend failure leaves the directory; a directory removal
//!   failure after a successful destroy is reported with the object gone

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use netvol_shared::errors::{NetvolError, NetvolResult};

use crate::api::{Capability, VolumeInfo, VolumeStatus};
use crate::backend::StorageBackend;
use crate::config::CommonConfig;
use crate::lock::{GlobalLock, LockGuard, LockScope, LockStrategy};
use crate::mountpoint::{self, MountpointStore};
use crate::mounts::{MountTable, ProcMountTable};
use crate::naming::{NamingResolver, validate_volume_name};

/// Create option naming the volume to clone from.
pub const OPT_FROM: &str = "from";
/// Create option naming an existing snapshot of the `from` volume.
pub const OPT_FROM_SNAPSHOT: &str = "fromSnapshot";

pub struct VolumeDriver {
    store: MountpointStore,
    naming: NamingResolver,
    disable_delete: bool,
    backend: Box<dyn StorageBackend>,
    lock: Arc<dyn LockStrategy>,
    mount_table: Box<dyn MountTable>,
}

impl VolumeDriver {
    /// Build a driver rooted at `root`, creating the directory if needed.
    ///
    /// The driver starts with a [`GlobalLock`] and the host's
    /// `/proc/self/mounts`.
    pub fn new(
        root: impl Into<PathBuf>,
        config: &CommonConfig,
        backend: Box<dyn StorageBackend>,
    ) -> NetvolResult<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(NetvolError::InvalidArgument(format!(
                "volume root must be an absolute path, got {}",
                root.display()
            )));
        }
        mountpoint::ensure_directory(&root)?;

        let naming = NamingResolver::new(
            &config.storage_prefix,
            &config.snapshot_prefix,
            &backend.default_volume_prefix(),
            &backend.default_snapshot_prefix(),
        );

        tracing::info!(
            root = %root.display(),
            backend = backend.name(),
            volume_prefix = naming.volume_prefix(),
            snapshot_prefix = naming.snapshot_prefix(),
            disable_delete = config.disable_delete,
            "Volume driver ready"
        );

        Ok(Self {
            store: MountpointStore::new(root),
            naming,
            disable_delete: config.disable_delete,
            backend,
            lock: Arc::new(GlobalLock::new()),
            mount_table: Box::new(ProcMountTable::new()),
        })
    }

    pub fn with_lock_strategy(mut self, lock: Arc<dyn LockStrategy>) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_mount_table(mut self, mount_table: Box<dyn MountTable>) -> Self {
        self.mount_table = mount_table;
        self
    }

    pub fn root(&self) -> &Path {
        self.store.root()
    }

    pub fn naming(&self) -> &NamingResolver {
        &self.naming
    }

    /// Target name and mountpoint for a requested name.
    fn resolve(&self, name: &str) -> NetvolResult<(String, PathBuf)> {
        validate_volume_name(name)?;
        let target = self.naming.target_name(name);
        let mountpoint = self.store.path_for(&target);
        Ok((target, mountpoint))
    }

    fn guard(&self, scope: LockScope<'_>) -> NetvolResult<LockGuard> {
        self.lock.acquire(scope)
    }

    /// Create a volume, or clone one when `options` names a `from` volume.
    pub fn create(&self, name: &str, options: &HashMap<String, String>) -> NetvolResult<()> {
        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, mountpoint = %mountpoint.display(), ?options, "Create");

        let source = match options.get(OPT_FROM) {
            Some(from) => {
                validate_volume_name(from)?;
                Some(self.naming.target_name(from))
            }
            None => None,
        };
        let snapshot = options.get(OPT_FROM_SNAPSHOT).map(String::as_str);
        if let Some(snapshot) = snapshot {
            validate_volume_name(snapshot)?;
        }

        let created = self.store.ensure_directory(&mountpoint)?;

        let result = match source {
            Some(source) => {
                tracing::debug!(target = %target, source = %source, ?snapshot, "Cloning volume");
                self.backend.create_clone(
                    &target,
                    &source,
                    snapshot,
                    self.naming.snapshot_prefix(),
                )
            }
            None => self.backend.create(&target, options),
        };

        if let Err(e) = result {
            tracing::error!(target = %target, kind = e.kind(), error = %e, "Error creating storage");
            // A directory that predates this call belongs to a live volume
            if created && let Err(cleanup) = self.store.remove(&mountpoint) {
                tracing::warn!(
                    mountpoint = %mountpoint.display(),
                    kind = cleanup.kind(),
                    error = %cleanup,
                    "Could not remove mountpoint after failed create"
                );
            }
            return Err(backend_error("error creating storage", e));
        }
        Ok(())
    }

    /// Every volume with a mountpoint under the root that carries the prefix.
    pub fn list(&self) -> NetvolResult<Vec<VolumeInfo>> {
        let _guard = self.guard(LockScope::Root)?;
        tracing::debug!(root = %self.store.root().display(), "List");

        let mut volumes = Vec::new();
        for dir in self.store.list_subdirectories()? {
            match self.naming.strip_prefix(&dir) {
                Some(name) => {
                    volumes.push(VolumeInfo {
                        name: name.to_string(),
                        mountpoint: self.store.path_for(&dir),
                        status: None,
                    });
                }
                None => tracing::debug!(dir = %dir, "wrong prefix, skipping"),
            }
        }
        Ok(volumes)
    }

    /// Volume details with the backend's snapshots.
    pub fn get(&self, name: &str) -> NetvolResult<VolumeInfo> {
        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, "Get");

        let mountpoint = self.store.resolve_existing(&mountpoint)?;
        let snapshots = self.backend.snapshot_list(&target).unwrap_or_else(|e| {
            tracing::warn!(target = %target, kind = e.kind(), error = %e, "Could not list snapshots");
            Vec::new()
        });

        Ok(VolumeInfo {
            name: name.to_string(),
            mountpoint,
            status: Some(VolumeStatus { snapshots }),
        })
    }

    /// Destroy the backend object, then the mountpoint.
    ///
    /// Removing a volume that has no mountpoint succeeds without touching the
    /// backend.
    pub fn remove(&self, name: &str) -> NetvolResult<()> {
        if self.disable_delete {
            tracing::info!(
                volume = name,
                "Skipping removal of {} because volume deletion is disabled",
                name
            );
            return Ok(());
        }

        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, "Remove");

        match fs::symlink_metadata(&mountpoint) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return Err(NetvolError::NotADirectory(format!(
                    "{}",
                    mountpoint.display()
                )));
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(NetvolError::Filesystem(format!(
                    "could not stat {}: {}",
                    mountpoint.display(),
                    e
                )));
            }
        }

        if let Err(e) = self.backend.destroy(&target) {
            tracing::error!(target = %target, kind = e.kind(), error = %e, "Problem removing volume");
            return Err(backend_error(
                &format!("problem removing volume {}", target),
                e,
            ));
        }

        self.store.remove(&mountpoint)
    }

    /// Mountpoint of an existing volume.
    pub fn path(&self, name: &str) -> NetvolResult<PathBuf> {
        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, "Path");

        self.store.resolve_existing(&mountpoint)
    }

    /// Attach the volume at its mountpoint unless something is already
    /// mounted there.
    pub fn mount(&self, name: &str, id: Option<&str>) -> NetvolResult<PathBuf> {
        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, mountpoint = %mountpoint.display(), ?id, "Mount");

        self.store.ensure_directory(&mountpoint)?;

        let mounted = self.mount_table.is_mounted(&mountpoint).map_err(|e| {
            NetvolError::Filesystem(format!(
                "failed to check whether {} is mounted: {}",
                mountpoint.display(),
                e
            ))
        })?;
        if mounted {
            tracing::debug!(mountpoint = %mountpoint.display(), "Already mounted");
            return Ok(mountpoint);
        }

        if let Err(e) = self.backend.attach(&target, &mountpoint, &HashMap::new()) {
            tracing::error!(
                target = %target,
                mountpoint = %mountpoint.display(),
                kind = e.kind(),
                error = %e,
                "Problem attaching volume"
            );
            return Err(backend_error(
                &format!(
                    "problem attaching volume {} at {}",
                    target,
                    mountpoint.display()
                ),
                e,
            ));
        }
        Ok(mountpoint)
    }

    /// Detach the volume from its mountpoint. The mountpoint is not checked.
    pub fn unmount(&self, name: &str, id: Option<&str>) -> NetvolResult<()> {
        let (target, mountpoint) = self.resolve(name)?;
        let _guard = self.guard(LockScope::Volume(&target))?;
        tracing::debug!(volume = name, target = %target, mountpoint = %mountpoint.display(), ?id, "Unmount");

        if let Err(e) = self.backend.detach(&target, &mountpoint) {
            tracing::error!(
                target = %target,
                mountpoint = %mountpoint.display(),
                kind = e.kind(),
                error = %e,
                "Problem unmounting volume"
            );
            return Err(backend_error(
                &format!("problem unmounting volume {}", target),
                e,
            ));
        }
        Ok(())
    }

    pub fn capabilities(&self) -> NetvolResult<Capability> {
        let _guard = self.guard(LockScope::Root)?;
        tracing::debug!("Capabilities");
        Ok(Capability::default())
    }
}

/// Wrap a backend failure, keeping the backend's own message.
fn backend_error(context: &str, err: NetvolError) -> NetvolError {
    let message = match err {
        NetvolError::Backend(message) => message,
        other => other.to_string(),
    };
    NetvolError::Backend(format!("{}: {}", context, message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FakeCall, FakeOp, FakeStorageDriver};
    use crate::naming::PrefixSetting;
    use tempfile::TempDir;

    fn config() -> CommonConfig {
        CommonConfig {
            version: 1,
            storage_driver_name: "fake".into(),
            ..CommonConfig::default()
        }
    }

    fn driver_with(config: &CommonConfig) -> (VolumeDriver, FakeStorageDriver, TempDir) {
        let temp = TempDir::new().unwrap();
        let backend = FakeStorageDriver::new();
        let driver = VolumeDriver::new(temp.path().join("volume"), config, Box::new(backend.clone()))
            .unwrap()
            .with_mount_table(Box::new(backend.mount_table()));
        (driver, backend, temp)
    }

    fn driver() -> (VolumeDriver, FakeStorageDriver, TempDir) {
        driver_with(&config())
    }

    #[test]
    fn test_new_creates_root() {
        let (driver, _backend, temp) = driver();
        assert!(temp.path().join("volume").is_dir());
        assert_eq!(driver.root(), temp.path().join("volume"));
    }

    #[test]
    fn test_new_rejects_relative_root() {
        let err = VolumeDriver::new("volume", &config(), Box::new(FakeStorageDriver::new()))
            .err()
            .unwrap();
        assert!(matches!(err, NetvolError::InvalidArgument(_)));
    }

    #[test]
    fn test_new_rejects_file_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("volume");
        fs::write(&root, b"").unwrap();

        let err = VolumeDriver::new(&root, &config(), Box::new(FakeStorageDriver::new()))
            .err()
            .unwrap();
        assert!(matches!(err, NetvolError::NotADirectory(_)));
    }

    #[test]
    fn test_prefix_configuration() {
        let mut config = config();
        config.storage_prefix = PrefixSetting::Empty;
        config.snapshot_prefix = PrefixSetting::Value("snap_".into());
        let (driver, _backend, _temp) = driver_with(&config);

        assert_eq!(driver.naming().volume_prefix(), "");
        assert_eq!(driver.naming().snapshot_prefix(), "snap_");
    }

    #[test]
    fn test_create_passes_options_to_backend() {
        let (driver, backend, temp) = driver();
        let opts = HashMap::from([("size".to_string(), "1g".to_string())]);
        driver.create("testvolume", &opts).unwrap();

        assert!(temp.path().join("volume/fake_testvolume").is_dir());
        assert_eq!(
            backend.calls(),
            vec![FakeCall::Create {
                target: "fake_testvolume".into(),
                options: opts,
            }]
        );
    }

    #[test]
    fn test_create_from_clones_with_snapshot_prefix() {
        let (driver, backend, _temp) = driver();
        let opts = HashMap::from([
            (OPT_FROM.to_string(), "source".to_string()),
            (OPT_FROM_SNAPSHOT.to_string(), "fake_snap".to_string()),
        ]);
        driver.create("copy", &opts).unwrap();

        assert_eq!(
            backend.calls(),
            vec![FakeCall::CreateClone {
                target: "fake_copy".into(),
                source: "fake_source".into(),
                snapshot: Some("fake_snap".into()),
                snapshot_prefix: "fake_".into(),
            }]
        );
    }

    #[test]
    fn test_create_backend_failure_removes_directory() {
        let (driver, backend, temp) = driver();
        backend.fail_on(FakeOp::Create, "no space on aggregate");

        let err = driver.create("testvolume", &HashMap::new()).unwrap_err();
        assert!(matches!(err, NetvolError::Backend(_)));
        assert!(err.to_string().contains("no space on aggregate"));
        assert!(!temp.path().join("volume/fake_testvolume").exists());
    }

    #[test]
    fn test_failed_recreate_keeps_existing_volume() {
        let (driver, backend, temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();
        backend.fail_on(FakeOp::Create, "already exists");

        driver.create("testvolume", &HashMap::new()).unwrap_err();
        assert!(temp.path().join("volume/fake_testvolume").is_dir());
        assert_eq!(driver.list().unwrap().len(), 1);
        assert!(driver.get("testvolume").is_ok());
    }

    #[test]
    fn test_create_rejects_unsafe_snapshot_name() {
        let (driver, backend, temp) = driver();
        for snapshot in ["", "..", "../../volumes/fake_secret"] {
            let opts = HashMap::from([
                (OPT_FROM.to_string(), "source".to_string()),
                (OPT_FROM_SNAPSHOT.to_string(), snapshot.to_string()),
            ]);
            let err = driver.create("copy", &opts).unwrap_err();
            assert!(matches!(err, NetvolError::InvalidArgument(_)), "{snapshot:?}");
        }
        assert!(backend.calls().is_empty());
        assert!(!temp.path().join("volume/fake_copy").exists());
    }

    #[test]
    fn test_invalid_names_are_rejected_before_any_work() {
        let (driver, backend, _temp) = driver();
        for name in ["", ".", "..", "a/b"] {
            let err = driver.create(name, &HashMap::new()).unwrap_err();
            assert!(matches!(err, NetvolError::InvalidArgument(_)), "{name:?}");
        }
        assert!(backend.calls().is_empty());
    }

    #[test]
    fn test_list_skips_foreign_directories_and_files() {
        let (driver, _backend, temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();
        fs::create_dir(temp.path().join("volume/other")).unwrap();
        fs::write(temp.path().join("volume/fake_file"), b"").unwrap();

        let volumes = driver.list().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].name, "testvolume");
        assert_eq!(
            volumes[0].mountpoint,
            temp.path().join("volume/fake_testvolume")
        );
    }

    #[test]
    fn test_get_swallows_snapshot_failure() {
        let (driver, backend, _temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();
        backend.fail_on(FakeOp::SnapshotList, "snapshot api down");

        let info = driver.get("testvolume").unwrap();
        assert_eq!(info.name, "testvolume");
        assert_eq!(info.status, Some(VolumeStatus::default()));
    }

    #[test]
    fn test_get_accepts_prefixed_name() {
        let (driver, _backend, _temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();

        let info = driver.get("fake_testvolume").unwrap();
        assert_eq!(info.name, "fake_testvolume");
        assert!(info.mountpoint.ends_with("fake_testvolume"));
    }

    #[test]
    fn test_remove_backend_failure_keeps_directory() {
        let (driver, backend, temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();
        backend.fail_on(FakeOp::Destroy, "busy");

        let err = driver.remove("testvolume").unwrap_err();
        assert!(err.to_string().contains("fake_testvolume"));
        assert!(err.to_string().contains("busy"));
        assert!(temp.path().join("volume/fake_testvolume").is_dir());
    }

    #[test]
    fn test_remove_non_directory() {
        let (driver, backend, temp) = driver();
        fs::write(temp.path().join("volume/fake_testvolume"), b"").unwrap();

        let err = driver.remove("testvolume").unwrap_err();
        assert!(matches!(err, NetvolError::NotADirectory(_)));
        assert_eq!(backend.call_count(FakeOp::Destroy), 0);
    }

    #[test]
    fn test_remove_with_delete_disabled_skips_validation() {
        let mut config = config();
        config.disable_delete = true;
        let (driver, backend, _temp) = driver_with(&config);

        driver.remove("").unwrap();
        driver.remove("..").unwrap();
        assert_eq!(backend.call_count(FakeOp::Destroy), 0);
    }

    #[test]
    fn test_remove_non_empty_directory_surfaces_error() {
        let (driver, backend, temp) = driver();
        driver.create("testvolume", &HashMap::new()).unwrap();
        fs::write(temp.path().join("volume/fake_testvolume/leftover"), b"x").unwrap();

        let err = driver.remove("testvolume").unwrap_err();
        assert!(matches!(err, NetvolError::Filesystem(_)));
        // The backend object is already gone
        assert!(!backend.has_object("fake_testvolume"));
    }

    #[test]
    fn test_mount_failure() {
        let (driver, backend, _temp) = driver();
        backend.fail_on(FakeOp::Attach, "export denied");

        let err = driver.mount("testvolume", None).unwrap_err();
        assert!(matches!(err, NetvolError::Backend(_)));
        assert!(err.to_string().contains("export denied"));
    }

    #[test]
    fn test_mount_table_error_is_filesystem_error() {
        let (driver, backend, temp) = driver();
        let driver = driver.with_mount_table(Box::new(ProcMountTable::at(
            temp.path().join("no-such-mounts"),
        )));

        let err = driver.mount("testvolume", Some("id")).unwrap_err();
        assert!(matches!(err, NetvolError::Filesystem(_)));
        assert!(err.to_string().contains("is mounted"));
        assert_eq!(backend.call_count(FakeOp::Attach), 0);
    }

    #[test]
    fn test_unmount_does_not_require_mountpoint() {
        let (driver, backend, temp) = driver();
        driver.unmount("testvolume", None).unwrap();

        assert_eq!(
            backend.calls(),
            vec![FakeCall::Detach {
                target: "fake_testvolume".into(),
                mountpoint: temp.path().join("volume/fake_testvolume"),
            }]
        );

        backend.fail_on(FakeOp::Detach, "device busy");
        let err = driver.unmount("testvolume", None).unwrap_err();
        assert!(err.to_string().contains("device busy"));
    }

    #[test]
    fn test_capabilities_takes_the_lock() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::thread;
        use std::time::Duration;

        let (driver, _backend, _temp) = driver();
        let lock = Arc::new(GlobalLock::new());
        let driver = Arc::new(driver.with_lock_strategy(lock.clone()));

        let held = lock.acquire(LockScope::Root).unwrap();
        let done = Arc::new(AtomicBool::new(false));
        let handle = {
            let driver = driver.clone();
            let done = done.clone();
            thread::spawn(move || {
                let caps = driver.capabilities().unwrap();
                done.store(true, Ordering::SeqCst);
                caps
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        drop(held);
        assert_eq!(handle.join().unwrap().scope, "global");
    }

    #[test]
    fn test_backend_error_keeps_message() {
        let err = backend_error("error creating storage", NetvolError::Backend("boom".into()));
        assert_eq!(
            err.to_string(),
            "storage backend error: error creating storage: boom"
        );

        let err = backend_error("ctx", NetvolError::NotFound("volume x".into()));
        assert_eq!(err.to_string(), "storage backend error: ctx: not found: volume x");
    }
}
