//! In-memory backend for tests and dry runs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;

use netvol_shared::errors::{NetvolError, NetvolResult};

use super::{SNAPSHOT_NAME_FORMAT, Snapshot, StorageBackend};
use crate::mounts::MountTable;

pub(super) const NAME: &str = "fake";

const DEFAULT_PREFIX: &str = "fake_";

/// Backend operation, used to inject failures and count calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Create,
    CreateClone,
    Destroy,
    Attach,
    Detach,
    SnapshotList,
}

/// A recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeCall {
    Create {
        target: String,
        options: HashMap<String, String>,
    },
    CreateClone {
        target: String,
        source: String,
        snapshot: Option<String>,
        snapshot_prefix: String,
    },
    Destroy {
        target: String,
    },
    Attach {
        target: String,
        mountpoint: PathBuf,
    },
    Detach {
        target: String,
        mountpoint: PathBuf,
    },
    SnapshotList {
        target: String,
    },
}

impl FakeCall {
    pub fn op(&self) -> FakeOp {
        match self {
            FakeCall::Create { .. } => FakeOp::Create,
            FakeCall::CreateClone { .. } => FakeOp::CreateClone,
            FakeCall::Destroy { .. } => FakeOp::Destroy,
            FakeCall::Attach { .. } => FakeOp::Attach,
            FakeCall::Detach { .. } => FakeOp::Detach,
            FakeCall::SnapshotList { .. } => FakeOp::SnapshotList,
        }
    }
}

#[derive(Default)]
struct FakeState {
    /// Objects by target name, with their snapshots.
    objects: HashMap<String, Vec<Snapshot>>,
    /// Attached mountpoints and the object behind each.
    attached: HashMap<PathBuf, String>,
    calls: Vec<FakeCall>,
    failures: HashMap<FakeOp, String>,
}

impl FakeState {
    fn record(&mut self, call: FakeCall) -> NetvolResult<()> {
        let op = call.op();
        tracing::debug!(?call, "FakeStorageDriver call");
        self.calls.push(call);
        match self.failures.get(&op) {
            Some(message) => Err(NetvolError::Backend(message.clone())),
            None => Ok(()),
        }
    }
}

/// In-memory storage backend.
///
/// Succeeds on everything unless told otherwise with
/// [`fail_on`](FakeStorageDriver::fail_on): clones of unknown sources and
/// destroys of unknown objects are accepted. Clones share state, so a test
/// can keep a handle after giving one to the driver.
#[derive(Clone, Default)]
pub struct FakeStorageDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeStorageDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later call of `op` fail with `message`.
    pub fn fail_on(&self, op: FakeOp, message: impl Into<String>) {
        self.state.lock().failures.insert(op, message.into());
    }

    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Every call so far, oldest first.
    pub fn calls(&self) -> Vec<FakeCall> {
        self.state.lock().calls.clone()
    }

    pub fn call_count(&self, op: FakeOp) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|call| call.op() == op)
            .count()
    }

    pub fn has_object(&self, target: &str) -> bool {
        self.state.lock().objects.contains_key(target)
    }

    /// Record a snapshot of `target`, creating the object if needed.
    pub fn add_snapshot(&self, target: &str, name: &str) {
        self.state
            .lock()
            .objects
            .entry(target.to_string())
            .or_default()
            .push(Snapshot {
                name: name.to_string(),
                created: Utc::now(),
            });
    }

    /// Mount table listing the mountpoints this backend has attached.
    pub fn mount_table(&self) -> FakeMountTable {
        FakeMountTable {
            state: self.state.clone(),
        }
    }
}

impl StorageBackend for FakeStorageDriver {
    fn name(&self) -> &str {
        NAME
    }

    fn create(&self, target: &str, options: &HashMap<String, String>) -> NetvolResult<()> {
        let mut state = self.state.lock();
        state.record(FakeCall::Create {
            target: target.to_string(),
            options: options.clone(),
        })?;
        state.objects.entry(target.to_string()).or_default();
        Ok(())
    }

    fn create_clone(
        &self,
        target: &str,
        source: &str,
        snapshot: Option<&str>,
        snapshot_prefix: &str,
    ) -> NetvolResult<()> {
        let mut state = self.state.lock();
        state.record(FakeCall::CreateClone {
            target: target.to_string(),
            source: source.to_string(),
            snapshot: snapshot.map(String::from),
            snapshot_prefix: snapshot_prefix.to_string(),
        })?;

        if snapshot.is_none()
            && let Some(snapshots) = state.objects.get_mut(source)
        {
            let now = Utc::now();
            snapshots.push(Snapshot {
                name: format!("{}{}", snapshot_prefix, now.format(SNAPSHOT_NAME_FORMAT)),
                created: now,
            });
        }
        state.objects.entry(target.to_string()).or_default();
        Ok(())
    }

    fn destroy(&self, target: &str) -> NetvolResult<()> {
        let mut state = self.state.lock();
        state.record(FakeCall::Destroy {
            target: target.to_string(),
        })?;
        state.objects.remove(target);
        state.attached.retain(|_, object| object != target);
        Ok(())
    }

    fn attach(
        &self,
        target: &str,
        mountpoint: &Path,
        _options: &HashMap<String, String>,
    ) -> NetvolResult<()> {
        let mut state = self.state.lock();
        state.record(FakeCall::Attach {
            target: target.to_string(),
            mountpoint: mountpoint.to_path_buf(),
        })?;
        state
            .attached
            .insert(mountpoint.to_path_buf(), target.to_string());
        Ok(())
    }

    fn detach(&self, target: &str, mountpoint: &Path) -> NetvolResult<()> {
        let mut state = self.state.lock();
        state.record(FakeCall::Detach {
            target: target.to_string(),
            mountpoint: mountpoint.to_path_buf(),
        })?;
        state.attached.remove(mountpoint);
        Ok(())
    }

    fn snapshot_list(&self, target: &str) -> NetvolResult<Vec<Snapshot>> {
        let mut state = self.state.lock();
        state.record(FakeCall::SnapshotList {
            target: target.to_string(),
        })?;
        Ok(state.objects.get(target).cloned().unwrap_or_default())
    }

    fn default_volume_prefix(&self) -> String {
        DEFAULT_PREFIX.to_string()
    }

    fn default_snapshot_prefix(&self) -> String {
        DEFAULT_PREFIX.to_string()
    }
}

/// [`MountTable`] view of a [`FakeStorageDriver`]'s attachments.
#[derive(Clone)]
pub struct FakeMountTable {
    state: Arc<Mutex<FakeState>>,
}

impl MountTable for FakeMountTable {
    fn targets(&self) -> NetvolResult<Vec<PathBuf>> {
        Ok(self.state.lock().attached.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let d = FakeStorageDriver::new();
        assert_eq!(d.name(), "fake");
        assert_eq!(d.default_volume_prefix(), "fake_");
        assert_eq!(d.default_snapshot_prefix(), "fake_");
    }

    #[test]
    fn test_create_and_destroy() {
        let d = FakeStorageDriver::new();
        d.create("myvolume", &HashMap::new()).unwrap();
        assert!(d.has_object("myvolume"));

        d.destroy("myvolume").unwrap();
        assert!(!d.has_object("myvolume"));

        // Unknown objects are accepted
        d.destroy("never-created").unwrap();
    }

    #[test]
    fn test_create_clone_records_arguments() {
        let d = FakeStorageDriver::new();
        d.create_clone("myname", "source", Some("snapshot"), "prefix")
            .unwrap();

        assert_eq!(
            d.calls(),
            vec![FakeCall::CreateClone {
                target: "myname".into(),
                source: "source".into(),
                snapshot: Some("snapshot".into()),
                snapshot_prefix: "prefix".into(),
            }]
        );
        assert!(d.has_object("myname"));
    }

    #[test]
    fn test_clone_without_snapshot_cuts_one_on_source() {
        let d = FakeStorageDriver::new();
        d.create("source", &HashMap::new()).unwrap();
        d.create_clone("copy", "source", None, "snap_").unwrap();

        let snaps = d.snapshot_list("source").unwrap();
        assert_eq!(snaps.len(), 1);
        assert!(snaps[0].name.starts_with("snap_"));
    }

    #[test]
    fn test_attach_detach_updates_mount_table() {
        let d = FakeStorageDriver::new();
        let table = d.mount_table();
        let mp = Path::new("/tmp/volume/fake_vol");

        d.attach("fake_vol", mp, &HashMap::new()).unwrap();
        assert!(table.is_mounted(mp).unwrap());

        d.detach("fake_vol", mp).unwrap();
        assert!(!table.is_mounted(mp).unwrap());
    }

    #[test]
    fn test_snapshot_list_empty() {
        let d = FakeStorageDriver::new();
        assert!(d.snapshot_list("name").unwrap().is_empty());
    }

    #[test]
    fn test_fail_on() {
        let d = FakeStorageDriver::new();
        d.fail_on(FakeOp::Create, "array offline");

        let err = d.create("vol", &HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "storage backend error: array offline");
        assert!(!d.has_object("vol"));
        assert_eq!(d.call_count(FakeOp::Create), 1);

        d.clear_failures();
        d.create("vol", &HashMap::new()).unwrap();
        assert!(d.has_object("vol"));
    }

    #[test]
    fn test_clones_share_state() {
        let d = FakeStorageDriver::new();
        let handle = d.clone();
        d.create("vol", &HashMap::new()).unwrap();
        assert!(handle.has_object("vol"));
        assert_eq!(handle.call_count(FakeOp::Create), 1);
    }
}
