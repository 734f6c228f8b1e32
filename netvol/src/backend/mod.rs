//! Storage backend capability.
//!
//! The driver never provisions storage itself; it asks a [`StorageBackend`]
//! to create, clone, destroy, attach and detach objects by their target name.
//! Concrete backends are chosen at construction time by
//! `storageDriverName` (see [`from_config`]).

mod fake;
mod local;

pub use fake::{FakeCall, FakeMountTable, FakeOp, FakeStorageDriver};
pub use local::{LocalDirConfig, LocalDirDriver};

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use netvol_shared::errors::{NetvolError, NetvolResult};

use crate::config::CommonConfig;

/// Timestamp format used for generated snapshot names.
pub const SNAPSHOT_NAME_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Snapshot descriptor reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub name: String,
    #[serde(rename = "dateCreated")]
    pub created: DateTime<Utc>,
}

/// Object-lifecycle operations offered by a storage system.
pub trait StorageBackend: Send + Sync {
    /// Name this backend is selected by.
    fn name(&self) -> &str;

    /// Provision a new, empty object.
    fn create(&self, target: &str, options: &HashMap<String, String>) -> NetvolResult<()>;

    /// Provision `target` as a clone of `source`.
    ///
    /// With `snapshot`, the clone is cut from that existing snapshot of the
    /// source; otherwise a new snapshot named with `snapshot_prefix` is taken
    /// first.
    fn create_clone(
        &self,
        target: &str,
        source: &str,
        snapshot: Option<&str>,
        snapshot_prefix: &str,
    ) -> NetvolResult<()>;

    /// Delete the object and its snapshots.
    fn destroy(&self, target: &str) -> NetvolResult<()>;

    /// Make the object available at `mountpoint`.
    fn attach(
        &self,
        target: &str,
        mountpoint: &Path,
        options: &HashMap<String, String>,
    ) -> NetvolResult<()>;

    /// Undo [`attach`](StorageBackend::attach).
    fn detach(&self, target: &str, mountpoint: &Path) -> NetvolResult<()>;

    fn snapshot_list(&self, target: &str) -> NetvolResult<Vec<Snapshot>>;

    fn default_volume_prefix(&self) -> String;

    fn default_snapshot_prefix(&self) -> String;
}

/// Build the backend named by `config.storage_driver_name`.
///
/// `raw` is the whole configuration document; backends read their own keys
/// from it.
pub fn from_config(config: &CommonConfig, raw: &str) -> NetvolResult<Box<dyn StorageBackend>> {
    let backend: Box<dyn StorageBackend> = match config.storage_driver_name.as_str() {
        fake::NAME => Box::new(FakeStorageDriver::new()),
        local::NAME => {
            let local_config = LocalDirConfig::from_json(raw)?;
            Box::new(LocalDirDriver::new(local_config)?)
        }
        other => {
            return Err(NetvolError::Config(format!(
                "unknown storage driver '{}'",
                other
            )));
        }
    };

    tracing::debug!(backend = backend.name(), "Initialized storage backend");
    Ok(backend)
}
