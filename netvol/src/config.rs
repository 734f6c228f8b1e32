//! Plugin configuration document.
//!
//! One JSON object holds the keys every backend shares (below) and the
//! backend's own keys, which [`backend::from_config`](crate::backend::from_config)
//! reads from the same raw text.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use netvol_shared::errors::{NetvolError, NetvolResult};

use crate::naming::PrefixSetting;

/// The only configuration format version understood.
pub const CONFIG_VERSION: u32 = 1;

/// Keys common to every backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonConfig {
    pub version: u32,
    pub storage_driver_name: String,
    #[serde(default)]
    pub debug: bool,
    /// Keep backend objects and mountpoints when the host removes a volume.
    #[serde(default)]
    pub disable_delete: bool,
    #[serde(default)]
    pub storage_prefix: PrefixSetting,
    #[serde(default)]
    pub snapshot_prefix: PrefixSetting,
}

impl CommonConfig {
    /// Parse and validate a configuration document.
    pub fn from_json(raw: &str) -> NetvolResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| NetvolError::Config(format!("could not parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse the configuration file at `path`.
    ///
    /// Returns the parsed common keys together with the raw text, which the
    /// backend needs for its own keys.
    pub fn load(path: impl AsRef<Path>) -> NetvolResult<(Self, String)> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            NetvolError::Config(format!(
                "could not read configuration file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config = Self::from_json(&raw)?;
        tracing::debug!(
            path = %path.display(),
            driver = %config.storage_driver_name,
            "Loaded configuration"
        );
        Ok((config, raw))
    }

    pub fn validate(&self) -> NetvolResult<()> {
        if self.version != CONFIG_VERSION {
            return Err(NetvolError::Config(format!(
                "version: unsupported configuration version {} (expected {})",
                self.version, CONFIG_VERSION
            )));
        }
        if self.storage_driver_name.trim().is_empty() {
            return Err(NetvolError::Config(
                "storageDriverName: must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
