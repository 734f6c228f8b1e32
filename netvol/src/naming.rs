//! Volume and snapshot naming.
//!
//! Every volume the host asks for is stored on the backend under a *target
//! name*: the requested name with an effective prefix in front. The prefix
//! comes from configuration when set, otherwise from the backend's default.

use serde::{Deserialize, Serialize};

use netvol_shared::errors::{NetvolError, NetvolResult};

/// Configured prefix override.
///
/// Decodes from an optional JSON string: a missing key or `null` is
/// [`Unset`](PrefixSetting::Unset), `""` is [`Empty`](PrefixSetting::Empty),
/// anything else is [`Value`](PrefixSetting::Value).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "Option<String>")]
pub enum PrefixSetting {
    /// Not configured; the backend default applies.
    #[default]
    Unset,
    /// Explicitly configured as the empty string: no prefix at all.
    Empty,
    /// Explicit prefix.
    Value(String),
}

impl PrefixSetting {
    /// Parse a raw, still-quoted configuration value.
    ///
    /// Values of two bytes or more are treated as a quoted literal: `""`
    /// means no prefix, anything else has its first and last byte stripped.
    /// Shorter values (including empty input) mean "not configured".
    pub fn from_raw_json(raw: &[u8]) -> Self {
        if raw.len() < 2 {
            return PrefixSetting::Unset;
        }
        if raw == b"\"\"" {
            return PrefixSetting::Empty;
        }
        let interior = &raw[1..raw.len() - 1];
        PrefixSetting::Value(String::from_utf8_lossy(interior).into_owned())
    }

    /// Effective prefix given the backend's default.
    pub fn resolve(&self, default: &str) -> String {
        match self {
            PrefixSetting::Unset => default.to_string(),
            PrefixSetting::Empty => String::new(),
            PrefixSetting::Value(prefix) => prefix.clone(),
        }
    }
}

impl From<Option<String>> for PrefixSetting {
    fn from(value: Option<String>) -> Self {
        match value {
            None => PrefixSetting::Unset,
            Some(s) if s.is_empty() => PrefixSetting::Empty,
            Some(s) => PrefixSetting::Value(s),
        }
    }
}

impl From<PrefixSetting> for Option<String> {
    fn from(value: PrefixSetting) -> Self {
        match value {
            PrefixSetting::Unset => None,
            PrefixSetting::Empty => Some(String::new()),
            PrefixSetting::Value(s) => Some(s),
        }
    }
}

/// Resolved naming rules for one driver instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamingResolver {
    volume_prefix: String,
    snapshot_prefix: String,
}

impl NamingResolver {
    /// Resolve both prefixes once, against the backend defaults.
    pub fn new(
        volume: &PrefixSetting,
        snapshot: &PrefixSetting,
        default_volume_prefix: &str,
        default_snapshot_prefix: &str,
    ) -> Self {
        Self {
            volume_prefix: volume.resolve(default_volume_prefix),
            snapshot_prefix: snapshot.resolve(default_snapshot_prefix),
        }
    }

    pub fn volume_prefix(&self) -> &str {
        &self.volume_prefix
    }

    pub fn snapshot_prefix(&self) -> &str {
        &self.snapshot_prefix
    }

    /// Storage-side name for a requested volume name.
    ///
    /// Names that already carry the prefix are returned unchanged, so
    /// applying this twice is the same as applying it once.
    pub fn target_name(&self, requested: &str) -> String {
        if requested.starts_with(&self.volume_prefix) {
            requested.to_string()
        } else {
            format!("{}{}", self.volume_prefix, requested)
        }
    }

    /// Requested name for a directory under the root, if it carries the prefix.
    pub fn strip_prefix<'a>(&self, target: &'a str) -> Option<&'a str> {
        target.strip_prefix(self.volume_prefix.as_str())
    }
}

/// Reject names that would escape or alias the mountpoint root.
pub fn validate_volume_name(name: &str) -> NetvolResult<()> {
    if name.is_empty() {
        return Err(NetvolError::InvalidArgument(
            "volume name must not be empty".to_string(),
        ));
    }
    if name == "." || name == ".." || name.contains('/') || name.contains('\0') {
        return Err(NetvolError::InvalidArgument(format!(
            "invalid volume name '{}'",
            name
        )));
    }
    Ok(())
}
