//! Volume plugin envelope.
//!
//! Request and response shapes of the container host's volume plugin
//! protocol (PascalCase JSON keys), and [`VolumePlugin`], which runs a verb
//! and folds its outcome into a single [`Response`]. Transport is left to
//! the caller.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use netvol_shared::errors::NetvolResult;

use crate::backend::Snapshot;
use crate::driver::VolumeDriver;

/// Scope reported by every driver instance.
pub const GLOBAL_SCOPE: &str = "global";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Request {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub opts: Option<HashMap<String, String>>,
}

impl Request {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            opts: None,
        }
    }

    pub fn with_opts(mut self, opts: HashMap<String, String>) -> Self {
        self.opts = Some(opts);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountRequest {
    #[serde(rename = "Name", default)]
    pub name: String,
    /// Caller's mount id. Only logged.
    #[serde(rename = "ID", default)]
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeStatus {
    pub snapshots: Vec<Snapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<VolumeStatus>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    pub scope: String,
}

impl Default for Capability {
    fn default() -> Self {
        Self {
            scope: GLOBAL_SCOPE.to_string(),
        }
    }
}

/// Reply to any verb. `err` is empty on success.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    #[serde(default)]
    pub err: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mountpoint: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<VolumeInfo>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capability>,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            err: message.into(),
            ..Self::default()
        }
    }

    pub fn is_err(&self) -> bool {
        !self.err.is_empty()
    }

    /// Build a response from a verb result, filling the payload with `fill`.
    fn from_result<T>(result: NetvolResult<T>, fill: impl FnOnce(&mut Response, T)) -> Self {
        match result {
            Ok(value) => {
                let mut response = Response::default();
                fill(&mut response, value);
                response
            }
            Err(e) => Response::error(e.to_string()),
        }
    }
}

/// One method per plugin verb.
pub trait VolumePlugin {
    fn handle_create(&self, request: &Request) -> Response;
    fn handle_list(&self, request: &Request) -> Response;
    fn handle_get(&self, request: &Request) -> Response;
    fn handle_remove(&self, request: &Request) -> Response;
    fn handle_path(&self, request: &Request) -> Response;
    fn handle_mount(&self, request: &MountRequest) -> Response;
    fn handle_unmount(&self, request: &MountRequest) -> Response;
    fn handle_capabilities(&self, request: &Request) -> Response;
}

fn mount_id(request: &MountRequest) -> Option<&str> {
    (!request.id.is_empty()).then_some(request.id.as_str())
}

impl VolumePlugin for VolumeDriver {
    fn handle_create(&self, request: &Request) -> Response {
        let opts = request.opts.clone().unwrap_or_default();
        Response::from_result(self.create(&request.name, &opts), |_, ()| {})
    }

    fn handle_list(&self, _request: &Request) -> Response {
        Response::from_result(self.list(), |r, volumes| r.volumes = Some(volumes))
    }

    fn handle_get(&self, request: &Request) -> Response {
        Response::from_result(self.get(&request.name), |r, volume| r.volume = Some(volume))
    }

    fn handle_remove(&self, request: &Request) -> Response {
        Response::from_result(self.remove(&request.name), |_, ()| {})
    }

    fn handle_path(&self, request: &Request) -> Response {
        Response::from_result(self.path(&request.name), |r, path| r.mountpoint = Some(path))
    }

    fn handle_mount(&self, request: &MountRequest) -> Response {
        Response::from_result(self.mount(&request.name, mount_id(request)), |r, path| {
            r.mountpoint = Some(path)
        })
    }

    fn handle_unmount(&self, request: &MountRequest) -> Response {
        Response::from_result(self.unmount(&request.name, mount_id(request)), |_, ()| {})
    }

    fn handle_capabilities(&self, _request: &Request) -> Response {
        Response::from_result(self.capabilities(), |r, caps| r.capabilities = Some(caps))
    }
}
