//! Shared fixtures for CLI tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use tempfile::TempDir;

/// A `netvol` command isolated in its own temp directory.
pub struct TestContext {
    pub cmd: Command,
    pub temp: TempDir,
    config: Option<PathBuf>,
}

impl TestContext {
    /// Command sharing this context's root, lock file and config.
    pub fn new_cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("netvol").expect("netvol binary");
        cmd.env_remove("NETVOL_CONFIG")
            .env_remove("NETVOL_ROOT")
            .env_remove("RUST_LOG")
            .arg("--root")
            .arg(self.root())
            .arg("--lock-file")
            .arg(self.temp.path().join("netvol.lock"));
        if let Some(config) = &self.config {
            cmd.arg("--config").arg(config);
        }
        cmd
    }

    pub fn root(&self) -> PathBuf {
        self.temp.path().join("volume")
    }

    pub fn data_dir(&self) -> PathBuf {
        self.temp.path().join("data")
    }

    fn with_config(render: impl FnOnce(&Path) -> Option<String>) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let config = render(temp.path()).map(|raw| {
            let path = temp.path().join("config.json");
            std::fs::write(&path, raw).expect("write config");
            path
        });
        let mut ctx = Self {
            cmd: Command::cargo_bin("netvol").expect("netvol binary"),
            temp,
            config,
        };
        ctx.cmd = ctx.new_cmd();
        ctx
    }
}

/// Context using the built-in fake backend.
pub fn netvol() -> TestContext {
    TestContext::with_config(|_| None)
}

/// Context with a `local-dir` configuration file.
pub fn netvol_local_dir() -> TestContext {
    TestContext::with_config(|dir| {
        Some(
            serde_json::json!({
                "version": 1,
                "storageDriverName": "local-dir",
                "dataDir": dir.join("data"),
            })
            .to_string(),
        )
    })
}

/// Context with an arbitrary configuration document.
pub fn netvol_with_config(raw: &'static str) -> TestContext {
    TestContext::with_config(|_| Some(raw.to_string()))
}

/// Parse a command's stdout as a JSON response.
pub fn response(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("stdout is a JSON response")
}
