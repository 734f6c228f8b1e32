//! CLI definition and argument parsing for netvol-cli.
//! This module contains the main CLI structure, subcommands, global flags
//! and the driver construction they share.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use netvol::backend::{self, FakeStorageDriver};
use netvol::{CommonConfig, FileLock, Response, StorageBackend, VolumeDriver};

/// Mountpoint root used when neither `--root` nor `NETVOL_ROOT` is given.
pub const DEFAULT_ROOT: &str = "/var/lib/docker-volumes/netvol";

/// Parse `KEY=VALUE` create options into a map. Later keys win.
pub fn parse_options(raw: &[String]) -> anyhow::Result<HashMap<String, String>> {
    let mut options = HashMap::new();
    for pair in raw {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("invalid option '{}', expected KEY=VALUE", pair);
        };
        if key.is_empty() {
            bail!("invalid option '{}', empty key", pair);
        }
        options.insert(key.to_string(), value.to_string());
    }
    Ok(options)
}

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "netvol", author, version, about = "netvol volume plugin CLI")]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalFlags,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
#[non_exhaustive]
pub enum Commands {
    /// Create a volume
    Create(crate::commands::create::CreateArgs),

    /// List volumes
    #[command(name = "ls", visible_alias = "list")]
    List(crate::commands::list::ListArgs),

    /// Show a volume and its snapshots
    Inspect(crate::commands::inspect::InspectArgs),

    /// Remove a volume
    Rm(crate::commands::rm::RmArgs),

    /// Print the mountpoint of a volume
    Path(crate::commands::path::PathArgs),

    /// Attach a volume at its mountpoint
    Mount(crate::commands::mount::MountArgs),

    /// Detach a volume from its mountpoint
    Unmount(crate::commands::unmount::UnmountArgs),

    /// Show the plugin's capabilities
    Capabilities(crate::commands::capabilities::CapabilitiesArgs),
}

// ============================================================================
// GLOBAL FLAGS
// ============================================================================

#[derive(Args, Debug, Clone)]
pub struct GlobalFlags {
    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Configuration file (JSON). Without it the in-memory fake backend is used
    #[arg(long, global = true, env = "NETVOL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding one mountpoint per volume
    #[arg(long, global = true, env = "NETVOL_ROOT", default_value = DEFAULT_ROOT)]
    pub root: PathBuf,

    /// Lock file shared by concurrent invocations [default: <root>.lock]
    #[arg(long, global = true)]
    pub lock_file: Option<PathBuf>,

    /// Write logs to <DIR>/netvol.log instead of stderr
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,
}

impl GlobalFlags {
    /// Loaded configuration, if a file was given.
    fn load_config(&self) -> anyhow::Result<(CommonConfig, Option<String>)> {
        match &self.config {
            Some(path) => {
                let (config, raw) = CommonConfig::load(path)?;
                Ok((config, Some(raw)))
            }
            None => Ok((
                CommonConfig {
                    version: netvol::config::CONFIG_VERSION,
                    storage_driver_name: "fake".to_string(),
                    ..CommonConfig::default()
                },
                None,
            )),
        }
    }

    pub fn lock_path(&self) -> PathBuf {
        self.lock_file
            .clone()
            .unwrap_or_else(|| self.root.with_extension("lock"))
    }

    /// Whether debug logging was requested on the command line or in the config.
    pub fn debug_requested(&self) -> bool {
        self.debug
            || self
                .config
                .as_ref()
                .and_then(|path| CommonConfig::load(path).ok())
                .is_some_and(|(config, _)| config.debug)
    }

    pub fn create_driver(&self) -> anyhow::Result<VolumeDriver> {
        let (config, raw) = self.load_config()?;
        let backend: Box<dyn StorageBackend> = match raw {
            Some(raw) => backend::from_config(&config, &raw)?,
            None => Box::new(FakeStorageDriver::new()),
        };

        let lock_path = self.lock_path();
        tracing::debug!(
            root = %self.root.display(),
            lock_file = %lock_path.display(),
            backend = backend.name(),
            "Opening volume driver"
        );
        let lock = FileLock::new(&lock_path)
            .with_context(|| format!("failed to open lock file {}", lock_path.display()))?;

        let driver = VolumeDriver::new(&self.root, &config, backend)?
            .with_lock_strategy(Arc::new(lock));
        Ok(driver)
    }
}

/// Print a response as JSON; fail with its error message if it carries one.
pub fn print_response(response: &Response) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(response)?);
    if response.is_err() {
        bail!("{}", response.err);
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
