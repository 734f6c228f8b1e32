//! netvol volume lifecycle library.
//!
//! This crate implements the host-side lifecycle of a container volume
//! plugin: naming, mountpoint bookkeeping and backend orchestration under a
//! single serialization point.

use std::path::Path;
use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// Keeps the non-blocking writer thread alive for the life of the process
static LOG_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();

pub mod api;
pub mod backend;
pub mod config;
pub mod driver;
pub mod lock;
pub mod mountpoint;
pub mod mounts;
pub mod naming;

pub use api::{Capability, MountRequest, Request, Response, VolumeInfo, VolumePlugin, VolumeStatus};
pub use backend::{Snapshot, StorageBackend};
pub use config::CommonConfig;
pub use driver::VolumeDriver;
pub use lock::{FileLock, GlobalLock, LockScope, LockStrategy, PerVolumeLock};
pub use naming::{NamingResolver, PrefixSetting};

use netvol_shared::errors::{NetvolError, NetvolResult};

/// Log file name inside the log directory (rotated daily).
pub const LOG_FILE_NAME: &str = "netvol.log";

/// Send netvol's logs to `<log_dir>/netvol.log`, rotated daily.
///
/// `RUST_LOG` overrides the level, which is otherwise `debug` when `debug`
/// is set and `info` when not. Idempotent: later calls return immediately.
/// An already-installed global subscriber is left in place.
pub fn init_logging_for(log_dir: &Path, debug: bool) -> NetvolResult<()> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        NetvolError::Filesystem(format!(
            "Failed to create logs directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let _ = LOG_GUARD.get_or_init(|| {
        let file_appender = tracing_appender::rolling::daily(log_dir, LOG_FILE_NAME);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        register_to_tracing(non_blocking, default_filter(debug));

        guard
    });

    Ok(())
}

/// `RUST_LOG` if set, otherwise `debug` or `info`.
pub fn default_filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(level))
}

fn register_to_tracing(writer: tracing_appender::non_blocking::NonBlocking, filter: EnvFilter) {
    // Fails if the host already installed a global subscriber; keep theirs.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init();
}
