//! Cross-process global lock.
//!
//! Uses flock(2) on a single lock file, so that several plugin processes
//! pointed at the same mountpoint root serialize their verbs. flock locks
//! belong to the open file description, which threads of one process share;
//! an in-process gate is therefore taken first.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use netvol_shared::errors::{NetvolError, NetvolResult};

use super::{InMemoryLock, LockScope, LockStrategy, Locker};
use crate::mountpoint;

/// Global lock shared across processes through a lock file.
///
/// # Example
///
/// ```ignore
/// let strategy = FileLock::new("/var/lib/docker-volumes/netvol.lock")?;
/// let _guard = strategy.acquire(LockScope::Root)?; // flock(LOCK_EX)
/// // ... critical section ...
/// // dropped: flock(LOCK_UN)
/// ```
pub struct FileLock {
    path: PathBuf,
    local: Arc<InMemoryLock>,
    flock: Arc<Flock>,
}

impl FileLock {
    /// Open (creating if needed) the lock file at `path`.
    ///
    /// Missing parent directories are created.
    pub fn new<P: AsRef<Path>>(path: P) -> NetvolResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            mountpoint::ensure_directory(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .map_err(|e| {
                NetvolError::Filesystem(format!(
                    "failed to open lock file {}: {}",
                    path.display(),
                    e
                ))
            })?;

        Ok(Self {
            path,
            local: Arc::new(InMemoryLock::new()),
            flock: Arc::new(Flock { file }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LockStrategy for FileLock {
    fn lockers(&self, _scope: LockScope<'_>) -> Vec<Arc<dyn Locker>> {
        vec![self.local.clone(), self.flock.clone()]
    }
}

/// flock(2) on an open file.
struct Flock {
    file: File,
}

impl Flock {
    fn flock(&self, operation: libc::c_int) -> io::Result<()> {
        let fd = self.file.as_raw_fd();
        loop {
            let result = unsafe { libc::flock(fd, operation) };
            if result == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }
}

impl Locker for Flock {
    fn lock(&self) -> NetvolResult<()> {
        self.flock(libc::LOCK_EX)
            .map_err(|e| NetvolError::Internal(format!("flock(LOCK_EX) failed: {}", e)))
    }

    fn unlock(&self) {
        if let Err(e) = self.flock(libc::LOCK_UN) {
            tracing::error!(error = %e, "flock(LOCK_UN) failed");
        }
    }

    fn try_lock(&self) -> NetvolResult<bool> {
        match self.flock(libc::LOCK_EX | libc::LOCK_NB) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(NetvolError::Internal(format!(
                "flock(LOCK_EX|LOCK_NB) failed: {}",
                e
            ))),
        }
    }
}
