//! Serialization of lifecycle verbs.
//!
//! Every verb runs under a [`LockGuard`] obtained from the driver's
//! [`LockStrategy`]. The strategy decides which underlying [`Locker`]s a verb
//! must hold for a given [`LockScope`]; the guard takes them in order and
//! releases them in reverse when dropped.
//!
//! Three strategies are provided:
//! - [`GlobalLock`]: one in-process gate for every verb (the default)
//! - [`FileLock`]: the global gate plus flock(2) on a lock file, for several
//!   processes sharing one mountpoint root
//! - [`PerVolumeLock`]: a gate per target name, with listing exclusive
//!   against all of them

mod file;
mod memory;

pub use file::FileLock;
pub use memory::{GlobalLock, InMemoryLock, PerVolumeLock};

use std::sync::Arc;

use netvol_shared::errors::NetvolResult;

/// What a verb is about to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockScope<'a> {
    /// The mountpoint root as a whole (listing, capability queries).
    Root,
    /// A single volume, by target name.
    Volume(&'a str),
}

/// A lock that provides mutual exclusion.
pub trait Locker: Send + Sync {
    /// Acquire the lock, blocking until it becomes available.
    fn lock(&self) -> NetvolResult<()>;

    /// Release the lock.
    ///
    /// Must only be called by the holder.
    fn unlock(&self);

    /// Try to acquire the lock without blocking.
    ///
    /// Returns `true` if the lock was acquired, `false` if it was already held.
    fn try_lock(&self) -> NetvolResult<bool>;
}

/// Policy mapping a [`LockScope`] to the lockers a verb must hold.
pub trait LockStrategy: Send + Sync {
    /// Lockers for `scope`, in acquisition order.
    fn lockers(&self, scope: LockScope<'_>) -> Vec<Arc<dyn Locker>>;

    /// Block until every locker for `scope` is held.
    fn acquire(&self, scope: LockScope<'_>) -> NetvolResult<LockGuard> {
        LockGuard::acquire(self.lockers(scope))
    }

    /// Acquire every locker for `scope` without blocking.
    ///
    /// Returns `None` if any of them is already held elsewhere.
    fn try_acquire(&self, scope: LockScope<'_>) -> NetvolResult<Option<LockGuard>> {
        LockGuard::try_acquire(self.lockers(scope))
    }
}

/// RAII guard over an ordered set of held lockers.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    held: Vec<Arc<dyn Locker>>,
}

impl LockGuard {
    /// Lock each locker in order.
    ///
    /// If one fails, the ones already taken are released before returning.
    pub fn acquire(lockers: Vec<Arc<dyn Locker>>) -> NetvolResult<Self> {
        let mut guard = Self {
            held: Vec::with_capacity(lockers.len()),
        };
        for locker in lockers {
            locker.lock()?;
            guard.held.push(locker);
        }
        Ok(guard)
    }

    /// Non-blocking variant of [`acquire`](LockGuard::acquire).
    pub fn try_acquire(lockers: Vec<Arc<dyn Locker>>) -> NetvolResult<Option<Self>> {
        let mut guard = Self {
            held: Vec::with_capacity(lockers.len()),
        };
        for locker in lockers {
            if !locker.try_lock()? {
                return Ok(None);
            }
            guard.held.push(locker);
        }
        Ok(Some(guard))
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        for locker in self.held.iter().rev() {
            locker.unlock();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn exercise_strategy(strategy: Arc<dyn LockStrategy>) {
        let guard = strategy.acquire(LockScope::Volume("fake_a")).expect("acquire");
        assert!(
            strategy.try_acquire(LockScope::Volume("fake_a")).unwrap().is_none(),
            "held volume scope should not be re-acquirable"
        );
        drop(guard);
        assert!(
            strategy.try_acquire(LockScope::Root).unwrap().is_some(),
            "released guard should free the strategy"
        );

        let counter = Arc::new(AtomicU32::new(0));
        let mut handles = vec![];
        for i in 0..4 {
            let strategy = strategy.clone();
            let counter = counter.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    let scope = if i % 2 == 0 {
                        LockScope::Root
                    } else {
                        LockScope::Volume("fake_shared")
                    };
                    let _guard = strategy.acquire(scope).unwrap();
                    let val = counter.load(Ordering::SeqCst);
                    thread::yield_now();
                    counter.store(val + 1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 400);
    }

    #[test]
    fn test_global_strategy() {
        exercise_strategy(Arc::new(GlobalLock::new()));
    }

    #[test]
    fn test_per_volume_strategy() {
        exercise_strategy(Arc::new(PerVolumeLock::new()));
    }

    #[test]
    fn test_file_strategy() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let strategy = FileLock::new(temp_dir.path().join("netvol.lock")).expect("create");
        exercise_strategy(Arc::new(strategy));
    }

    #[test]
    fn test_guard_releases_in_reverse_on_drop() {
        let a: Arc<dyn Locker> = Arc::new(InMemoryLock::new());
        let b: Arc<dyn Locker> = Arc::new(InMemoryLock::new());

        {
            let _guard = LockGuard::acquire(vec![a.clone(), b.clone()]).unwrap();
            assert!(!a.try_lock().unwrap());
            assert!(!b.try_lock().unwrap());
        }

        assert!(a.try_lock().unwrap());
        assert!(b.try_lock().unwrap());
        a.unlock();
        b.unlock();
    }

    #[test]
    fn test_try_acquire_releases_partial_set() {
        let a: Arc<dyn Locker> = Arc::new(InMemoryLock::new());
        let b: Arc<dyn Locker> = Arc::new(InMemoryLock::new());

        b.lock().unwrap();
        assert!(LockGuard::try_acquire(vec![a.clone(), b.clone()]).unwrap().is_none());
        // `a` was taken then released by the partial guard
        assert!(a.try_lock().unwrap());
        a.unlock();
        b.unlock();
    }
}
