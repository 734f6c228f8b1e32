//! In-process lock strategies.
//!
//! These are NOT multiprocess-safe; see [`FileLock`](super::FileLock) for a
//! root shared by several processes.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use netvol_shared::errors::NetvolResult;

use super::{LockScope, LockStrategy, Locker};

/// Blocking exclusive lock.
///
/// Unlike a `Mutex` guard, it can be held across the borrow-free
/// [`Locker`] interface.
pub struct InMemoryLock {
    locked: Mutex<bool>,
    released: Condvar,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

impl Default for InMemoryLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Locker for InMemoryLock {
    fn lock(&self) -> NetvolResult<()> {
        let mut locked = self.locked.lock();
        while *locked {
            self.released.wait(&mut locked);
        }
        *locked = true;
        Ok(())
    }

    fn unlock(&self) {
        *self.locked.lock() = false;
        self.released.notify_one();
    }

    fn try_lock(&self) -> NetvolResult<bool> {
        let mut locked = self.locked.lock();
        if *locked {
            return Ok(false);
        }
        *locked = true;
        Ok(true)
    }
}

/// One gate for every verb.
///
/// Serializes all directory work and every backend call made by the driver.
pub struct GlobalLock {
    gate: Arc<InMemoryLock>,
}

impl GlobalLock {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(InMemoryLock::new()),
        }
    }
}

impl Default for GlobalLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStrategy for GlobalLock {
    fn lockers(&self, _scope: LockScope<'_>) -> Vec<Arc<dyn Locker>> {
        vec![self.gate.clone()]
    }
}

#[derive(Default)]
struct GateState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
}

/// Readers/writer gate; waiting writers block new readers.
#[derive(Default)]
struct RwGate {
    state: Mutex<GateState>,
    changed: Condvar,
}

struct SharedGate(Arc<RwGate>);

struct ExclusiveGate(Arc<RwGate>);

impl Locker for SharedGate {
    fn lock(&self) -> NetvolResult<()> {
        let mut state = self.0.state.lock();
        while state.writer || state.waiting_writers > 0 {
            self.0.changed.wait(&mut state);
        }
        state.readers += 1;
        Ok(())
    }

    fn unlock(&self) {
        let mut state = self.0.state.lock();
        state.readers = state.readers.saturating_sub(1);
        if state.readers == 0 {
            self.0.changed.notify_all();
        }
    }

    fn try_lock(&self) -> NetvolResult<bool> {
        let mut state = self.0.state.lock();
        if state.writer || state.waiting_writers > 0 {
            return Ok(false);
        }
        state.readers += 1;
        Ok(true)
    }
}

impl Locker for ExclusiveGate {
    fn lock(&self) -> NetvolResult<()> {
        let mut state = self.0.state.lock();
        state.waiting_writers += 1;
        while state.writer || state.readers > 0 {
            self.0.changed.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer = true;
        Ok(())
    }

    fn unlock(&self) {
        let mut state = self.0.state.lock();
        state.writer = false;
        self.0.changed.notify_all();
    }

    fn try_lock(&self) -> NetvolResult<bool> {
        let mut state = self.0.state.lock();
        if state.writer || state.readers > 0 {
            return Ok(false);
        }
        state.writer = true;
        Ok(true)
    }
}

/// A gate per target name.
///
/// Verbs on different volumes run concurrently; a [`LockScope::Root`] verb
/// waits for all of them and blocks new ones while it runs. Per-volume gates
/// are created on first use and kept for the life of the strategy.
pub struct PerVolumeLock {
    root: Arc<RwGate>,
    volumes: Mutex<HashMap<String, Arc<InMemoryLock>>>,
}

impl PerVolumeLock {
    pub fn new() -> Self {
        Self {
            root: Arc::new(RwGate::default()),
            volumes: Mutex::new(HashMap::new()),
        }
    }

    fn volume_gate(&self, target: &str) -> Arc<InMemoryLock> {
        self.volumes
            .lock()
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(InMemoryLock::new()))
            .clone()
    }
}

impl Default for PerVolumeLock {
    fn default() -> Self {
        Self::new()
    }
}

impl LockStrategy for PerVolumeLock {
    fn lockers(&self, scope: LockScope<'_>) -> Vec<Arc<dyn Locker>> {
        match scope {
            LockScope::Root => vec![Arc::new(ExclusiveGate(self.root.clone()))],
            LockScope::Volume(target) => vec![
                Arc::new(SharedGate(self.root.clone())),
                self.volume_gate(target),
            ],
        }
    }
}
