//! Per-key tagged read/write locks.
//!
//! Each lock carries a version that moves every time an exclusive holder is
//! admitted. Upgrading shared to exclusive releases the shared hold, waits for
//! exclusivity and then compares versions: if another writer got in between,
//! the upgrade fails instead of silently proceeding on stale reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
    waiting_writers: usize,
    version: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeFailure {
    Timeout,
    /// Another writer was admitted while this holder waited.
    Conflict,
}

#[derive(Debug, Default)]
pub struct TaggedLock {
    state: Mutex<LockState>,
    cond: Condvar,
}

impl TaggedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn lock_shared(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        // Waiting writers go first so a stream of readers cannot starve them.
        while st.writer || st.waiting_writers > 0 {
            if self.cond.wait_until(&mut st, deadline).timed_out()
                && (st.writer || st.waiting_writers > 0)
            {
                return false;
            }
        }
        st.readers += 1;
        true
    }

    pub fn lock_exclusive(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        if !self.wait_exclusive(&mut st, deadline) {
            return false;
        }
        st.writer = true;
        st.version += 1;
        true
    }

    /// Converts a shared hold into an exclusive one. On failure the shared
    /// hold is gone as well.
    pub fn upgrade(&self, timeout: Duration) -> std::result::Result<(), UpgradeFailure> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock();
        let seen = st.version;
        st.readers = st.readers.saturating_sub(1);
        self.cond.notify_all();
        if !self.wait_exclusive(&mut st, deadline) {
            return Err(UpgradeFailure::Timeout);
        }
        if st.version != seen {
            self.cond.notify_all();
            return Err(UpgradeFailure::Conflict);
        }
        st.writer = true;
        st.version += 1;
        Ok(())
    }

    pub fn unlock_shared(&self) {
        let mut st = self.state.lock();
        st.readers = st.readers.saturating_sub(1);
        self.cond.notify_all();
    }

    pub fn unlock_exclusive(&self) {
        let mut st = self.state.lock();
        st.writer = false;
        self.cond.notify_all();
    }

    fn wait_exclusive(
        &self,
        st: &mut parking_lot::MutexGuard<'_, LockState>,
        deadline: Instant,
    ) -> bool {
        st.waiting_writers += 1;
        while st.writer || st.readers > 0 {
            if self.cond.wait_until(st, deadline).timed_out() && (st.writer || st.readers > 0) {
                st.waiting_writers -= 1;
                self.cond.notify_all();
                return false;
            }
        }
        st.waiting_writers -= 1;
        true
    }
}

/// Lazily populated lock per distinct key, shared by every transaction of
/// one store. Entries are never removed.
#[derive(Debug, Default)]
pub struct LockTable {
    locks: DashMap<Vec<u8>, Arc<TaggedLock>>,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &[u8]) -> Arc<TaggedLock> {
        if let Some(existing) = self.locks.get(key) {
            return existing.value().clone();
        }
        self.locks
            .entry(key.to_vec())
            .or_insert_with(|| Arc::new(TaggedLock::new()))
            .value()
            .clone()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

#[derive(Debug)]
struct Held {
    lock: Arc<TaggedLock>,
    mode: LockMode,
}

/// Locks held by one transaction.
#[derive(Debug)]
pub struct LockSet {
    table: Arc<LockTable>,
    held: HashMap<Vec<u8>, Held>,
    timeout: Duration,
    backend: &'static str,
    hold_past_end: bool,
}

impl LockSet {
    pub fn new(table: Arc<LockTable>, timeout: Duration, backend: &'static str) -> Self {
        Self {
            table,
            held: HashMap::new(),
            timeout,
            backend,
            hold_past_end: false,
        }
    }

    /// Makes `end` a no-op; locks then go with `release_all` or drop.
    pub fn hold_past_end(&mut self) {
        self.hold_past_end = true;
    }

    /// Called when the owning transaction commits or rolls back.
    pub fn end(&mut self) {
        if !self.hold_past_end {
            self.release_all();
        }
    }

    fn timeout_error(&self, lock_type: &'static str) -> Error {
        Error::LockTimeout {
            millis: self.timeout.as_millis() as u64,
            lock_type,
            backend: self.backend,
        }
    }

    pub fn holds(&self, key: &[u8]) -> bool {
        self.held.contains_key(key)
    }

    pub fn holds_exclusive(&self, key: &[u8]) -> bool {
        self.held
            .get(key)
            .is_some_and(|h| h.mode == LockMode::Exclusive)
    }

    /// No-op when `key` is already held in either mode.
    pub fn shared(&mut self, key: &[u8]) -> Result<()> {
        if self.held.contains_key(key) {
            return Ok(());
        }
        let lock = self.table.lock_for(key);
        if !lock.lock_shared(self.timeout) {
            tracing::warn!(backend = self.backend, "read lock timed out");
            return Err(self.timeout_error("read"));
        }
        self.held.insert(
            key.to_vec(),
            Held {
                lock,
                mode: LockMode::Shared,
            },
        );
        Ok(())
    }

    /// Takes `key` exclusively, upgrading a shared hold.
    pub fn exclusive(&mut self, key: &[u8]) -> Result<()> {
        let mode = self.held.get(key).map(|h| h.mode);
        match mode {
            Some(LockMode::Exclusive) => Ok(()),
            Some(LockMode::Shared) => {
                let lock = match self.held.get(key) {
                    Some(h) => h.lock.clone(),
                    None => return Ok(()),
                };
                match lock.upgrade(self.timeout) {
                    Ok(()) => {
                        if let Some(h) = self.held.get_mut(key) {
                            h.mode = LockMode::Exclusive;
                        }
                        Ok(())
                    }
                    Err(failure) => {
                        self.held.remove(key);
                        tracing::warn!(backend = self.backend, ?failure, "lock upgrade failed");
                        Err(match failure {
                            UpgradeFailure::Timeout => self.timeout_error("write"),
                            UpgradeFailure::Conflict => self.timeout_error("optimistic upgrade"),
                        })
                    }
                }
            }
            None => {
                let lock = self.table.lock_for(key);
                if !lock.lock_exclusive(self.timeout) {
                    tracing::warn!(backend = self.backend, "write lock timed out");
                    return Err(self.timeout_error("write"));
                }
                self.held.insert(
                    key.to_vec(),
                    Held {
                        lock,
                        mode: LockMode::Exclusive,
                    },
                );
                Ok(())
            }
        }
    }

    pub fn release_all(&mut self) {
        for (_, held) in self.held.drain() {
            match held.mode {
                LockMode::Shared => held.lock.unlock_shared(),
                LockMode::Exclusive => held.lock.unlock_exclusive(),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

impl Drop for LockSet {
    fn drop(&mut self) {
        self.release_all();
    }
}
