//! In-process transactional map.
//!
//! One shared ordered map guarded by a coarse mutex that is only held for the
//! duration of a single map operation, never across a lock wait. Isolation
//! comes from the per-key tagged locks; rollback replays an undo log.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::checks::CheckTime;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::lock::{LockSet, LockTable};
use crate::store::{KeyValue, KvStore, KvTransaction};

pub const BACKEND: &str = "memory";

pub(crate) type OrderedMap = BTreeMap<Vec<u8>, Vec<u8>>;

pub(crate) fn range_of<'a>(
    map: &'a OrderedMap,
    begin: &[u8],
    end: &[u8],
) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<u8>)> + 'a {
    // An inverted or empty range reads nothing.
    (begin < end)
        .then(|| map.range::<[u8], _>((Bound::Included(begin), Bound::Excluded(end))))
        .into_iter()
        .flatten()
}

#[derive(Debug)]
struct MemoryInner {
    data: Mutex<OrderedMap>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                data: Mutex::new(BTreeMap::new()),
                locks: Arc::new(LockTable::new()),
                lock_timeout: config.lock_timeout(),
            }),
        }
    }

    /// Copy of the committed and in-flight contents of the shared map.
    pub fn snapshot(&self) -> OrderedMap {
        self.inner.data.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.data.lock().is_empty()
    }

    pub fn begin_memory(&self) -> MemoryTxn {
        MemoryTxn {
            inner: self.inner.clone(),
            locks: LockSet::new(self.inner.locks.clone(), self.inner.lock_timeout, BACKEND),
            undo: Vec::new(),
            rollback_pending: false,
            bytes_written: 0,
        }
    }
}

impl KvStore for MemoryStore {
    fn begin(&self) -> Result<Box<dyn KvTransaction>> {
        Ok(Box::new(self.begin_memory()))
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_check_time(&self) -> CheckTime {
        CheckTime::Immediate
    }
}

#[derive(Debug)]
struct UndoRecord {
    key: Vec<u8>,
    prior: Option<Vec<u8>>,
}

#[derive(Debug)]
pub struct MemoryTxn {
    inner: Arc<MemoryInner>,
    locks: LockSet,
    undo: Vec<UndoRecord>,
    rollback_pending: bool,
    bytes_written: usize,
}

impl MemoryTxn {
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::LockTimeout { .. })) {
            self.rollback_pending = true;
        }
        result
    }

    fn replay_undo(&mut self) {
        let mut data = self.inner.data.lock();
        while let Some(record) = self.undo.pop() {
            match record.prior {
                Some(value) => {
                    data.insert(record.key, value);
                }
                None => {
                    data.remove(&record.key);
                }
            }
        }
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }
}

impl KvTransaction for MemoryTxn {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let locked = self.locks.shared(key);
        self.guard(locked)?;
        Ok(self.inner.data.lock().get(key).cloned())
    }

    fn get_range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>) -> Result<Vec<KeyValue>> {
        let keys: Vec<Vec<u8>> = {
            let data = self.inner.data.lock();
            range_of(&data, begin, end)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in &keys {
            let locked = self.locks.shared(key);
            self.guard(locked)?;
        }
        // Values are read after locking so they cannot move before commit.
        let data = self.inner.data.lock();
        Ok(keys
            .into_iter()
            .filter_map(|k| data.get(&k).cloned().map(|v| (k, v)))
            .collect())
    }

    fn snapshot_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        let data = self.inner.data.lock();
        Ok(range_of(&data, begin, end)
            .take(limit.unwrap_or(usize::MAX))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let locked = self.locks.exclusive(key);
        self.guard(locked)?;
        let prior = self.inner.data.lock().insert(key.to_vec(), value.to_vec());
        self.undo.push(UndoRecord {
            key: key.to_vec(),
            prior,
        });
        self.bytes_written += key.len() + value.len();
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        let locked = self.locks.exclusive(key);
        self.guard(locked)?;
        let prior = self.inner.data.lock().remove(key);
        if prior.is_some() {
            self.undo.push(UndoRecord {
                key: key.to_vec(),
                prior,
            });
        }
        self.bytes_written += key.len();
        Ok(())
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let victims: Vec<Vec<u8>> = {
            let data = self.inner.data.lock();
            range_of(&data, begin, end).map(|(k, _)| k.clone()).collect()
        };
        for key in &victims {
            let locked = self.locks.exclusive(key);
            self.guard(locked)?;
        }
        let mut data = self.inner.data.lock();
        for key in victims {
            if let Some(prior) = data.remove(&key) {
                self.bytes_written += key.len();
                self.undo.push(UndoRecord {
                    key,
                    prior: Some(prior),
                });
            }
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.rollback_pending {
            self.rollback()?;
            return Err(Error::TransactionAborted);
        }
        self.undo.clear();
        self.locks.end();
        self.bytes_written = 0;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.replay_undo();
        self.locks.end();
        self.rollback_pending = false;
        self.bytes_written = 0;
        Ok(())
    }

    fn hold_locks(&mut self) {
        self.locks.hold_past_end();
    }

    fn release_locks(&mut self) {
        self.locks.release_all();
    }

    fn is_rollback_pending(&self) -> bool {
        self.rollback_pending
    }

    fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}

impl Drop for MemoryTxn {
    fn drop(&mut self) {
        if !self.undo.is_empty() {
            tracing::debug!(records = self.undo.len(), "rolling back abandoned transaction");
            self.replay_undo();
        }
    }
}
