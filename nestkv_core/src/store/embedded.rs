//! Embedded durable back end.
//!
//! Committed data lives in an ordered map loaded from `data.kv`. Transactions
//! buffer writes in a local overlay under the shared per-key locks; commit
//! appends the overlay to `wal.log`, syncs, applies it and checkpoints.
//!
//! WAL records, one per line, hex-encoded bytes:
//!
//! ```text
//! BEGIN 7
//! SET 7 <key> <value>
//! CLEAR 7 <key>
//! COMMIT 7
//! ```
//!
//! Recovery replays transactions with a `COMMIT` record and ignores the rest.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::checks::CheckTime;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::lock::{LockSet, LockTable};
use crate::store::memory::{range_of, OrderedMap};
use crate::store::{KeyValue, KvStore, KvTransaction};

pub const BACKEND: &str = "embedded";

const DATA_FILE: &str = "data.kv";
const WAL_FILE: &str = "wal.log";

#[derive(Debug)]
struct WalState {
    file: File,
    commits_since_checkpoint: u32,
}

#[derive(Debug)]
struct EmbeddedInner {
    root: PathBuf,
    data: Mutex<OrderedMap>,
    // Held across WAL append, apply and checkpoint so a checkpoint never
    // truncates records that are not yet applied.
    wal: Mutex<WalState>,
    locks: Arc<LockTable>,
    lock_timeout: Duration,
    checkpoint_interval: u32,
    next_txn: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct EmbeddedStore {
    inner: Arc<EmbeddedInner>,
}

impl EmbeddedStore {
    /// Opens (creating if needed) the store under `root` and recovers any
    /// committed transactions left in the WAL.
    pub fn open(root: impl Into<PathBuf>, config: &StoreConfig) -> Result<Self> {
        let root = root.into();
        initialize_layout(&root)?;
        let mut data = load_data_file(&root.join(DATA_FILE))?;
        let wal_content = fs::read_to_string(root.join(WAL_FILE))?;
        let replayed = replay_wal(&wal_content, &mut data);
        if replayed > 0 {
            tracing::info!(root = %root.display(), replayed, "recovered committed WAL transactions");
        }
        write_data_file(&root.join(DATA_FILE), &data)?;
        let file = OpenOptions::new().append(true).open(root.join(WAL_FILE))?;
        file.set_len(0)?;

        Ok(Self {
            inner: Arc::new(EmbeddedInner {
                root,
                data: Mutex::new(data),
                wal: Mutex::new(WalState {
                    file,
                    commits_since_checkpoint: 0,
                }),
                locks: Arc::new(LockTable::new()),
                lock_timeout: config.lock_timeout(),
                checkpoint_interval: config.checkpoint_interval.max(1),
                next_txn: AtomicU64::new(1),
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    /// Copy of the committed contents.
    pub fn snapshot(&self) -> OrderedMap {
        self.inner.data.lock().clone()
    }

    /// Rewrites `data.kv` from committed data and truncates the WAL.
    pub fn checkpoint(&self) -> Result<()> {
        let mut wal = self.inner.wal.lock();
        self.checkpoint_locked(&mut wal)
    }

    fn checkpoint_locked(&self, wal: &mut WalState) -> Result<()> {
        let data = self.inner.data.lock().clone();
        write_data_file(&self.inner.root.join(DATA_FILE), &data)?;
        wal.file.set_len(0)?;
        wal.file.sync_data()?;
        wal.commits_since_checkpoint = 0;
        tracing::debug!(entries = data.len(), "embedded checkpoint");
        Ok(())
    }

    pub fn begin_embedded(&self) -> EmbeddedTxn {
        EmbeddedTxn {
            store: self.clone(),
            id: self.inner.next_txn.fetch_add(1, Ordering::SeqCst),
            locks: LockSet::new(self.inner.locks.clone(), self.inner.lock_timeout, BACKEND),
            overlay: BTreeMap::new(),
            rollback_pending: false,
            bytes_written: 0,
        }
    }

    fn commit_overlay(&self, id: u64, overlay: &BTreeMap<Vec<u8>, Option<Vec<u8>>>) -> Result<()> {
        let mut wal = self.inner.wal.lock();
        let mut record = format!("BEGIN {id}\n");
        for (key, value) in overlay {
            match value {
                Some(v) => {
                    record.push_str(&format!("SET {id} {} {}\n", hex::encode(key), hex::encode(v)));
                }
                None => record.push_str(&format!("CLEAR {id} {}\n", hex::encode(key))),
            }
        }
        record.push_str(&format!("COMMIT {id}\n"));
        wal.file.write_all(record.as_bytes())?;
        wal.file.sync_data()?;

        {
            let mut data = self.inner.data.lock();
            apply(&mut data, overlay.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        // Durable and applied from here on: a failed checkpoint leaves the
        // WAL intact and the counter unchanged, so the next commit retries.
        wal.commits_since_checkpoint += 1;
        if wal.commits_since_checkpoint >= self.inner.checkpoint_interval {
            if let Err(e) = self.checkpoint_locked(&mut wal) {
                tracing::warn!(error = %e, "checkpoint failed; will retry on next commit");
            }
        }
        Ok(())
    }
}

impl KvStore for EmbeddedStore {
    fn begin(&self) -> Result<Box<dyn KvTransaction>> {
        Ok(Box::new(self.begin_embedded()))
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_check_time(&self) -> CheckTime {
        CheckTime::Immediate
    }
}

#[derive(Debug)]
pub struct EmbeddedTxn {
    store: EmbeddedStore,
    id: u64,
    locks: LockSet,
    overlay: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    rollback_pending: bool,
    bytes_written: usize,
}

impl EmbeddedTxn {
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::LockTimeout { .. })) {
            self.rollback_pending = true;
        }
        result
    }

    fn merged_range(&self, begin: &[u8], end: &[u8]) -> OrderedMap {
        let mut merged: OrderedMap = {
            let data = self.store.inner.data.lock();
            range_of(&data, begin, end)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };
        if begin < end {
            for (k, v) in self.overlay.range::<[u8], _>((
                std::ops::Bound::Included(begin),
                std::ops::Bound::Excluded(end),
            )) {
                match v {
                    Some(v) => {
                        merged.insert(k.clone(), v.clone());
                    }
                    None => {
                        merged.remove(k);
                    }
                }
            }
        }
        merged
    }

    fn discard(&mut self) {
        self.overlay.clear();
        self.locks.end();
        self.rollback_pending = false;
        self.bytes_written = 0;
    }
}

impl KvTransaction for EmbeddedTxn {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let locked = self.locks.shared(key);
        self.guard(locked)?;
        if let Some(local) = self.overlay.get(key) {
            return Ok(local.clone());
        }
        Ok(self.store.inner.data.lock().get(key).cloned())
    }

    fn get_range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>) -> Result<Vec<KeyValue>> {
        let keys: Vec<Vec<u8>> = self
            .merged_range(begin, end)
            .into_keys()
            .take(limit.unwrap_or(usize::MAX))
            .collect();
        for key in &keys {
            let locked = self.locks.shared(key);
            self.guard(locked)?;
        }
        let merged = self.merged_range(begin, end);
        Ok(keys
            .into_iter()
            .filter_map(|k| merged.get(&k).cloned().map(|v| (k, v)))
            .collect())
    }

    fn snapshot_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        Ok(self
            .merged_range(begin, end)
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let locked = self.locks.exclusive(key);
        self.guard(locked)?;
        self.overlay.insert(key.to_vec(), Some(value.to_vec()));
        self.bytes_written += key.len() + value.len();
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        let locked = self.locks.exclusive(key);
        self.guard(locked)?;
        self.overlay.insert(key.to_vec(), None);
        self.bytes_written += key.len();
        Ok(())
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        let victims: Vec<Vec<u8>> = self.merged_range(begin, end).into_keys().collect();
        for key in &victims {
            let locked = self.locks.exclusive(key);
            self.guard(locked)?;
        }
        for key in victims {
            self.bytes_written += key.len();
            self.overlay.insert(key, None);
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if self.rollback_pending {
            self.discard();
            return Err(Error::TransactionAborted);
        }
        let result = if self.overlay.is_empty() {
            Ok(())
        } else {
            self.store.commit_overlay(self.id, &self.overlay)
        };
        self.discard();
        result
    }

    fn rollback(&mut self) -> Result<()> {
        self.discard();
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

fn initialize_layout(root: &Path) -> Result<()> {
    fs::create_dir_all(root)
        .map_err(|e| Error::Backend(format!("Failed to create store directory: {e}")))?;
    for name in [DATA_FILE, WAL_FILE] {
        let path = root.join(name);
        if !path.exists() {
            File::create(&path)
                .map_err(|e| Error::Backend(format!("Failed to create {name}: {e}")))?;
        }
    }
    Ok(())
}

fn load_data_file(path: &Path) -> Result<OrderedMap> {
    let content = fs::read_to_string(path)?;
    let mut data = BTreeMap::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let (k, v) = line.split_once('\t').ok_or_else(|| {
            Error::Backend(format!("Malformed entry in {DATA_FILE} at line {}", line_no + 1))
        })?;
        let key = hex::decode(k).map_err(|e| {
            Error::Backend(format!("Malformed key in {DATA_FILE} at line {}: {e}", line_no + 1))
        })?;
        let value = hex::decode(v).map_err(|e| {
            Error::Backend(format!("Malformed value in {DATA_FILE} at line {}: {e}", line_no + 1))
        })?;
        data.insert(key, value);
    }
    Ok(data)
}

fn write_data_file(path: &Path, data: &OrderedMap) -> Result<()> {
    let mut payload = String::new();
    for (k, v) in data {
        payload.push_str(&format!("{}\t{}\n", hex::encode(k), hex::encode(v)));
    }
    let tmp = path.with_extension("kv.tmp");
    fs::write(&tmp, payload)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn apply(data: &mut OrderedMap, writes: impl IntoIterator<Item = (Vec<u8>, Option<Vec<u8>>)>) {
    for (key, value) in writes {
        match value {
            Some(v) => {
                data.insert(key, v);
            }
            None => {
                data.remove(&key);
            }
        }
    }
}

type PendingWrites = Vec<(Vec<u8>, Option<Vec<u8>>)>;

/// Applies every committed transaction in `content` to `data` and returns
/// how many were applied. Unparseable lines are skipped; a torn tail simply
/// leaves its transaction uncommitted.
fn replay_wal(content: &str, data: &mut OrderedMap) -> usize {
    let mut open: HashMap<u64, PendingWrites> = HashMap::new();
    let mut committed = 0;
    for (line_no, line) in content.lines().enumerate() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let parsed = match parts.as_slice() {
            ["BEGIN", id] => id.parse::<u64>().ok().map(|id| {
                open.insert(id, Vec::new());
            }),
            ["SET", id, k, v] => id.parse::<u64>().ok().and_then(|id| {
                let key = hex::decode(k).ok()?;
                let value = hex::decode(v).ok()?;
                open.get_mut(&id).map(|w| w.push((key, Some(value))))
            }),
            ["CLEAR", id, k] => id.parse::<u64>().ok().and_then(|id| {
                let key = hex::decode(k).ok()?;
                open.get_mut(&id).map(|w| w.push((key, None)))
            }),
            ["COMMIT", id] => id.parse::<u64>().ok().map(|id| {
                if let Some(writes) = open.remove(&id) {
                    apply(data, writes);
                    committed += 1;
                }
            }),
            ["ROLLBACK", id] => id.parse::<u64>().ok().map(|id| {
                open.remove(&id);
            }),
            [] => Some(()),
            _ => None,
        };
        if parsed.is_none() {
            tracing::warn!(line = line_no + 1, "skipping malformed WAL record");
        }
    }
    committed
}
