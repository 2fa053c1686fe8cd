//! Key-value back ends.
//!
//! Every back end exposes the same transactional contract: ordered byte-string
//! keys, point and range reads, writes, range clears, commit and rollback.
//! Reads can also be *issued* and awaited later; synchronous back ends answer
//! at issue time while the network back end returns a pending handle.

pub mod embedded;
pub mod lock;
pub mod memory;
pub mod network;

pub use embedded::EmbeddedStore;
pub use memory::MemoryStore;
pub use network::NetworkStore;

use crate::checks::CheckTime;
use crate::error::{Error, Result};

pub type KeyValue = (Vec<u8>, Vec<u8>);

/// A read to issue against a transaction: a point `get` when `end` is
/// `None`, otherwise the half-open range `[begin, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    pub begin: Vec<u8>,
    pub end: Option<Vec<u8>>,
    pub limit: Option<usize>,
    /// Snapshot reads take no locks and add no conflict ranges.
    pub snapshot: bool,
}

impl ReadRequest {
    pub fn point(key: Vec<u8>) -> Self {
        Self {
            begin: key,
            end: None,
            limit: None,
            snapshot: false,
        }
    }

    pub fn range(begin: Vec<u8>, end: Vec<u8>, limit: Option<usize>) -> Self {
        Self {
            begin,
            end: Some(end),
            limit,
            snapshot: false,
        }
    }

    pub fn snapshot(mut self) -> Self {
        self.snapshot = true;
        self
    }
}

/// Result of an issued read.
#[derive(Debug)]
pub enum ReadHandle {
    Ready(Vec<KeyValue>),
    Pending(network::PendingRead),
}

impl ReadHandle {
    pub fn is_ready(&self) -> bool {
        match self {
            ReadHandle::Ready(_) => true,
            ReadHandle::Pending(p) => p.is_finished(),
        }
    }
}

pub trait KvStore: Send + Sync {
    fn begin(&self) -> Result<Box<dyn KvTransaction>>;

    fn backend(&self) -> &'static str;

    /// Check-time policy used when the configuration names none.
    fn default_check_time(&self) -> CheckTime;
}

pub trait KvTransaction: Send {
    fn backend(&self) -> &'static str;

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    fn get_range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>)
        -> Result<Vec<KeyValue>>;

    /// Range read that takes no locks.
    fn snapshot_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        self.get_range(begin, end, limit)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn clear(&mut self, key: &[u8]) -> Result<()>;

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()>;

    fn issue(&mut self, request: ReadRequest) -> Result<ReadHandle> {
        let rows = match (&request.end, request.snapshot) {
            (None, _) => self
                .get(&request.begin)?
                .map(|v| vec![(request.begin.clone(), v)])
                .unwrap_or_default(),
            (Some(end), false) => self.get_range(&request.begin, end, request.limit)?,
            (Some(end), true) => self.snapshot_range(&request.begin, end, request.limit)?,
        };
        Ok(ReadHandle::Ready(rows))
    }

    fn await_read(&mut self, handle: ReadHandle) -> Result<Vec<KeyValue>> {
        match handle {
            ReadHandle::Ready(rows) => Ok(rows),
            ReadHandle::Pending(_) => Err(Error::Backend(format!(
                "{} store cannot await an asynchronous read",
                self.backend()
            ))),
        }
    }

    /// Makes the writes durable and releases every lock, unless
    /// `hold_locks` was called.
    fn commit(&mut self) -> Result<()>;

    /// Discards every write and releases every lock, unless `hold_locks`
    /// was called.
    fn rollback(&mut self) -> Result<()>;

    /// Keeps locks held past `commit` and `rollback` until `release_locks`.
    fn hold_locks(&mut self) {}

    fn release_locks(&mut self) {}

    fn is_rollback_pending(&self) -> bool;

    fn bytes_written(&self) -> usize;
}
