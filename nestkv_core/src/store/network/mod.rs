//! Network back end.
//!
//! Reads are spawned onto a tokio runtime and returned as pending handles so
//! several can be in flight at once; writes are buffered locally and shipped
//! with the commit. Isolation is optimistic: the node rejects a commit whose
//! read ranges were written by anyone after the transaction's read version.
//!
//! Waiting uses `Handle::block_on`, so transactions must be driven from
//! threads that are not themselves running inside the runtime.

pub mod node;
pub mod transport;

pub use node::{key_after, CommitRequest, KvNode, Mutation, RemoteRead};
pub use transport::{LoopbackTransport, Transport, TransportFuture};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::checks::CheckTime;
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::store::{KeyValue, KvStore, KvTransaction, ReadHandle, ReadRequest};

pub const BACKEND: &str = "network";

/// A read in flight.
#[derive(Debug)]
pub struct PendingRead {
    join: JoinHandle<Result<Vec<KeyValue>>>,
    request: ReadRequest,
    /// Local mutations issued before the read; later ones stay invisible.
    visible_mutations: usize,
}

impl PendingRead {
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}

#[derive(Clone)]
pub struct NetworkStore {
    transport: Arc<dyn Transport>,
    handle: Handle,
    // Keeps an owned runtime alive for stores that built their own.
    _runtime: Option<Arc<Runtime>>,
}

impl std::fmt::Debug for NetworkStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStore").finish_non_exhaustive()
    }
}

impl NetworkStore {
    pub fn new(transport: Arc<dyn Transport>, handle: Handle) -> Self {
        Self {
            transport,
            handle,
            _runtime: None,
        }
    }

    /// Builds a store with its own multi-thread runtime.
    pub fn with_own_runtime(transport: Arc<dyn Transport>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()?;
        Ok(Self {
            transport,
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }

    /// In-process node behind a loopback transport using the configured
    /// latency.
    pub fn loopback(node: Arc<KvNode>, config: &StoreConfig) -> Result<Self> {
        let transport = LoopbackTransport::new(node)
            .with_latency(Duration::from_millis(config.network_latency_ms));
        Self::with_own_runtime(Arc::new(transport))
    }

    pub fn begin_network(&self) -> NetworkTxn {
        NetworkTxn {
            transport: self.transport.clone(),
            handle: self.handle.clone(),
            read_version: None,
            mutations: Vec::new(),
            read_ranges: Vec::new(),
            rollback_pending: false,
            bytes_written: 0,
        }
    }
}

impl KvStore for NetworkStore {
    fn begin(&self) -> Result<Box<dyn KvTransaction>> {
        Ok(Box::new(self.begin_network()))
    }

    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn default_check_time(&self) -> CheckTime {
        CheckTime::Delayed
    }
}

pub struct NetworkTxn {
    transport: Arc<dyn Transport>,
    handle: Handle,
    read_version: Option<u64>,
    mutations: Vec<Mutation>,
    read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    rollback_pending: bool,
    bytes_written: usize,
}

impl NetworkTxn {
    fn ensure_read_version(&mut self) -> Result<u64> {
        if let Some(v) = self.read_version {
            return Ok(v);
        }
        let v = self.handle.block_on(self.transport.read_version())?;
        self.read_version = Some(v);
        Ok(v)
    }

    fn touches_local_writes(&self, begin: &[u8], end: &[u8]) -> bool {
        let range = (begin.to_vec(), end.to_vec());
        self.mutations
            .iter()
            .any(|m| node::ranges_intersect(&m.range(), &range))
    }

    fn merge_local(&self, request: &ReadRequest, visible: usize, rows: Vec<KeyValue>) -> Vec<KeyValue> {
        let (begin, end) = request_bounds(request);
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = rows.into_iter().collect();
        for m in &self.mutations[..visible.min(self.mutations.len())] {
            match m {
                Mutation::Set { key, value } => {
                    if *key >= begin && *key < end {
                        merged.insert(key.clone(), value.clone());
                    }
                }
                Mutation::Clear { key } => {
                    merged.remove(key);
                }
                Mutation::ClearRange { begin: b, end: e } => {
                    merged.retain(|k, _| !(k >= b && k < e));
                }
            }
        }
        merged
            .into_iter()
            .take(request.limit.unwrap_or(usize::MAX))
            .collect()
    }

    fn push(&mut self, mutation: Mutation) {
        self.bytes_written += mutation.size();
        self.mutations.push(mutation);
    }

    fn reset(&mut self) {
        self.read_version = None;
        self.mutations.clear();
        self.read_ranges.clear();
        self.rollback_pending = false;
        self.bytes_written = 0;
    }
}

fn request_bounds(request: &ReadRequest) -> (Vec<u8>, Vec<u8>) {
    match &request.end {
        Some(end) => (request.begin.clone(), end.clone()),
        None => (request.begin.clone(), key_after(&request.begin)),
    }
}

impl KvTransaction for NetworkTxn {
    fn backend(&self) -> &'static str {
        BACKEND
    }

    fn get(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let handle = self.issue(ReadRequest::point(key.to_vec()))?;
        Ok(self.await_read(handle)?.into_iter().next().map(|(_, v)| v))
    }

    fn get_range(&mut self, begin: &[u8], end: &[u8], limit: Option<usize>) -> Result<Vec<KeyValue>> {
        let handle = self.issue(ReadRequest::range(begin.to_vec(), end.to_vec(), limit))?;
        self.await_read(handle)
    }

    fn snapshot_range(
        &mut self,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<KeyValue>> {
        let handle =
            self.issue(ReadRequest::range(begin.to_vec(), end.to_vec(), limit).snapshot())?;
        self.await_read(handle)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(Mutation::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    fn clear(&mut self, key: &[u8]) -> Result<()> {
        self.push(Mutation::Clear { key: key.to_vec() });
        Ok(())
    }

    fn clear_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.push(Mutation::ClearRange {
            begin: begin.to_vec(),
            end: end.to_vec(),
        });
        Ok(())
    }

    fn issue(&mut self, request: ReadRequest) -> Result<ReadHandle> {
        self.ensure_read_version()?;
        let (begin, end) = request_bounds(&request);
        if !request.snapshot {
            self.read_ranges.push((begin.clone(), end.clone()));
        }
        // Local clears may hide remote rows, so fetch everything and limit
        // after merging.
        let limit = if self.touches_local_writes(&begin, &end) {
            None
        } else {
            request.limit
        };
        let remote = RemoteRead {
            begin: request.begin.clone(),
            end: request.end.clone(),
            limit,
        };
        let join = self.handle.spawn(self.transport.read(remote));
        Ok(ReadHandle::Pending(PendingRead {
            join,
            request,
            visible_mutations: self.mutations.len(),
        }))
    }

    fn await_read(&mut self, handle: ReadHandle) -> Result<Vec<KeyValue>> {
        match handle {
            ReadHandle::Ready(rows) => Ok(rows),
            ReadHandle::Pending(pending) => {
                let rows = self
                    .handle
                    .block_on(pending.join)
                    .map_err(|e| Error::Backend(format!("network read task failed: {e}")))??;
                Ok(self.merge_local(&pending.request, pending.visible_mutations, rows))
            }
        }
    }

    fn commit(&mut self) -> Result<()> {
        if self.rollback_pending {
            self.reset();
            return Err(Error::TransactionAborted);
        }
        if self.mutations.is_empty() {
            self.reset();
            return Ok(());
        }
        let read_version = self.ensure_read_version()?;
        let request = CommitRequest {
            read_version,
            read_ranges: std::mem::take(&mut self.read_ranges),
            mutations: std::mem::take(&mut self.mutations),
        };
        let result = self.handle.block_on(self.transport.commit(request));
        self.reset();
        result.map(|_| ())
    }

    fn rollback(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn is_rollback_pending(&self) -> bool {
        self.rollback_pending
    }

    fn bytes_written(&self) -> usize {
        self.bytes_written
    }
}
