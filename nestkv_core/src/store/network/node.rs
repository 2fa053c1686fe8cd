//! A single versioned KV node with optimistic conflict detection.

use std::collections::{BTreeMap, VecDeque};

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::store::memory::{range_of, OrderedMap};
use crate::store::KeyValue;

/// Committed write ranges older than this many commits are forgotten;
/// transactions that read before them get `TransactionTooOld`.
pub const HISTORY_LIMIT: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Set { key: Vec<u8>, value: Vec<u8> },
    Clear { key: Vec<u8> },
    ClearRange { begin: Vec<u8>, end: Vec<u8> },
}

impl Mutation {
    /// Half-open key range this mutation writes.
    pub fn range(&self) -> (Vec<u8>, Vec<u8>) {
        match self {
            Mutation::Set { key, .. } | Mutation::Clear { key } => (key.clone(), key_after(key)),
            Mutation::ClearRange { begin, end } => (begin.clone(), end.clone()),
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Mutation::Set { key, value } => key.len() + value.len(),
            Mutation::Clear { key } => key.len(),
            Mutation::ClearRange { begin, end } => begin.len() + end.len(),
        }
    }
}

/// Smallest key strictly greater than `key`.
pub fn key_after(key: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(key.len() + 1);
    out.extend_from_slice(key);
    out.push(0x00);
    out
}

pub(crate) fn ranges_intersect(a: &(Vec<u8>, Vec<u8>), b: &(Vec<u8>, Vec<u8>)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRead {
    pub begin: Vec<u8>,
    pub end: Option<Vec<u8>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    pub read_version: u64,
    pub read_ranges: Vec<(Vec<u8>, Vec<u8>)>,
    pub mutations: Vec<Mutation>,
}

#[derive(Debug)]
struct CommitRecord {
    version: u64,
    writes: Vec<(Vec<u8>, Vec<u8>)>,
}

#[derive(Debug, Default)]
struct NodeState {
    data: OrderedMap,
    version: u64,
    history: VecDeque<CommitRecord>,
    /// Every commit at or below this version has been dropped from history.
    forgotten: u64,
}

#[derive(Debug, Default)]
pub struct KvNode {
    state: Mutex<NodeState>,
}

impl KvNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_version(&self) -> u64 {
        self.state.lock().version
    }

    pub fn read(&self, request: &RemoteRead) -> Result<Vec<KeyValue>> {
        let state = self.state.lock();
        Ok(match &request.end {
            None => state
                .data
                .get(&request.begin)
                .map(|v| vec![(request.begin.clone(), v.clone())])
                .unwrap_or_default(),
            Some(end) => range_of(&state.data, &request.begin, end)
                .take(request.limit.unwrap_or(usize::MAX))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        })
    }

    /// Applies `request` atomically and returns the new committed version.
    pub fn commit(&self, request: &CommitRequest) -> Result<u64> {
        let mut state = self.state.lock();
        if request.read_version > state.version {
            return Err(Error::Backend(format!(
                "read version {} is ahead of node version {}",
                request.read_version, state.version
            )));
        }
        if !request.read_ranges.is_empty() {
            if request.read_version < state.forgotten {
                return Err(Error::TransactionTooOld);
            }
            let conflict = state
                .history
                .iter()
                .filter(|rec| rec.version > request.read_version)
                .any(|rec| {
                    rec.writes.iter().any(|w| {
                        request
                            .read_ranges
                            .iter()
                            .any(|r| ranges_intersect(w, r))
                    })
                });
            if conflict {
                return Err(Error::NotCommitted);
            }
        }
        if request.mutations.is_empty() {
            return Ok(state.version);
        }

        for m in &request.mutations {
            match m {
                Mutation::Set { key, value } => {
                    state.data.insert(key.clone(), value.clone());
                }
                Mutation::Clear { key } => {
                    state.data.remove(key);
                }
                Mutation::ClearRange { begin, end } => {
                    let victims: Vec<Vec<u8>> = range_of(&state.data, begin, end)
                        .map(|(k, _)| k.clone())
                        .collect();
                    for k in victims {
                        state.data.remove(&k);
                    }
                }
            }
        }
        state.version += 1;
        let version = state.version;
        state.history.push_back(CommitRecord {
            version,
            writes: request.mutations.iter().map(Mutation::range).collect(),
        });
        while state.history.len() > HISTORY_LIMIT {
            if let Some(old) = state.history.pop_front() {
                state.forgotten = old.version;
            }
        }
        Ok(version)
    }

    pub fn snapshot(&self) -> BTreeMap<Vec<u8>, Vec<u8>> {
        self.state.lock().data.clone()
    }
}
