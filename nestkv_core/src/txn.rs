//! Transactions over any back end: pending checks, ordered callbacks and
//! commit/rollback sequencing.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::checks::scheduler::CheckTarget;
use crate::checks::{CheckMetrics, CheckPass, CheckTime, PendingCheck, TransactionChecks};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::schema::ForeignKey;
use crate::store::{KvStore, KvTransaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallbackKind {
    PreCommit,
    Commit,
    Rollback,
    End,
}

pub type Callback = Box<dyn FnOnce() -> Result<()> + Send>;

/// Per-transaction `SET CONSTRAINTS` state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredOverrides {
    all: Option<bool>,
    by_name: HashMap<String, bool>,
}

impl DeferredOverrides {
    /// `None` applies to every constraint and resets named overrides.
    pub fn set(&mut self, name: Option<&str>, deferred: bool) {
        match name {
            Some(name) => {
                self.by_name.insert(name.to_string(), deferred);
            }
            None => {
                self.by_name.clear();
                self.all = Some(deferred);
            }
        }
    }

    /// Named override, then the ALL override, then the declared default.
    pub fn is_deferred(&self, fk: &ForeignKey) -> bool {
        if let Some(deferred) = self.by_name.get(&fk.name) {
            return *deferred;
        }
        self.all.unwrap_or(fk.initially_deferred)
    }
}

pub struct Transaction {
    id: u64,
    kv: Box<dyn KvTransaction>,
    checks: TransactionChecks,
    callbacks: Vec<(CallbackKind, Callback)>,
    deferred: DeferredOverrides,
    started: Instant,
    rollback_pending: bool,
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("backend", &self.kv.backend())
            .field("pending_checks", &self.checks.pending())
            .field("rollback_pending", &self.rollback_pending)
            .finish()
    }
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kv(&mut self) -> &mut dyn KvTransaction {
        self.kv.as_mut()
    }

    pub fn checks(&self) -> &TransactionChecks {
        &self.checks
    }

    pub fn deferred(&self) -> &DeferredOverrides {
        &self.deferred
    }

    pub fn set_deferred(&mut self, name: Option<&str>, deferred: bool) {
        self.deferred.set(name, deferred);
    }

    pub fn set_force_immediate(&mut self, force: bool) {
        self.checks.set_force_immediate(force);
    }

    pub fn is_deferred(&self, fk: &ForeignKey) -> bool {
        fk.deferrable && self.deferred.is_deferred(fk)
    }

    pub fn add_check(&mut self, target: CheckTarget, check: PendingCheck) -> Result<()> {
        let result = self.checks.add(self.kv.as_mut(), target, check);
        self.note(result)
    }

    pub fn perform_checks(&mut self, pass: CheckPass) -> Result<()> {
        let result = self.checks.perform_checks(self.kv.as_mut(), pass);
        self.note(result)
    }

    pub fn add_callback(&mut self, kind: CallbackKind, callback: Callback) {
        self.callbacks.push((kind, callback));
    }

    pub fn set_rollback_pending(&mut self) {
        self.rollback_pending = true;
    }

    pub fn is_rollback_pending(&self) -> bool {
        self.rollback_pending || self.kv.is_rollback_pending()
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn bytes_written(&self) -> usize {
        self.kv.bytes_written()
    }

    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if matches!(result, Err(Error::LockTimeout { .. })) {
            self.rollback_pending = true;
        }
        result
    }

    /// Runs every callback of `kind`, newest first. All of them run; the
    /// first error is returned.
    fn run_callbacks(&mut self, kind: CallbackKind) -> Result<()> {
        let mut first: Option<Error> = None;
        let mut i = self.callbacks.len();
        while i > 0 {
            i -= 1;
            if self.callbacks[i].0 != kind {
                continue;
            }
            let (_, callback) = self.callbacks.remove(i);
            if let Err(e) = callback() {
                match &first {
                    None => first = Some(e),
                    Some(_) => tracing::debug!(error = %e, ?kind, "additional callback failure"),
                }
            }
        }
        match first {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Begins, commits and rolls back transactions against one store.
pub struct TransactionService {
    store: Arc<dyn KvStore>,
    config: StoreConfig,
    check_time: CheckTime,
    metrics: Arc<CheckMetrics>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for TransactionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionService")
            .field("backend", &self.store.backend())
            .field("check_time", &self.check_time)
            .finish()
    }
}

impl TransactionService {
    pub fn new(store: Arc<dyn KvStore>, config: StoreConfig) -> Self {
        let check_time = config.check_time_or(store.default_check_time());
        Self {
            store,
            config,
            check_time,
            metrics: Arc::new(CheckMetrics::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn check_time(&self) -> CheckTime {
        self.check_time
    }

    pub fn metrics(&self) -> Arc<CheckMetrics> {
        self.metrics.clone()
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub fn begin(&self) -> Result<Transaction> {
        let mut kv = self.store.begin()?;
        kv.hold_locks();
        Ok(Transaction {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            kv,
            checks: TransactionChecks::new(self.check_time, self.metrics.clone()),
            callbacks: Vec::new(),
            deferred: DeferredOverrides::default(),
            started: Instant::now(),
            rollback_pending: false,
        })
    }

    /// Resolves every remaining check, then commits. Locks are released
    /// after the Commit callbacks and before the End callbacks. Any failure
    /// rolls the transaction back before the error is returned.
    pub fn commit(&self, mut txn: Transaction) -> Result<()> {
        let result = Self::try_commit(&mut txn);
        match result {
            Ok(()) => {
                let committed = txn.run_callbacks(CallbackKind::Commit);
                txn.kv.release_locks();
                let ended = txn.run_callbacks(CallbackKind::End);
                committed.and(ended)
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(txn = txn.id, error = %e, "commit failed with retryable error");
                }
                if let Err(rollback_err) = self.rollback(txn) {
                    tracing::debug!(error = %rollback_err, "rollback after failed commit also failed");
                }
                Err(e)
            }
        }
    }

    fn try_commit(txn: &mut Transaction) -> Result<()> {
        if txn.is_rollback_pending() {
            return Err(Error::TransactionAborted);
        }
        txn.perform_checks(CheckPass::Transaction)?;
        txn.run_callbacks(CallbackKind::PreCommit)?;
        let committed = txn.kv.commit();
        txn.note(committed)
    }

    pub fn rollback(&self, mut txn: Transaction) -> Result<()> {
        txn.checks.clear();
        let rolled_back = txn.kv.rollback();
        let callbacks = txn.run_callbacks(CallbackKind::Rollback);
        txn.kv.release_locks();
        let ended = txn.run_callbacks(CallbackKind::End);
        rolled_back.and(callbacks).and(ended)
    }

    /// Commits `txn` and starts a fresh one carrying the same session state.
    pub fn periodically_commit(&self, txn: Transaction) -> Result<Transaction> {
        let deferred = txn.deferred.clone();
        let force = txn.checks.force_immediate();
        self.commit(txn)?;
        let mut next = self.begin()?;
        next.deferred = deferred;
        next.checks.set_force_immediate(force);
        Ok(next)
    }

    pub fn should_periodically_commit(&self, txn: &Transaction) -> bool {
        txn.started.elapsed().as_millis() as u64 > self.config.periodic_commit_after_ms
            || txn.bytes_written() > self.config.periodic_commit_after_bytes
    }
}
