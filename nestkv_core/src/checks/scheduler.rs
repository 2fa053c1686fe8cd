//! Per-transaction collections of pending checks and the ROW / STATEMENT /
//! TRANSACTION passes that drain them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::checks::pending::Recovery;
use crate::checks::{CheckMetrics, CheckPass, CheckTime, PendingCheck};
use crate::codec::{index_prefix, strinc};
use crate::error::Result;
use crate::schema::IndexId;
use crate::store::{KvTransaction, ReadHandle, ReadRequest};

/// Which index a check belongs to and whether its keys grow monotonically
/// (a single integer key column), which gates the range warm-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckTarget {
    pub index: IndexId,
    pub monotonic: bool,
}

/// Checks against one index, resolved in FIFO order.
#[derive(Debug)]
pub struct IndexChecks {
    index: IndexId,
    check_time: CheckTime,
    checks: VecDeque<PendingCheck>,
    warmup: Option<ReadHandle>,
}

impl IndexChecks {
    fn new(index: IndexId, check_time: CheckTime) -> Self {
        Self {
            index,
            check_time,
            checks: VecDeque::new(),
            warmup: None,
        }
    }

    pub fn index(&self) -> IndexId {
        self.index
    }

    pub fn check_time(&self) -> CheckTime {
        self.check_time
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    fn warm_up(&mut self, kv: &mut dyn KvTransaction) -> Result<()> {
        let begin = index_prefix(self.index);
        let end = strinc(&begin)?;
        tracing::debug!(index = self.index, "One-time range load");
        self.warmup = Some(kv.issue(ReadRequest::range(begin, end, None).snapshot())?);
        Ok(())
    }

    /// Resolves every check whose read has completed, and every other check
    /// that is not delayed past `pass`, failing on the first violation that
    /// cannot be deferred any further.
    pub fn perform_checks(
        &mut self,
        kv: &mut dyn KvTransaction,
        pass: CheckPass,
        metrics: &CheckMetrics,
    ) -> Result<()> {
        if self.check_time.is_test_only() && pass != CheckPass::Transaction {
            return Ok(());
        }
        let mut i = 0;
        while i < self.checks.len() {
            let check = &mut self.checks[i];
            if !check.is_ready() && check.prepare(kv, self.check_time, pass)? {
                i += 1;
                continue;
            }
            check.block_until_ready(kv, metrics)?;
            let mut outcome = check.check();
            if let Err(e) = &outcome {
                if !e.is_constraint_violation() {
                    return outcome;
                }
                match check.recover(pass) {
                    Recovery::Recheck => {
                        metrics.rechecked();
                        i += 1;
                        continue;
                    }
                    Recovery::Requery => {
                        metrics.rechecked();
                        check.requery(kv, pass)?;
                        check.block_until_ready(kv, metrics)?;
                        outcome = check.check();
                    }
                    Recovery::Raise => {}
                }
            }
            outcome?;
            self.checks.remove(i);
            metrics.resolved(1);
        }
        Ok(())
    }

    fn clear(&mut self, metrics: &CheckMetrics) {
        metrics.resolved(self.checks.len());
        self.checks.clear();
        self.warmup = None;
    }
}

/// Every pending check owned by one transaction.
#[derive(Debug)]
pub struct TransactionChecks {
    check_time: CheckTime,
    force_immediate: bool,
    indexes: BTreeMap<IndexId, IndexChecks>,
    metrics: Arc<CheckMetrics>,
}

impl TransactionChecks {
    pub fn new(check_time: CheckTime, metrics: Arc<CheckMetrics>) -> Self {
        Self {
            check_time,
            force_immediate: false,
            indexes: BTreeMap::new(),
            metrics,
        }
    }

    pub fn check_time(&self) -> CheckTime {
        self.check_time
    }

    pub fn force_immediate(&self) -> bool {
        self.force_immediate
    }

    pub fn set_force_immediate(&mut self, force: bool) {
        self.force_immediate = force;
    }

    pub fn pending(&self) -> usize {
        self.indexes.values().map(IndexChecks::len).sum()
    }

    pub fn index_checks(&self, index: IndexId) -> Option<&IndexChecks> {
        self.indexes.get(&index)
    }

    /// Issues `check` and queues it on its index, then runs the ROW pass over
    /// every index so completed checks never pile up. With force-immediate
    /// set the check is resolved on the spot and never queued.
    pub fn add(
        &mut self,
        kv: &mut dyn KvTransaction,
        target: CheckTarget,
        mut check: PendingCheck,
    ) -> Result<()> {
        if self.force_immediate {
            check.issue(kv, CheckPass::Row)?;
            check.block_until_ready(kv, &self.metrics)?;
            return check.check();
        }

        let check_time = if target.monotonic {
            self.check_time
        } else {
            self.check_time.non_ranged()
        };
        let first = !self.indexes.contains_key(&target.index);
        let checks = self
            .indexes
            .entry(target.index)
            .or_insert_with(|| IndexChecks::new(target.index, check_time));
        if first && checks.check_time.is_ranged() {
            checks.warm_up(kv)?;
        }

        check.issue(kv, CheckPass::Row)?;
        self.metrics.added();
        checks.checks.push_back(check);
        self.perform_checks(kv, CheckPass::Row)
    }

    pub fn perform_checks(&mut self, kv: &mut dyn KvTransaction, pass: CheckPass) -> Result<()> {
        for checks in self.indexes.values_mut() {
            checks.perform_checks(kv, pass, &self.metrics)?;
        }
        Ok(())
    }

    /// Drops every outstanding check without evaluating it.
    pub fn clear(&mut self) {
        for checks in self.indexes.values_mut() {
            checks.clear(&self.metrics);
        }
        self.indexes.clear();
    }
}

impl Drop for TransactionChecks {
    fn drop(&mut self) {
        self.clear();
    }
}
