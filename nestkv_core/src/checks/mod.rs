//! Pending constraint checks and the pass scheduler that resolves them.

pub mod pending;
pub mod scheduler;

pub use pending::{format_key, CheckKind, KeyText, PendingCheck, Violation};
pub use scheduler::{IndexChecks, TransactionChecks};

use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// When pending checks are allowed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckTime {
    Immediate,
    Statement,
    StatementWithRangeCache,
    Delayed,
    DelayedWithRangeCache,
    /// Test-only: nothing resolves before commit.
    DelayedAlwaysUntilCommit,
    /// Test-only: nothing resolves before commit.
    DelayedWithRangeCacheAlwaysUntilCommit,
}

impl CheckTime {
    pub fn is_delayed(self) -> bool {
        self != CheckTime::Immediate
    }

    pub fn is_statement(self) -> bool {
        matches!(self, CheckTime::Statement | CheckTime::StatementWithRangeCache)
    }

    pub fn is_test_only(self) -> bool {
        matches!(
            self,
            CheckTime::DelayedAlwaysUntilCommit | CheckTime::DelayedWithRangeCacheAlwaysUntilCommit
        )
    }

    pub fn is_ranged(self) -> bool {
        matches!(
            self,
            CheckTime::StatementWithRangeCache
                | CheckTime::DelayedWithRangeCache
                | CheckTime::DelayedWithRangeCacheAlwaysUntilCommit
        )
    }

    pub fn non_ranged(self) -> CheckTime {
        match self {
            CheckTime::StatementWithRangeCache => CheckTime::Statement,
            CheckTime::DelayedWithRangeCache => CheckTime::Delayed,
            CheckTime::DelayedWithRangeCacheAlwaysUntilCommit => CheckTime::DelayedAlwaysUntilCommit,
            other => other,
        }
    }

    /// Whether an ordinary check should wait past `pass`.
    pub fn delay(self, pass: CheckPass) -> bool {
        match pass {
            CheckPass::Row => self.is_delayed(),
            CheckPass::Statement => !self.is_statement(),
            CheckPass::Transaction => false,
        }
    }
}

/// Escalating points at which outstanding checks must resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CheckPass {
    Row,
    Statement,
    Transaction,
}

impl fmt::Display for CheckPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckPass::Row => "ROW",
            CheckPass::Statement => "STATEMENT",
            CheckPass::Transaction => "TRANSACTION",
        })
    }
}

/// How far a check may be postponed, and whether it is a recheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deferral {
    Immediate,
    DeferrableStatement,
    DeferrableTransaction,
    RecheckStatement,
    RecheckTransaction,
}

impl Deferral {
    /// Deferral for a check that must have passed by `final_pass`.
    pub fn for_final_pass(final_pass: CheckPass) -> Deferral {
        match final_pass {
            CheckPass::Row => Deferral::Immediate,
            CheckPass::Statement => Deferral::DeferrableStatement,
            CheckPass::Transaction => Deferral::DeferrableTransaction,
        }
    }

    pub fn is_recheck(self) -> bool {
        matches!(self, Deferral::RecheckStatement | Deferral::RecheckTransaction)
    }

    pub fn delay(self, check_time: CheckTime, pass: CheckPass) -> bool {
        match self {
            Deferral::Immediate | Deferral::DeferrableTransaction => check_time.delay(pass),
            Deferral::DeferrableStatement => pass != CheckPass::Statement && check_time.delay(pass),
            Deferral::RecheckStatement => pass == CheckPass::Row,
            Deferral::RecheckTransaction => pass != CheckPass::Transaction,
        }
    }
}

/// Counters shared by every transaction of a store.
#[derive(Debug, Default)]
pub struct CheckMetrics {
    pending: AtomicI64,
    uniqueness_wait_nanos: AtomicU64,
    rechecks: AtomicU64,
}

impl CheckMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> i64 {
        self.pending.load(Ordering::Relaxed)
    }

    pub fn uniqueness_wait(&self) -> Duration {
        Duration::from_nanos(self.uniqueness_wait_nanos.load(Ordering::Relaxed))
    }

    pub fn rechecks(&self) -> u64 {
        self.rechecks.load(Ordering::Relaxed)
    }

    pub(crate) fn added(&self) {
        self.pending.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn resolved(&self, count: usize) {
        self.pending.fetch_sub(count as i64, Ordering::Relaxed);
    }

    pub(crate) fn waited(&self, elapsed: Duration) {
        self.uniqueness_wait_nanos
            .fetch_add(elapsed.as_nanos() as u64, Ordering::Relaxed);
    }

    pub(crate) fn rechecked(&self) {
        self.rechecks.fetch_add(1, Ordering::Relaxed);
    }
}
