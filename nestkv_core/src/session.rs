//! A connection-like handle: one transaction at a time, statements grouped
//! for the STATEMENT pass, and autocommit when no transaction is open.

use crate::checks::CheckPass;
use crate::error::{Error, Result};
use crate::rows::Mutator;
use crate::txn::{Callback, CallbackKind, Transaction};
use crate::types::value::Value;
use crate::types::Row;
use crate::Database;

#[derive(Debug)]
pub struct Session {
    db: Database,
    txn: Option<Transaction>,
    /// Set by `begin`; an implicit transaction ends with its statement.
    explicit: bool,
    depth: usize,
}

impl Session {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            txn: None,
            explicit: false,
            depth: 0,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn in_transaction(&self) -> bool {
        self.explicit && self.txn.is_some()
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.txn.is_some() {
            return Err(Error::TransactionAlreadyActive);
        }
        self.txn = Some(self.db.inner.service.begin()?);
        self.explicit = true;
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let txn = self.take_explicit()?;
        self.db.inner.service.commit(txn)
    }

    pub fn rollback(&mut self) -> Result<()> {
        let txn = self.take_explicit()?;
        self.db.inner.service.rollback(txn)
    }

    /// Commits, reporting `true` instead of an error when the failure is
    /// retryable. The transaction is gone either way.
    pub fn commit_or_retry(&mut self) -> Result<bool> {
        match self.commit() {
            Ok(()) => Ok(false),
            Err(e) if e.is_retryable() => Ok(true),
            Err(e) => Err(e),
        }
    }

    fn take_explicit(&mut self) -> Result<Transaction> {
        if !self.explicit {
            return Err(Error::NoActiveTransaction);
        }
        self.explicit = false;
        self.txn.take().ok_or(Error::NoActiveTransaction)
    }

    /// Runs `f` in a fresh transaction and commits it, retrying the whole
    /// unit on retryable failures up to `max_retries` times.
    pub fn run<T>(&mut self, mut f: impl FnMut(&mut Session) -> Result<T>) -> Result<T> {
        let max_retries = self.db.config().max_retries;
        let mut attempt = 0;
        loop {
            self.begin()?;
            let result = f(self).and_then(|out| {
                self.end_statement()?;
                self.commit()?;
                Ok(out)
            });
            let err = match result {
                Ok(out) => return Ok(out),
                Err(e) => e,
            };
            if self.in_transaction() {
                if let Err(rollback_err) = self.rollback() {
                    tracing::debug!(error = %rollback_err, "rollback after failed unit of work also failed");
                }
            }
            if !err.is_retryable() || attempt >= max_retries {
                return Err(err);
            }
            attempt += 1;
            tracing::warn!(attempt, error = %err, "retrying transaction");
        }
    }

    /// Runs `f` as one statement: the STATEMENT pass runs once, after all
    /// of it.
    pub fn statement<T>(&mut self, f: impl FnOnce(&mut Session) -> Result<T>) -> Result<T> {
        self.enter()?;
        let result = f(self);
        self.exit(result)
    }

    /// Runs the STATEMENT pass over the current transaction's checks.
    pub fn end_statement(&mut self) -> Result<()> {
        match self.txn.as_mut() {
            Some(txn) => txn.perform_checks(CheckPass::Statement),
            None => Ok(()),
        }
    }

    pub fn set_deferred_foreign_key(&mut self, name: Option<&str>, deferred: bool) -> Result<()> {
        self.active()?.set_deferred(name, deferred);
        Ok(())
    }

    pub fn set_force_immediate(&mut self, force: bool) -> Result<()> {
        self.active()?.set_force_immediate(force);
        Ok(())
    }

    pub fn add_callback(&mut self, kind: CallbackKind, callback: Callback) -> Result<()> {
        self.active()?.add_callback(kind, callback);
        Ok(())
    }

    pub fn set_rollback_pending(&mut self) -> Result<()> {
        self.active()?.set_rollback_pending();
        Ok(())
    }

    pub fn is_rollback_pending(&self) -> bool {
        self.txn.as_ref().is_some_and(Transaction::is_rollback_pending)
    }

    pub fn should_periodically_commit(&self) -> bool {
        self.txn
            .as_ref()
            .is_some_and(|txn| self.db.inner.service.should_periodically_commit(txn))
    }

    /// Commits the open transaction and continues in a new one.
    pub fn periodically_commit(&mut self) -> Result<()> {
        let txn = self.take_explicit()?;
        let next = self.db.inner.service.periodically_commit(txn)?;
        self.txn = Some(next);
        self.explicit = true;
        Ok(())
    }

    fn active(&mut self) -> Result<&mut Transaction> {
        self.txn.as_mut().ok_or(Error::NoActiveTransaction)
    }

    pub fn insert(&mut self, table: &str, row: Row) -> Result<()> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.insert_row(table, row)
        })
    }

    pub fn update(&mut self, table: &str, old: &Row, new: Row) -> Result<()> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.update_row(table, old, new)
        })
    }

    pub fn delete(&mut self, table: &str, row: &Row) -> Result<bool> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.delete_row(table, row)
        })
    }

    pub fn delete_by_pk(&mut self, table: &str, pk: &[Value]) -> Result<bool> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            match m.get_by_pk(table, pk)? {
                Some(row) => m.delete_row(table, &row),
                None => Ok(false),
            }
        })
    }

    pub fn truncate(&mut self, table: &str) -> Result<usize> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.truncate_table(table)
        })
    }

    pub fn get_by_pk(&mut self, table: &str, pk: &[Value]) -> Result<Option<Row>> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.get_by_pk(table, pk)
        })
    }

    pub fn scan(&mut self, table: &str) -> Result<Vec<Row>> {
        self.with_mutator(|m| {
            let table = m.catalog().table_by_name(table)?;
            m.scan_table(table)
        })
    }

    pub fn lookup(&mut self, table: &str, index: &str, values: &[Value]) -> Result<Vec<Row>> {
        self.with_mutator(|m| {
            let t = m.catalog().table_by_name(table)?;
            let index = t
                .index_named(index)
                .ok_or_else(|| Error::Catalog(format!("INDEX '{}' on '{}' does not exist", index, table)))?;
            m.lookup(t, index, values)
        })
    }

    fn with_mutator<T>(&mut self, f: impl FnOnce(&mut Mutator<'_>) -> Result<T>) -> Result<T> {
        self.enter()?;
        let result = self.run_mutator(f);
        self.exit(result)
    }

    fn run_mutator<T>(&mut self, f: impl FnOnce(&mut Mutator<'_>) -> Result<T>) -> Result<T> {
        let catalog = self.db.catalog();
        let inner = &self.db.inner;
        let txn = self.txn.as_mut().ok_or(Error::NoActiveTransaction)?;
        let mut m = Mutator::new(txn, &catalog, &inner.constraints, inner.planner.as_ref());
        f(&mut m)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth == 0 && self.txn.is_none() {
            self.txn = Some(self.db.inner.service.begin()?);
            self.explicit = false;
        }
        self.depth += 1;
        Ok(())
    }

    /// Closes a statement. The outermost one runs the STATEMENT pass, then
    /// commits or rolls back an implicit transaction; a failure inside an
    /// explicit transaction leaves it rollback-only.
    fn exit<T>(&mut self, result: Result<T>) -> Result<T> {
        self.depth -= 1;
        if self.depth > 0 {
            return result;
        }
        let result = result.and_then(|out| self.end_statement().map(|()| out));
        if self.explicit {
            if result.is_err() {
                if let Some(txn) = self.txn.as_mut() {
                    txn.set_rollback_pending();
                }
            }
            return result;
        }
        let Some(txn) = self.txn.take() else {
            return result;
        };
        match result {
            Ok(out) => {
                self.db.inner.service.commit(txn)?;
                Ok(out)
            }
            Err(e) => {
                if let Err(rollback_err) = self.db.inner.service.rollback(txn) {
                    tracing::debug!(error = %rollback_err, "rollback of failed statement also failed");
                }
                Err(e)
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(txn) = self.txn.take() {
            if let Err(e) = self.db.inner.service.rollback(txn) {
                tracing::debug!(error = %e, "rollback of abandoned transaction failed");
            }
        }
    }
}
