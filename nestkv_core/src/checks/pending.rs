//! A unit of deferred verification bound to one key or key range.
//!
//! A check is *issued* (its read starts, possibly asynchronously), later
//! *blocked on* until the read result is local, and then *checked*, which
//! evaluates its predicate against that result. Checks are plain data; the
//! scheduler decides when each step happens.

use std::time::Instant;

use crate::checks::{CheckMetrics, CheckPass, CheckTime, Deferral};
use crate::codec::key::{decode_values, has_null_segment};
use crate::codec::PREFIX_LEN;
use crate::error::{Error, Result};
use crate::store::{KeyValue, KvTransaction, ReadHandle, ReadRequest};
use crate::types::datatype::DataType;
use crate::types::value::{value_to_string, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckKind {
    /// At least one entry must match.
    Existence,
    /// No entry may match.
    NonExistence,
    /// The querying row's own entry may match once; after a recheck the
    /// row is gone and nothing may match.
    NonExistenceSkipSelf { rechecked: bool },
    /// No entry of the whole index may have a non-NULL key in its first
    /// `key_columns` segments.
    WholeIndexNonReference { key_columns: usize },
}

/// Violating key text, or what is needed to recover it from the entry found.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyText {
    Known(String),
    FromEntry {
        names: Vec<String>,
        types: Vec<DataType>,
    },
}

/// The error a failed check raises.
#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    Duplicate {
        index: String,
        key: String,
    },
    Referencing {
        operation: &'static str,
        referencing_table: String,
        key: String,
        constraint: String,
        referenced_table: String,
    },
    Referenced {
        operation: &'static str,
        referenced_table: String,
        key: KeyText,
        constraint: String,
        referencing_table: String,
    },
}

/// `col = val and col2 = val2`
pub fn format_key(names: &[String], values: &[Value]) -> String {
    names
        .iter()
        .zip(values)
        .map(|(n, v)| format!("{} = {}", n, value_to_string(v)))
        .collect::<Vec<_>>()
        .join(" and ")
}

/// What the scheduler does with a check that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    /// Converted to a recheck; leave it for a later pass.
    Recheck,
    /// The result predates this pass; read again and judge once more.
    Requery,
    Raise,
}

#[derive(Debug)]
pub struct PendingCheck {
    kind: CheckKind,
    key: Vec<u8>,
    end: Option<Vec<u8>>,
    deferral: Deferral,
    issued_at: Option<CheckPass>,
    handle: Option<ReadHandle>,
    rows: Option<Vec<KeyValue>>,
    violation: Violation,
}

impl PendingCheck {
    /// A check of `key` itself when `end` is `None`, otherwise of `[key, end)`.
    pub fn new(
        kind: CheckKind,
        key: Vec<u8>,
        end: Option<Vec<u8>>,
        deferral: Deferral,
        violation: Violation,
    ) -> Self {
        Self {
            kind,
            key,
            end,
            deferral,
            issued_at: None,
            handle: None,
            rows: None,
            violation,
        }
    }

    pub fn kind(&self) -> CheckKind {
        self.kind
    }

    pub fn deferral(&self) -> Deferral {
        self.deferral
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn end(&self) -> Option<&[u8]> {
        self.end.as_deref()
    }

    fn limit(&self) -> Option<usize> {
        match self.kind {
            CheckKind::Existence | CheckKind::NonExistence => Some(1),
            CheckKind::NonExistenceSkipSelf { rechecked: false } => Some(2),
            CheckKind::NonExistenceSkipSelf { rechecked: true } => Some(1),
            CheckKind::WholeIndexNonReference { .. } => None,
        }
    }

    /// Starts the read. Calling again replaces any earlier result.
    pub fn issue(&mut self, kv: &mut dyn KvTransaction, pass: CheckPass) -> Result<()> {
        let request = match &self.end {
            None => ReadRequest::point(self.key.clone()),
            Some(end) => ReadRequest::range(self.key.clone(), end.clone(), self.limit()),
        };
        self.rows = None;
        self.handle = Some(kv.issue(request)?);
        self.issued_at = Some(pass);
        Ok(())
    }

    /// True once the read result can be evaluated without blocking.
    pub fn is_ready(&self) -> bool {
        self.rows.is_some() || self.handle.as_ref().is_some_and(ReadHandle::is_ready)
    }

    pub fn block_until_ready(
        &mut self,
        kv: &mut dyn KvTransaction,
        metrics: &CheckMetrics,
    ) -> Result<()> {
        if self.rows.is_some() {
            return Ok(());
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| Error::Backend("pending check was never issued".to_string()))?;
        let started = Instant::now();
        let rows = kv.await_read(handle)?;
        metrics.waited(started.elapsed());
        self.rows = Some(rows);
        Ok(())
    }

    /// Evaluates the predicate. A constraint-violation error means the check
    /// failed; any other error is a failure to evaluate it.
    pub fn check(&self) -> Result<()> {
        let rows = self
            .rows
            .as_ref()
            .ok_or_else(|| Error::Backend("pending check result is not ready".to_string()))?;
        let passed = match self.kind {
            CheckKind::Existence => !rows.is_empty(),
            CheckKind::NonExistence => rows.is_empty(),
            CheckKind::NonExistenceSkipSelf { rechecked } => {
                rows.len() <= if rechecked { 0 } else { 1 }
            }
            CheckKind::WholeIndexNonReference { key_columns } => {
                return match self.first_reference(rows, key_columns)? {
                    None => Ok(()),
                    Some(entry) => Err(self.violation_error(Some(entry))?),
                };
            }
        };
        if passed {
            Ok(())
        } else {
            Err(self.violation_error(None)?)
        }
    }

    fn first_reference<'a>(&self, rows: &'a [KeyValue], key_columns: usize) -> Result<Option<&'a [u8]>> {
        for (key, _) in rows {
            let segments = key.get(PREFIX_LEN..).unwrap_or_default();
            if !has_null_segment(segments, key_columns)? {
                return Ok(Some(key.as_slice()));
            }
        }
        Ok(None)
    }

    /// Builds the error this check raises; `entry` is the offending index
    /// entry when the key text must be decoded from it.
    pub fn violation_error(&self, entry: Option<&[u8]>) -> Result<Error> {
        Ok(match &self.violation {
            Violation::Duplicate { index, key } => Error::DuplicateKey {
                index: index.clone(),
                key: key.clone(),
            },
            Violation::Referencing {
                operation,
                referencing_table,
                key,
                constraint,
                referenced_table,
            } => Error::ForeignKeyReferencingViolation {
                operation: operation.to_string(),
                referencing_table: referencing_table.clone(),
                key: key.clone(),
                constraint: constraint.clone(),
                referenced_table: referenced_table.clone(),
            },
            Violation::Referenced {
                operation,
                referenced_table,
                key,
                constraint,
                referencing_table,
            } => {
                let key = match (key, entry) {
                    (KeyText::Known(text), _) => text.clone(),
                    (KeyText::FromEntry { names, types }, Some(entry)) => {
                        let segments = entry.get(PREFIX_LEN..).unwrap_or_default();
                        let (values, _) = decode_values(segments, types)?;
                        format_key(names, &values)
                    }
                    (KeyText::FromEntry { names, .. }, None) => names.join(", "),
                };
                Error::ForeignKeyReferencedViolation {
                    operation: operation.to_string(),
                    referenced_table: referenced_table.clone(),
                    key,
                    constraint: constraint.clone(),
                    referencing_table: referencing_table.clone(),
                }
            }
        })
    }

    /// Decides whether to wait past `pass`. A recheck that is due re-issues
    /// its read first.
    pub(crate) fn prepare(
        &mut self,
        kv: &mut dyn KvTransaction,
        check_time: CheckTime,
        pass: CheckPass,
    ) -> Result<bool> {
        if self.deferral.delay(check_time, pass) {
            return Ok(true);
        }
        if self.deferral.is_recheck() && self.handle.is_none() && self.rows.is_none() {
            tracing::debug!("Repeating check at {}", pass);
            self.requery(kv, pass)?;
        }
        Ok(false)
    }

    pub(crate) fn requery(&mut self, kv: &mut dyn KvTransaction, pass: CheckPass) -> Result<()> {
        if let CheckKind::NonExistenceSkipSelf { rechecked } = &mut self.kind {
            *rechecked = true;
        }
        self.issue(kv, pass)
    }

    /// A recheck must read again; the failed result is never reused.
    fn discard_result(&mut self) {
        self.rows = None;
        self.handle = None;
    }

    pub(crate) fn recover(&mut self, pass: CheckPass) -> Recovery {
        match (self.deferral, pass) {
            (Deferral::DeferrableStatement, CheckPass::Row) => {
                self.deferral = Deferral::RecheckStatement;
                self.discard_result();
                return Recovery::Recheck;
            }
            (Deferral::DeferrableTransaction, CheckPass::Row | CheckPass::Statement) => {
                self.deferral = Deferral::RecheckTransaction;
                self.discard_result();
                return Recovery::Recheck;
            }
            _ => {}
        }
        let deferrable = self.deferral != Deferral::Immediate;
        let stale = self.issued_at.is_some_and(|issued| issued < pass);
        if deferrable && stale {
            Recovery::Requery
        } else {
            Recovery::Raise
        }
    }
}
