//! Foreign key enforcement for one key, from the point of view of one table.
//!
//! A table may sit on both sides of the same key when it references itself;
//! the handler then enforces both roles.

use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

use crate::checks::scheduler::CheckTarget;
use crate::checks::{format_key, CheckKind, CheckPass, Deferral, KeyText, PendingCheck, Violation};
use crate::codec::{after, encode_values, index_prefix, strinc};
use crate::constraints::plan::ActionPlan;
use crate::error::{Error, Result};
use crate::rows::Mutator;
use crate::schema::{Catalog, ForeignKey, ForeignKeyAction, IndexId, TableId};
use crate::types::datatype::DataType;
use crate::types::value::{compare_values, values_identical, Value};
use crate::types::Row;

const INSERT: &str = "insert into";
const UPDATE: &str = "update";
const DELETE: &str = "delete from";
const TRUNCATE: &str = "truncate";

#[derive(Debug)]
pub struct ForeignKeyHandler {
    fk: Arc<ForeignKey>,
    referencing: bool,
    referenced: bool,
    referencing_table: String,
    referenced_table: String,
    referencing_names: Vec<String>,
    referenced_names: Vec<String>,
    referenced_index: IndexId,
    referenced_monotonic: bool,
    referencing_index: IndexId,
    referencing_monotonic: bool,
    /// Child row positions, in referenced index column order.
    cross_referencing: Vec<usize>,
    /// Parent row positions, in the order of the referencing index's
    /// leading columns.
    cross_referenced: Vec<usize>,
    entry_names: Vec<String>,
    entry_types: Vec<DataType>,
    update_plan: OnceLock<ActionPlan>,
    delete_plan: OnceLock<ActionPlan>,
    truncate_plan: OnceLock<ActionPlan>,
}

impl ForeignKeyHandler {
    pub fn build(catalog: &Catalog, fk: Arc<ForeignKey>, table: TableId) -> Result<Self> {
        let child = catalog.table(fk.referencing_table)?;
        let parent = catalog.table(fk.referenced_table)?;
        let referenced_index = catalog.index(fk.referenced_index)?;
        let referencing_index = catalog.index(fk.referencing_index)?;

        let mut cross_referencing = Vec::with_capacity(fk.referencing_columns.len());
        for column in &referenced_index.columns {
            let p = position_in(&fk.referenced_columns, *column, &fk.name)?;
            cross_referencing.push(fk.referencing_columns[p]);
        }
        let n = fk.referencing_columns.len();
        let leading = referencing_index.columns.get(..n).ok_or_else(|| {
            Error::Catalog(format!("Index '{}' does not cover FOREIGN KEY '{}'", referencing_index.name, fk.name))
        })?;
        let mut cross_referenced = Vec::with_capacity(n);
        for column in leading {
            let p = position_in(&fk.referencing_columns, *column, &fk.name)?;
            cross_referenced.push(fk.referenced_columns[p]);
        }

        Ok(Self {
            referencing: fk.referencing_table == table,
            referenced: fk.referenced_table == table,
            referencing_table: child.name.clone(),
            referenced_table: parent.name.clone(),
            referencing_names: fk.referencing_columns.iter().map(|c| child.columns[*c].name.clone()).collect(),
            referenced_names: fk.referenced_columns.iter().map(|c| parent.columns[*c].name.clone()).collect(),
            referenced_index: referenced_index.id,
            referenced_monotonic: referenced_index.is_monotonic(parent),
            referencing_index: referencing_index.id,
            referencing_monotonic: referencing_index.is_monotonic(child),
            cross_referencing,
            cross_referenced,
            entry_names: leading.iter().map(|c| child.columns[*c].name.clone()).collect(),
            entry_types: leading.iter().map(|c| child.columns[*c].dtype.clone()).collect(),
            update_plan: OnceLock::new(),
            delete_plan: OnceLock::new(),
            truncate_plan: OnceLock::new(),
            fk,
        })
    }

    pub fn foreign_key(&self) -> &ForeignKey {
        &self.fk
    }

    pub fn is_referencing(&self) -> bool {
        self.referencing
    }

    pub fn is_referenced(&self) -> bool {
        self.referenced
    }

    pub fn handle_insert(&self, m: &mut Mutator<'_>, row: &Row) -> Result<()> {
        if self.referencing {
            self.check_referencing(m, row, INSERT)?;
        }
        Ok(())
    }

    pub fn handle_update_pre(&self, m: &mut Mutator<'_>, old: &Row, new: &Row) -> Result<()> {
        if self.referencing && changed(&self.fk.referencing_columns, old, new) {
            self.check_referencing(m, new, UPDATE)?;
        }
        if self.referenced && changed(&self.fk.referenced_columns, old, new) {
            match self.fk.update_action {
                ForeignKeyAction::NoAction | ForeignKeyAction::Restrict => {
                    self.check_not_referenced(m, old, UPDATE, self.fk.update_action)?;
                }
                ForeignKeyAction::Cascade => {}
                ForeignKeyAction::SetNull | ForeignKeyAction::SetDefault => {
                    let plan = self.plan(m, &self.update_plan, self.fk.update_action, true, true)?;
                    m.planner().run_plan(m, plan, Some(old), Some(new))?;
                }
            }
        }
        Ok(())
    }

    pub fn handle_update_post(&self, m: &mut Mutator<'_>, old: &Row, new: &Row) -> Result<()> {
        if self.referenced
            && self.fk.update_action == ForeignKeyAction::Cascade
            && changed(&self.fk.referenced_columns, old, new)
        {
            let plan = self.plan(m, &self.update_plan, ForeignKeyAction::Cascade, true, true)?;
            m.planner().run_plan(m, plan, Some(old), Some(new))?;
        }
        Ok(())
    }

    pub fn handle_delete(&self, m: &mut Mutator<'_>, row: &Row) -> Result<()> {
        if !self.referenced {
            return Ok(());
        }
        match self.fk.delete_action {
            ForeignKeyAction::NoAction | ForeignKeyAction::Restrict => {
                self.check_not_referenced(m, row, DELETE, self.fk.delete_action)
            }
            action => {
                let plan = self.plan(m, &self.delete_plan, action, true, false)?;
                m.planner().run_plan(m, plan, Some(row), None)?;
                Ok(())
            }
        }
    }

    pub fn handle_truncate(&self, m: &mut Mutator<'_>) -> Result<()> {
        // Truncating a self-referencing table removes both ends of every
        // reference at once.
        if !self.referenced || self.fk.is_self_referencing() {
            return Ok(());
        }
        match self.fk.delete_action {
            ForeignKeyAction::NoAction | ForeignKeyAction::Restrict => {
                let begin = index_prefix(self.referencing_index);
                let end = strinc(&begin)?;
                let check = PendingCheck::new(
                    CheckKind::WholeIndexNonReference {
                        key_columns: self.cross_referenced.len(),
                    },
                    begin,
                    Some(end),
                    self.referenced_deferral(m, self.fk.delete_action),
                    Violation::Referenced {
                        operation: TRUNCATE,
                        referenced_table: self.referenced_table.clone(),
                        key: KeyText::FromEntry {
                            names: self.entry_names.clone(),
                            types: self.entry_types.clone(),
                        },
                        constraint: self.fk.name.clone(),
                        referencing_table: self.referencing_table.clone(),
                    },
                );
                m.txn().add_check(self.referencing_target(), check)
            }
            action => {
                let plan = self.plan(m, &self.truncate_plan, action, false, false)?;
                m.planner().run_plan(m, plan, None, None)?;
                Ok(())
            }
        }
    }

    /// The referenced row for `row` must exist.
    fn check_referencing(&self, m: &mut Mutator<'_>, row: &Row, operation: &'static str) -> Result<()> {
        let values: Vec<&Value> = self.fk.referencing_columns.iter().map(|c| &row[*c]).collect();
        if values.iter().any(|v| v.is_null()) {
            return Ok(());
        }
        if self.fk.is_self_referencing() && self.is_self_reference(row) {
            return Ok(());
        }
        let mut key = index_prefix(self.referenced_index);
        key.extend(encode_values(self.cross_referencing.iter().map(|c| &row[*c]))?);
        let owned: Vec<Value> = values.into_iter().cloned().collect();
        let check = PendingCheck::new(
            CheckKind::Existence,
            key,
            None,
            self.referencing_deferral(m),
            Violation::Referencing {
                operation,
                referencing_table: self.referencing_table.clone(),
                key: format_key(&self.referencing_names, &owned),
                constraint: self.fk.name.clone(),
                referenced_table: self.referenced_table.clone(),
            },
        );
        let target = CheckTarget {
            index: self.referenced_index,
            monotonic: self.referenced_monotonic,
        };
        m.txn().add_check(target, check)
    }

    /// No row may still reference `row`'s referenced key.
    fn check_not_referenced(
        &self,
        m: &mut Mutator<'_>,
        row: &Row,
        operation: &'static str,
        action: ForeignKeyAction,
    ) -> Result<()> {
        let values: Vec<Value> = self.fk.referenced_columns.iter().map(|c| row[*c].clone()).collect();
        if values.iter().any(Value::is_null) {
            return Ok(());
        }
        let mut key = index_prefix(self.referencing_index);
        key.extend(encode_values(self.cross_referenced.iter().map(|c| &row[*c]))?);
        let end = after(&key);
        let kind = if self.fk.is_self_referencing() && self.is_self_reference(row) {
            CheckKind::NonExistenceSkipSelf { rechecked: false }
        } else {
            CheckKind::NonExistence
        };
        let check = PendingCheck::new(
            kind,
            key,
            Some(end),
            self.referenced_deferral(m, action),
            Violation::Referenced {
                operation,
                referenced_table: self.referenced_table.clone(),
                key: KeyText::Known(format_key(&self.referenced_names, &values)),
                constraint: self.fk.name.clone(),
                referencing_table: self.referencing_table.clone(),
            },
        );
        m.txn().add_check(self.referencing_target(), check)
    }

    fn referencing_target(&self) -> CheckTarget {
        CheckTarget {
            index: self.referencing_index,
            monotonic: self.referencing_monotonic,
        }
    }

    /// Whether every join column pair of `row` compares equal.
    fn is_self_reference(&self, row: &Row) -> bool {
        self.fk
            .join_columns()
            .all(|(parent, child)| compare_values(&row[parent], &row[child]) == Some(Ordering::Equal))
    }

    fn referencing_deferral(&self, m: &mut Mutator<'_>) -> Deferral {
        Deferral::for_final_pass(if m.txn().is_deferred(&self.fk) {
            CheckPass::Transaction
        } else {
            CheckPass::Statement
        })
    }

    /// `action` is the referential action of the event being checked.
    fn referenced_deferral(&self, m: &mut Mutator<'_>, action: ForeignKeyAction) -> Deferral {
        let final_pass = if m.txn().is_deferred(&self.fk) {
            CheckPass::Transaction
        } else if action == ForeignKeyAction::Restrict {
            CheckPass::Row
        } else {
            CheckPass::Statement
        };
        Deferral::for_final_pass(final_pass)
    }

    fn plan<'h>(
        &self,
        m: &Mutator<'_>,
        cell: &'h OnceLock<ActionPlan>,
        action: ForeignKeyAction,
        has_old: bool,
        has_new: bool,
    ) -> Result<&'h ActionPlan> {
        if let Some(plan) = cell.get() {
            return Ok(plan);
        }
        let plan = m.planner().build_plan(
            m.catalog(),
            &self.fk,
            &self.cross_referenced,
            action,
            has_old,
            has_new,
        )?;
        Ok(cell.get_or_init(|| plan))
    }
}

fn position_in(columns: &[usize], column: usize, fk: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| *c == column)
        .ok_or_else(|| Error::Catalog(format!("Index column {} is not part of FOREIGN KEY '{}'", column, fk)))
}

fn changed(columns: &[usize], old: &Row, new: &Row) -> bool {
    columns.iter().any(|c| !values_identical(&old[*c], &new[*c]))
}
