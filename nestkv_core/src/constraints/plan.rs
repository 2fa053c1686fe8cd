//! Referential action plans: CASCADE, SET NULL and SET DEFAULT maintenance
//! of referencing rows.

use crate::codec::key::has_null_segment;
use crate::codec::{after, encode_values, index_prefix, strinc, PREFIX_LEN};
use crate::error::{Error, Result};
use crate::rows::Mutator;
use crate::schema::{Catalog, ForeignKey, ForeignKeyAction, Index, IndexId, Table, TableId};
use crate::types::value::{values_identical, Value};
use crate::types::Row;

/// Matches read per page by an unbuffered plan.
const PAGE_SIZE: usize = 64;

/// Where a written column's new value comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnSource {
    /// Position in the new referenced row.
    FromNew(usize),
    Null,
    Default(Value),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanWrite {
    Delete,
    SetColumns(Vec<(usize, ColumnSource)>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    /// Entries whose leading key equals the old referenced row's values at
    /// `lookup`.
    IndexProbe { lookup: Vec<usize> },
    /// Every entry without a NULL in its first `key_columns` segments.
    FullScan { key_columns: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ActionPlan {
    pub foreign_key: String,
    pub referencing_table: TableId,
    pub index: IndexId,
    pub source: PlanSource,
    pub write: PlanWrite,
    /// Every match is read before the first write.
    pub buffered: bool,
}

/// Builds and runs referential action plans.
pub trait ActionPlanner: Send + Sync {
    /// `cross_referenced` holds the referenced row positions bound to the
    /// referencing index's leading columns, in index order.
    fn build_plan(
        &self,
        catalog: &Catalog,
        fk: &ForeignKey,
        cross_referenced: &[usize],
        action: ForeignKeyAction,
        has_old: bool,
        has_new: bool,
    ) -> Result<ActionPlan>;

    /// Runs `plan` to completion and returns how many referencing rows it
    /// changed.
    fn run_plan(
        &self,
        m: &mut Mutator<'_>,
        plan: &ActionPlan,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<usize>;
}

/// Plans over the row pipeline itself: matching rows are found through the
/// referencing index and changed with ordinary row deletes and updates, so
/// their own constraints are enforced in turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowActionPlanner;

impl ActionPlanner for RowActionPlanner {
    fn build_plan(
        &self,
        catalog: &Catalog,
        fk: &ForeignKey,
        cross_referenced: &[usize],
        action: ForeignKeyAction,
        has_old: bool,
        has_new: bool,
    ) -> Result<ActionPlan> {
        let child = catalog.table(fk.referencing_table)?;
        let index = catalog.index(fk.referencing_index)?;
        let write = match action {
            ForeignKeyAction::Cascade if has_old && has_new => PlanWrite::SetColumns(
                fk.join_columns()
                    .map(|(parent, child)| (child, ColumnSource::FromNew(parent)))
                    .collect(),
            ),
            ForeignKeyAction::Cascade => PlanWrite::Delete,
            ForeignKeyAction::SetNull => PlanWrite::SetColumns(
                fk.referencing_columns
                    .iter()
                    .map(|c| (*c, ColumnSource::Null))
                    .collect(),
            ),
            ForeignKeyAction::SetDefault => PlanWrite::SetColumns(
                fk.referencing_columns
                    .iter()
                    .map(|c| {
                        let source = child.columns[*c]
                            .default
                            .clone()
                            .map_or(ColumnSource::Null, ColumnSource::Default);
                        (*c, source)
                    })
                    .collect(),
            ),
            ForeignKeyAction::NoAction | ForeignKeyAction::Restrict => {
                return Err(Error::Catalog(format!(
                    "FOREIGN KEY '{}' has no action plan for {:?}",
                    fk.name, action
                )));
            }
        };
        let source = if has_old {
            PlanSource::IndexProbe {
                lookup: cross_referenced.to_vec(),
            }
        } else {
            PlanSource::FullScan {
                key_columns: fk.referencing_columns.len(),
            }
        };
        let buffered = match &write {
            PlanWrite::Delete => false,
            PlanWrite::SetColumns(columns) => columns.iter().any(|(c, _)| index.columns.contains(c)),
        };
        Ok(ActionPlan {
            foreign_key: fk.name.clone(),
            referencing_table: child.id,
            index: index.id,
            source,
            write,
            buffered,
        })
    }

    fn run_plan(
        &self,
        m: &mut Mutator<'_>,
        plan: &ActionPlan,
        old: Option<&Row>,
        new: Option<&Row>,
    ) -> Result<usize> {
        let catalog = m.catalog();
        let table = catalog.table(plan.referencing_table)?;
        let index = catalog.index(plan.index)?;
        let prefix = index_prefix(plan.index);
        let (begin, end, key_columns) = match &plan.source {
            PlanSource::IndexProbe { lookup } => {
                let old = old.ok_or_else(|| missing_row(plan, "old"))?;
                let values: Vec<&Value> = lookup.iter().map(|c| &old[*c]).collect();
                if values.iter().any(|v| v.is_null()) {
                    return Ok(0);
                }
                let mut key = prefix;
                key.extend(encode_values(values)?);
                let end = after(&key);
                (key, end, 0)
            }
            PlanSource::FullScan { key_columns } => {
                let end = strinc(&prefix)?;
                (prefix, end, *key_columns)
            }
        };

        let mut changed = 0;
        if plan.buffered {
            let hkeys = matching_hkeys(m, index, &begin, &end, None, key_columns)?.0;
            for row in m.read_rows(table, hkeys)? {
                changed += apply(m, plan, table, row, new)?;
            }
            return Ok(changed);
        }

        let mut cursor = begin;
        loop {
            let (hkeys, next) = matching_hkeys(m, index, &cursor, &end, Some(PAGE_SIZE), key_columns)?;
            for row in m.read_rows(table, hkeys)? {
                changed += apply(m, plan, table, row, new)?;
            }
            match next {
                Some(next) => cursor = next,
                None => break,
            }
        }
        Ok(changed)
    }
}

/// hkeys of the entries in `[begin, end)` that pass the NULL filter, plus
/// the key to resume from when the page was full.
fn matching_hkeys(
    m: &mut Mutator<'_>,
    index: &Index,
    begin: &[u8],
    end: &[u8],
    limit: Option<usize>,
    key_columns: usize,
) -> Result<(Vec<Vec<u8>>, Option<Vec<u8>>)> {
    let entries = m.entry_hkeys(index, begin, end, limit)?;
    let next = match (limit, entries.last()) {
        (Some(limit), Some((last, _))) if entries.len() == limit => {
            let mut next = last.clone();
            next.push(0x00);
            Some(next)
        }
        _ => None,
    };
    let mut hkeys = Vec::with_capacity(entries.len());
    for (key, hkey) in entries {
        let segments = key.get(PREFIX_LEN..).unwrap_or_default();
        if key_columns > 0 && has_null_segment(segments, key_columns)? {
            continue;
        }
        hkeys.push(hkey);
    }
    Ok((hkeys, next))
}

fn apply(m: &mut Mutator<'_>, plan: &ActionPlan, table: &Table, row: Row, new: Option<&Row>) -> Result<usize> {
    match &plan.write {
        PlanWrite::Delete => Ok(usize::from(m.delete_row(table, &row)?)),
        PlanWrite::SetColumns(columns) => {
            let mut updated = row.clone();
            for (column, source) in columns {
                updated[*column] = match source {
                    ColumnSource::FromNew(p) => new.ok_or_else(|| missing_row(plan, "new"))?[*p].clone(),
                    ColumnSource::Null => Value::Null,
                    ColumnSource::Default(v) => v.clone(),
                };
            }
            if row.iter().zip(&updated).all(|(a, b)| values_identical(a, b)) {
                return Ok(0);
            }
            m.update_row(table, &row, updated)?;
            Ok(1)
        }
    }
}

fn missing_row(plan: &ActionPlan, which: &str) -> Error {
    Error::Value(format!(
        "Action plan for FOREIGN KEY '{}' needs the {} referenced row",
        plan.foreign_key, which
    ))
}
