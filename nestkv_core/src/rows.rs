//! Row mutation pipeline: turns row-level inserts, updates, deletes and
//! truncates into group-key and index-entry writes, invoking the
//! constraint handler around each.
//!
//! Rows live at `'r' ‖ root ‖ hkey`, where the hkey is the parent's hkey
//! followed by this table's ordinal and primary key. Index entries live at
//! `'i' ‖ index ‖ key values`; a unique entry with no NULL segment stores
//! the hkey as its value, every other entry appends the hkey to its key.

use std::collections::HashSet;

use crate::checks::scheduler::CheckTarget;
use crate::checks::{CheckKind, Deferral, PendingCheck, Violation};
use crate::codec::key::skip_values;
use crate::codec::{after, decode_values, encode_values, format_tuple, index_prefix, row_key, strinc, PREFIX_LEN};
use crate::constraints::plan::ActionPlanner;
use crate::constraints::ConstraintHandler;
use crate::error::{Error, Result};
use crate::schema::{Catalog, Index, IndexColumn, Table, TableId};
use crate::txn::Transaction;
use crate::types::datatype::DataType;
use crate::types::value::{value_fits, value_to_string, values_identical, Value};
use crate::types::Row;

/// Everything a statement needs to mutate rows inside one transaction.
pub struct Mutator<'a> {
    txn: &'a mut Transaction,
    catalog: &'a Catalog,
    constraints: &'a ConstraintHandler,
    planner: &'a dyn ActionPlanner,
    /// Rows whose delete is in progress further up a cascade.
    deleting: HashSet<(TableId, Vec<u8>)>,
}

/// One index entry as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    /// Unique with no NULL segment: the key alone identifies the row.
    pub distinct: bool,
}

impl<'a> Mutator<'a> {
    pub fn new(
        txn: &'a mut Transaction,
        catalog: &'a Catalog,
        constraints: &'a ConstraintHandler,
        planner: &'a dyn ActionPlanner,
    ) -> Self {
        Self {
            txn,
            catalog,
            constraints,
            planner,
            deleting: HashSet::new(),
        }
    }

    pub fn txn(&mut self) -> &mut Transaction {
        self.txn
    }

    pub fn catalog(&self) -> &'a Catalog {
        self.catalog
    }

    pub fn planner(&self) -> &'a dyn ActionPlanner {
        self.planner
    }

    pub fn insert_row(&mut self, table: &Table, row: Row) -> Result<()> {
        validate_row(table, &row)?;
        let constraints = self.constraints;
        constraints.handle_insert(self, table, &row)?;

        let hkey = self.hkey_for(table, &row)?;
        for index in &table.indexes {
            let entry = index_entry(index, &row, &hkey)?;
            if entry.distinct {
                self.check_unique(table, index, &row, &entry)?;
            }
            self.txn.kv().set(&entry.key, &entry.value)?;
        }
        let value = encode_values(row.iter())?;
        self.txn.kv().set(&row_key(table.root, &hkey), &value)
    }

    /// Replaces the stored row whose primary key matches `old` with `new`.
    pub fn update_row(&mut self, table: &Table, old: &Row, new: Row) -> Result<()> {
        validate_row(table, old)?;
        validate_row(table, &new)?;
        let old_pk = table.primary_key_values(old);
        let old_hkey = self.find_hkey(table, &old_pk)?.ok_or_else(|| missing_row(table, &old_pk))?;
        let stored = self
            .read_row(table, &old_hkey)?
            .ok_or_else(|| missing_row(table, &old_pk))?;

        let constraints = self.constraints;
        constraints.handle_update_pre(self, table, &stored, &new)?;

        let new_hkey = if moves_group_position(table, &stored, &new) {
            self.hkey_for(table, &new)?
        } else {
            old_hkey.clone()
        };
        for index in &table.indexes {
            let before = index_entry(index, &stored, &old_hkey)?;
            let after = index_entry(index, &new, &new_hkey)?;
            if before == after {
                continue;
            }
            self.txn.kv().clear(&before.key)?;
            if after.distinct && before.key != after.key {
                self.check_unique(table, index, &new, &after)?;
            }
            self.txn.kv().set(&after.key, &after.value)?;
        }
        if new_hkey != old_hkey {
            self.txn.kv().clear(&row_key(table.root, &old_hkey))?;
        }
        let value = encode_values(new.iter())?;
        self.txn.kv().set(&row_key(table.root, &new_hkey), &value)?;

        constraints.handle_update_post(self, table, &stored, &new)
    }

    /// Deletes the stored row whose primary key matches `row`. Returns false
    /// when there is no such row, including one already being deleted
    /// further up a cascade.
    pub fn delete_row(&mut self, table: &Table, row: &Row) -> Result<bool> {
        validate_row(table, row)?;
        let pk = table.primary_key_values(row);
        let Some(hkey) = self.find_hkey(table, &pk)? else {
            return Ok(false);
        };
        let marker = (table.id, hkey.clone());
        if !self.deleting.insert(marker.clone()) {
            return Ok(false);
        }
        let result = self.delete_at(table, &hkey);
        self.deleting.remove(&marker);
        result
    }

    fn delete_at(&mut self, table: &Table, hkey: &[u8]) -> Result<bool> {
        let Some(stored) = self.read_row(table, hkey)? else {
            return Ok(false);
        };
        let constraints = self.constraints;
        constraints.handle_delete(self, table, &stored)?;
        for index in &table.indexes {
            let entry = index_entry(index, &stored, hkey)?;
            self.txn.kv().clear(&entry.key)?;
        }
        self.txn.kv().clear(&row_key(table.root, hkey))?;
        Ok(true)
    }

    /// Removes every row of `table` without per-row constraint handling.
    /// Rows of child tables are left in place.
    pub fn truncate_table(&mut self, table: &Table) -> Result<usize> {
        let constraints = self.constraints;
        constraints.handle_truncate(self, table)?;

        let primary = primary_index(table)?;
        let prefix = index_prefix(primary.id);
        let entries = self.txn.kv().get_range(&prefix, &strinc(&prefix)?, None)?;
        for (key, value) in &entries {
            let hkey = entry_hkey(primary, key, value)?;
            self.txn.kv().clear(&row_key(table.root, &hkey))?;
        }
        for index in &table.indexes {
            let prefix = index_prefix(index.id);
            self.txn.kv().clear_range(&prefix, &strinc(&prefix)?)?;
        }
        Ok(entries.len())
    }

    pub fn get_by_pk(&mut self, table: &Table, pk: &[Value]) -> Result<Option<Row>> {
        match self.find_hkey(table, pk)? {
            Some(hkey) => self.read_row(table, &hkey),
            None => Ok(None),
        }
    }

    /// Every row of `table`, in primary key order.
    pub fn scan_table(&mut self, table: &Table) -> Result<Vec<Row>> {
        let primary = primary_index(table)?;
        let prefix = index_prefix(primary.id);
        let end = strinc(&prefix)?;
        let hkeys = self.entry_hkeys(primary, &prefix, &end, None)?;
        self.read_rows(table, hkeys.into_iter().map(|(_, h)| h))
    }

    /// Rows whose leading `index` columns equal `values`.
    pub fn lookup(&mut self, table: &Table, index: &Index, values: &[Value]) -> Result<Vec<Row>> {
        if values.len() > index.columns.len() {
            return Err(Error::Value(format!(
                "Index '{}' has {} column(s), got {} value(s)",
                index.name,
                index.columns.len(),
                values.len()
            )));
        }
        let mut key = index_prefix(index.id);
        key.extend(encode_values(values.iter())?);
        if index.is_point_lookup(values.len()) && !values.iter().any(Value::is_null) {
            let Some(hkey) = self.txn.kv().get(&key)? else {
                return Ok(Vec::new());
            };
            return Ok(self.read_row(table, &hkey)?.into_iter().collect());
        }
        let end = after(&key);
        let hkeys = self.entry_hkeys(index, &key, &end, None)?;
        self.read_rows(table, hkeys.into_iter().map(|(_, h)| h))
    }

    /// Entries of `index` in `[begin, end)` as (entry key, hkey) pairs.
    pub fn entry_hkeys(
        &mut self,
        index: &Index,
        begin: &[u8],
        end: &[u8],
        limit: Option<usize>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let entries = self.txn.kv().get_range(begin, end, limit)?;
        entries
            .into_iter()
            .map(|(key, value)| {
                let hkey = entry_hkey(index, &key, &value)?;
                Ok((key, hkey))
            })
            .collect()
    }

    pub fn read_rows(
        &mut self,
        table: &Table,
        hkeys: impl IntoIterator<Item = Vec<u8>>,
    ) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        for hkey in hkeys {
            if let Some(row) = self.read_row(table, &hkey)? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    pub fn read_row(&mut self, table: &Table, hkey: &[u8]) -> Result<Option<Row>> {
        let Some(bytes) = self.txn.kv().get(&row_key(table.root, hkey))? else {
            return Ok(None);
        };
        let types: Vec<DataType> = table.columns.iter().map(|c| c.dtype.clone()).collect();
        let (row, _) = decode_values(&bytes, &types)?;
        Ok(Some(row))
    }

    /// hkey of the row with primary key `pk`, through the PRIMARY index.
    pub fn find_hkey(&mut self, table: &Table, pk: &[Value]) -> Result<Option<Vec<u8>>> {
        if pk.iter().any(Value::is_null) {
            return Ok(None);
        }
        let primary = primary_index(table)?;
        let mut key = index_prefix(primary.id);
        key.extend(encode_values(pk.iter())?);
        self.txn.kv().get(&key)
    }

    fn hkey_for(&mut self, table: &Table, row: &Row) -> Result<Vec<u8>> {
        let mut hkey = Vec::new();
        if let Some(join) = &table.parent {
            let parent = self.catalog.table(join.parent)?;
            let join_values: Vec<Value> = join.child_columns.iter().map(|c| row[*c].clone()).collect();
            match self.find_hkey(parent, &join_values)? {
                Some(parent_hkey) => hkey.extend(parent_hkey),
                None => hkey.extend(self.orphan_hkey(parent, &join_values)?),
            }
        }
        let mut own = vec![Value::Int(i64::from(table.ordinal))];
        own.extend(table.primary_key_values(row));
        hkey.extend(encode_values(own.iter())?);
        Ok(hkey)
    }

    /// Stand-in parent hkey for a row whose parent does not exist: the
    /// known parent key values, NULL for every higher ancestor's key.
    fn orphan_hkey(&self, parent: &Table, join_values: &[Value]) -> Result<Vec<u8>> {
        let mut values = Vec::new();
        for segment in self.catalog.hkey_columns(parent.id)? {
            values.push(match segment {
                IndexColumn::Ordinal(o) => Value::Int(i64::from(o)),
                IndexColumn::GroupKey { table, column } if table == parent.id => parent
                    .primary_key
                    .iter()
                    .position(|c| *c == column)
                    .and_then(|p| join_values.get(p).cloned())
                    .unwrap_or(Value::Null),
                IndexColumn::GroupKey { .. } | IndexColumn::Key(_) => Value::Null,
            });
        }
        encode_values(values.iter())
    }

    fn check_unique(&mut self, table: &Table, index: &Index, row: &Row, entry: &IndexEntry) -> Result<()> {
        let values: Vec<Value> = index.columns.iter().map(|c| row[*c].clone()).collect();
        let check = PendingCheck::new(
            CheckKind::NonExistence,
            entry.key.clone(),
            None,
            Deferral::Immediate,
            Violation::Duplicate {
                index: format!("{}.{}", table.name, index.name),
                key: format_tuple(&values),
            },
        );
        let target = CheckTarget {
            index: index.id,
            monotonic: index.is_monotonic(table),
        };
        self.txn.add_check(target, check)
    }
}

pub fn validate_row(table: &Table, row: &Row) -> Result<()> {
    if row.len() != table.column_count() {
        return Err(Error::Value(format!(
            "Table '{}' has {} column(s), row has {}",
            table.name,
            table.column_count(),
            row.len()
        )));
    }
    for (value, column) in row.iter().zip(&table.columns) {
        if !value_fits(value, &column.dtype) {
            return Err(Error::Value(format!(
                "Value '{}' does not fit column '{}' of '{}'",
                value_to_string(value),
                column.name,
                table.name
            )));
        }
    }
    Ok(())
}

pub fn index_entry(index: &Index, row: &Row, hkey: &[u8]) -> Result<IndexEntry> {
    let values: Vec<&Value> = index.columns.iter().map(|c| &row[*c]).collect();
    let has_null = values.iter().any(|v| v.is_null());
    let mut key = index_prefix(index.id);
    key.extend(encode_values(values)?);
    if index.unique && !has_null {
        return Ok(IndexEntry {
            key,
            value: hkey.to_vec(),
            distinct: true,
        });
    }
    key.extend_from_slice(hkey);
    Ok(IndexEntry {
        key,
        value: Vec::new(),
        distinct: false,
    })
}

/// Recovers the row hkey from a stored index entry.
pub fn entry_hkey(index: &Index, key: &[u8], value: &[u8]) -> Result<Vec<u8>> {
    if !value.is_empty() {
        return Ok(value.to_vec());
    }
    let segments = key
        .get(PREFIX_LEN..)
        .ok_or_else(|| Error::Codec("index entry key is shorter than its prefix".to_string()))?;
    let used = skip_values(segments, index.columns.len())?;
    Ok(segments[used..].to_vec())
}

fn primary_index(table: &Table) -> Result<&Index> {
    table
        .primary_index()
        .ok_or_else(|| Error::Catalog(format!("Table '{}' has no PRIMARY index", table.name)))
}

fn missing_row(table: &Table, pk: &[Value]) -> Error {
    Error::Value(format!("Row {} not found in '{}'", format_tuple(pk), table.name))
}

/// Whether the update changes the row's primary key or its parent.
fn moves_group_position(table: &Table, old: &Row, new: &Row) -> bool {
    let join = table.parent.iter().flat_map(|p| p.child_columns.iter());
    table
        .primary_key
        .iter()
        .chain(join)
        .any(|c| !values_identical(&old[*c], &new[*c]))
}
