pub mod catalog;
pub mod persistence;

pub use catalog::Catalog;

use crate::types::datatype::DataType;
use crate::types::value::Value;

pub type TableId = u32;
pub type IndexId = u32;

/// Name of the unique index every table gets over its primary key.
pub const PRIMARY_INDEX: &str = "PRIMARY";

/// Represents a single column in a table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub dtype: DataType,
    pub not_null: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, dtype: DataType) -> Self {
        Self {
            name: name.into(),
            dtype,
            not_null: false,
            default: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// How a child table nests under its parent: `child_columns` hold the
/// parent's primary key values, in the parent's primary key order.
#[derive(Debug, Clone)]
pub struct ParentJoin {
    pub parent: TableId,
    pub child_columns: Vec<usize>,
}

/// One segment of an index entry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexColumn {
    /// A declared key column of the indexed table.
    Key(usize),
    /// The ordinal of a table on the path from the group root.
    Ordinal(u32),
    /// A primary key column of a table on the path from the group root.
    GroupKey { table: TableId, column: usize },
}

#[derive(Debug, Clone)]
pub struct Index {
    pub id: IndexId,
    pub table: TableId,
    pub name: String,
    pub columns: Vec<usize>,
    pub unique: bool,
    pub(crate) hkey_columns: Vec<IndexColumn>,
}

impl Index {
    /// Declared key columns followed by the group key columns that make
    /// every entry distinct.
    pub fn all_columns(&self) -> Vec<IndexColumn> {
        let mut out: Vec<IndexColumn> = self.columns.iter().map(|c| IndexColumn::Key(*c)).collect();
        out.extend(self.hkey_columns.iter().cloned());
        out
    }

    /// A unique entry with no NULL key segment is stored without its group
    /// key, so a lookup binding every declared column is a point lookup.
    pub fn is_point_lookup(&self, bound_columns: usize) -> bool {
        self.unique && bound_columns == self.columns.len()
    }

    /// A single integer key column, whose new keys tend to land at the end.
    pub fn is_monotonic(&self, table: &Table) -> bool {
        match self.columns.as_slice() {
            [only] => table.columns.get(*only).is_some_and(|c| c.dtype.is_integer()),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub schema: String,
    pub name: String,
    pub ordinal: u32,
    pub root: TableId,
    pub columns: Vec<Column>,
    pub primary_key: Vec<usize>,
    pub parent: Option<ParentJoin>,
    pub indexes: Vec<Index>,
}

impl Table {
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Positions of the NOT NULL columns, in column order.
    pub fn not_null_columns(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, c)| c.not_null)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn primary_index(&self) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == PRIMARY_INDEX)
    }

    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    pub fn index_named(&self, name: &str) -> Option<&Index> {
        self.indexes.iter().find(|i| i.name == name)
    }

    /// Primary key values of `row`, in key order.
    pub fn primary_key_values(&self, row: &[Value]) -> Vec<Value> {
        self.primary_key.iter().map(|c| row[*c].clone()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyAction {
    NoAction,
    Restrict,
    Cascade,
    SetNull,
    SetDefault,
}

pub fn parse_foreign_key_action(s: &str) -> Option<ForeignKeyAction> {
    match s.to_lowercase().as_str() {
        "no action" => Some(ForeignKeyAction::NoAction),
        "restrict" => Some(ForeignKeyAction::Restrict),
        "cascade" => Some(ForeignKeyAction::Cascade),
        "set null" => Some(ForeignKeyAction::SetNull),
        "set default" => Some(ForeignKeyAction::SetDefault),
        _ => None,
    }
}

pub fn foreign_key_action_to_string(action: ForeignKeyAction) -> &'static str {
    match action {
        ForeignKeyAction::NoAction => "no action",
        ForeignKeyAction::Restrict => "restrict",
        ForeignKeyAction::Cascade => "cascade",
        ForeignKeyAction::SetNull => "set null",
        ForeignKeyAction::SetDefault => "set default",
    }
}

/// Resolved foreign key: column positions refer to the owning tables and the
/// `i`th referencing column pairs with the `i`th referenced column.
#[derive(Debug, Clone)]
pub struct ForeignKey {
    pub name: String,
    pub referencing_table: TableId,
    pub referencing_columns: Vec<usize>,
    pub referencing_index: IndexId,
    pub referenced_table: TableId,
    pub referenced_columns: Vec<usize>,
    pub referenced_index: IndexId,
    pub update_action: ForeignKeyAction,
    pub delete_action: ForeignKeyAction,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl ForeignKey {
    /// (referenced column, referencing column) pairs.
    pub fn join_columns(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.referenced_columns
            .iter()
            .copied()
            .zip(self.referencing_columns.iter().copied())
    }

    pub fn is_self_referencing(&self) -> bool {
        self.referencing_table == self.referenced_table
    }
}

/// Unresolved foreign key definition, by name.
#[derive(Debug, Clone)]
pub struct ForeignKeySpec {
    pub name: String,
    pub referencing_table: String,
    pub referencing_columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
    pub on_update: ForeignKeyAction,
    pub on_delete: ForeignKeyAction,
    pub deferrable: bool,
    pub initially_deferred: bool,
}

impl ForeignKeySpec {
    pub fn new(
        name: impl Into<String>,
        referencing_table: impl Into<String>,
        referencing_columns: &[&str],
        referenced_table: impl Into<String>,
        referenced_columns: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            referencing_table: referencing_table.into(),
            referencing_columns: referencing_columns.iter().map(|c| c.to_string()).collect(),
            referenced_table: referenced_table.into(),
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            on_update: ForeignKeyAction::NoAction,
            on_delete: ForeignKeyAction::NoAction,
            deferrable: false,
            initially_deferred: false,
        }
    }

    pub fn on_delete(mut self, action: ForeignKeyAction) -> Self {
        self.on_delete = action;
        self
    }

    pub fn on_update(mut self, action: ForeignKeyAction) -> Self {
        self.on_update = action;
        self
    }

    pub fn deferrable(mut self, initially_deferred: bool) -> Self {
        self.deferrable = true;
        self.initially_deferred = initially_deferred;
        self
    }
}
