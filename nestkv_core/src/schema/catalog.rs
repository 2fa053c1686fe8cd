use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::schema::{
    Column, ForeignKey, ForeignKeyAction, ForeignKeySpec, Index, IndexColumn, IndexId, ParentJoin,
    Table, TableId, PRIMARY_INDEX,
};

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::SeqCst)
}

/// Table, index and foreign key metadata. Every mutation moves the catalog to
/// a new generation; once shared behind an `Arc` a catalog is a read-only
/// snapshot.
#[derive(Debug, Clone)]
pub struct Catalog {
    generation: u64,
    tables: BTreeMap<TableId, Table>,
    names: HashMap<String, TableId>,
    foreign_keys: Vec<Arc<ForeignKey>>,
    next_table_id: TableId,
    next_index_id: IndexId,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            generation: next_generation(),
            tables: BTreeMap::new(),
            names: HashMap::new(),
            foreign_keys: Vec::new(),
            next_table_id: 1,
            next_index_id: 1,
        }
    }

    pub(crate) fn from_parts(
        tables: BTreeMap<TableId, Table>,
        foreign_keys: Vec<ForeignKey>,
    ) -> Self {
        let names = tables.values().map(|t| (t.name.clone(), t.id)).collect();
        let next_table_id = tables.keys().max().copied().unwrap_or(0) + 1;
        let next_index_id = tables
            .values()
            .flat_map(|t| t.indexes.iter().map(|i| i.id))
            .max()
            .unwrap_or(0)
            + 1;
        Self {
            generation: next_generation(),
            tables,
            names,
            foreign_keys: foreign_keys.into_iter().map(Arc::new).collect(),
            next_table_id,
            next_index_id,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Checks if a table exists in the catalog
    pub fn exists(&self, table: &str) -> bool {
        self.names.contains_key(table)
    }

    pub fn table(&self, id: TableId) -> Result<&Table> {
        self.tables
            .get(&id)
            .ok_or_else(|| Error::Catalog(format!("Table id {id} does not exist")))
    }

    pub fn table_by_name(&self, name: &str) -> Result<&Table> {
        let id = self
            .names
            .get(name)
            .ok_or_else(|| Error::Catalog(format!("Table '{name}' does not exist")))?;
        self.table(*id)
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values()
    }

    pub fn index(&self, id: IndexId) -> Result<&Index> {
        self.tables
            .values()
            .flat_map(|t| t.indexes.iter())
            .find(|i| i.id == id)
            .ok_or_else(|| Error::Catalog(format!("Index id {id} does not exist")))
    }

    pub fn index_by_name(&self, table: &str, name: &str) -> Result<&Index> {
        self.table_by_name(table)?
            .indexes
            .iter()
            .find(|i| i.name == name)
            .ok_or_else(|| Error::Catalog(format!("Index '{name}' on '{table}' does not exist")))
    }

    pub fn foreign_keys(&self) -> &[Arc<ForeignKey>] {
        &self.foreign_keys
    }

    /// Foreign keys where `table` is the referencing side, the referenced
    /// side, or both.
    pub fn foreign_keys_for(&self, table: TableId) -> Vec<Arc<ForeignKey>> {
        self.foreign_keys
            .iter()
            .filter(|fk| fk.referencing_table == table || fk.referenced_table == table)
            .cloned()
            .collect()
    }

    /// Tables from the group root down to `table`, root first.
    pub fn ancestry(&self, table: TableId) -> Result<Vec<&Table>> {
        let mut out = Vec::new();
        let mut current = Some(table);
        while let Some(id) = current {
            let t = self.table(id)?;
            if out.len() > self.tables.len() {
                return Err(Error::Catalog(format!("Cycle in group containing '{}'", t.name)));
            }
            current = t.parent.as_ref().map(|p| p.parent);
            out.push(t);
        }
        out.reverse();
        Ok(out)
    }

    /// Creates a root table. Primary key columns are implicitly NOT NULL.
    pub fn create_table(
        &mut self,
        schema: &str,
        name: &str,
        columns: Vec<Column>,
        primary_key: &[&str],
    ) -> Result<TableId> {
        self.create_table_internal(schema, name, columns, primary_key, None)
    }

    /// Creates a table nested under `parent`; `join_columns` name this
    /// table's columns holding the parent's primary key, in its order.
    pub fn create_child_table(
        &mut self,
        schema: &str,
        name: &str,
        columns: Vec<Column>,
        primary_key: &[&str],
        parent: &str,
        join_columns: &[&str],
    ) -> Result<TableId> {
        let parent_table = self.table_by_name(parent)?;
        if parent_table.primary_key.len() != join_columns.len() {
            return Err(Error::Catalog(format!(
                "Group join to '{}' needs {} column(s), got {}",
                parent,
                parent_table.primary_key.len(),
                join_columns.len()
            )));
        }
        let parent_id = parent_table.id;
        let join = join_columns.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        self.create_table_internal(schema, name, columns, primary_key, Some((parent_id, join)))
    }

    fn create_table_internal(
        &mut self,
        schema: &str,
        name: &str,
        mut columns: Vec<Column>,
        primary_key: &[&str],
        parent: Option<(TableId, Vec<String>)>,
    ) -> Result<TableId> {
        if self.exists(name) {
            return Err(Error::Catalog(format!("Table '{}' already exists", name)));
        }
        if columns.is_empty() {
            return Err(Error::Catalog(format!("Table '{}' has no columns", name)));
        }
        if primary_key.is_empty() {
            return Err(Error::Catalog(format!("Table '{}' needs a PRIMARY KEY", name)));
        }
        let mut pk = Vec::with_capacity(primary_key.len());
        for c in primary_key {
            let idx = columns
                .iter()
                .position(|col| col.name == *c)
                .ok_or_else(|| Error::Catalog(format!("PRIMARY KEY references unknown column '{}'", c)))?;
            columns[idx].not_null = true;
            pk.push(idx);
        }
        let parent = match parent {
            None => None,
            Some((parent_id, join)) => {
                let mut child_columns = Vec::with_capacity(join.len());
                for c in &join {
                    let idx = columns
                        .iter()
                        .position(|col| col.name == *c)
                        .ok_or_else(|| Error::Catalog(format!("Group join references unknown column '{}'", c)))?;
                    child_columns.push(idx);
                }
                Some(ParentJoin {
                    parent: parent_id,
                    child_columns,
                })
            }
        };

        let id = self.next_table_id;
        self.next_table_id += 1;
        let (root, ordinal) = match &parent {
            Some(p) => {
                let parent_table = self.table(p.parent)?;
                let siblings = self
                    .tables
                    .values()
                    .filter(|t| t.root == parent_table.root)
                    .count() as u32;
                (parent_table.root, siblings + 1)
            }
            None => (id, 1),
        };
        let table = Table {
            id,
            schema: schema.to_string(),
            name: name.to_string(),
            ordinal,
            root,
            columns,
            primary_key: pk.clone(),
            parent,
            indexes: Vec::new(),
        };
        self.tables.insert(id, table);
        self.names.insert(name.to_string(), id);
        self.push_index(id, PRIMARY_INDEX, pk, true)?;
        self.generation = next_generation();
        Ok(id)
    }

    pub fn add_index(
        &mut self,
        table: &str,
        name: &str,
        columns: &[&str],
        unique: bool,
    ) -> Result<IndexId> {
        let t = self.table_by_name(table)?;
        if columns.is_empty() {
            return Err(Error::Catalog("INDEX column list cannot be empty".to_string()));
        }
        if t.indexes.iter().any(|i| i.name == name) {
            return Err(Error::Catalog(format!("INDEX '{}' on '{}' already exists", name, table)));
        }
        let mut positions = Vec::with_capacity(columns.len());
        for c in columns {
            let idx = t
                .column_position(c)
                .ok_or_else(|| Error::Catalog(format!("INDEX references unknown column '{}'", c)))?;
            positions.push(idx);
        }
        let table_id = t.id;
        let id = self.push_index(table_id, name, positions, unique)?;
        self.generation = next_generation();
        Ok(id)
    }

    fn push_index(
        &mut self,
        table: TableId,
        name: &str,
        columns: Vec<usize>,
        unique: bool,
    ) -> Result<IndexId> {
        let hkey_columns = self.hkey_columns(table)?;
        let id = self.next_index_id;
        self.next_index_id += 1;
        let t = self
            .tables
            .get_mut(&table)
            .ok_or_else(|| Error::Catalog(format!("Table id {table} does not exist")))?;
        t.indexes.push(Index {
            id,
            table,
            name: name.to_string(),
            columns,
            unique,
            hkey_columns,
        });
        Ok(id)
    }

    pub(crate) fn rebuild_hkey_columns(&mut self) -> Result<()> {
        let ids: Vec<TableId> = self.tables.keys().copied().collect();
        for id in ids {
            let hkey = self.hkey_columns(id)?;
            if let Some(t) = self.tables.get_mut(&id) {
                for index in &mut t.indexes {
                    index.hkey_columns = hkey.clone();
                }
            }
        }
        Ok(())
    }

    pub(crate) fn hkey_columns(&self, table: TableId) -> Result<Vec<IndexColumn>> {
        let mut out = Vec::new();
        for t in self.ancestry(table)? {
            out.push(IndexColumn::Ordinal(t.ordinal));
            for c in &t.primary_key {
                out.push(IndexColumn::GroupKey {
                    table: t.id,
                    column: *c,
                });
            }
        }
        Ok(out)
    }

    pub fn add_foreign_key(&mut self, spec: ForeignKeySpec) -> Result<()> {
        if self.foreign_keys.iter().any(|fk| fk.name == spec.name) {
            return Err(Error::Catalog(format!(
                "FOREIGN KEY constraint '{}' already exists",
                spec.name
            )));
        }
        if spec.referencing_columns.is_empty() || spec.referenced_columns.is_empty() {
            return Err(Error::Catalog("FOREIGN KEY column list cannot be empty".to_string()));
        }
        if spec.referencing_columns.len() != spec.referenced_columns.len() {
            return Err(Error::Catalog(
                "FOREIGN KEY column count must match referenced column count".to_string(),
            ));
        }
        let child = self.table_by_name(&spec.referencing_table)?;
        let mut referencing_columns = Vec::with_capacity(spec.referencing_columns.len());
        for c in &spec.referencing_columns {
            let idx = child
                .column_position(c)
                .ok_or_else(|| Error::Catalog(format!("FOREIGN KEY references unknown column '{}'", c)))?;
            referencing_columns.push(idx);
        }
        for action in [spec.on_delete, spec.on_update] {
            if action != ForeignKeyAction::SetNull {
                continue;
            }
            for c in &referencing_columns {
                if child.columns[*c].not_null {
                    return Err(Error::Catalog(format!(
                        "FOREIGN KEY SET NULL requires nullable child column '{}'",
                        child.columns[*c].name
                    )));
                }
            }
        }
        for action in [spec.on_delete, spec.on_update] {
            if action != ForeignKeyAction::SetDefault {
                continue;
            }
            for c in &referencing_columns {
                let col = &child.columns[*c];
                if col.not_null && col.default.is_none() {
                    return Err(Error::Catalog(format!(
                        "FOREIGN KEY SET DEFAULT requires a default or nullable child column '{}'",
                        col.name
                    )));
                }
            }
        }

        let parent = self.table_by_name(&spec.referenced_table).map_err(|_| {
            Error::Catalog(format!(
                "FOREIGN KEY references unknown table '{}'",
                spec.referenced_table
            ))
        })?;
        let mut referenced_columns = Vec::with_capacity(spec.referenced_columns.len());
        for c in &spec.referenced_columns {
            let idx = parent.column_position(c).ok_or_else(|| {
                Error::Catalog(format!(
                    "FOREIGN KEY references unknown parent column '{}.{}'",
                    spec.referenced_table, c
                ))
            })?;
            referenced_columns.push(idx);
        }
        let referenced_index = parent
            .indexes
            .iter()
            .find(|i| i.unique && same_column_set(&i.columns, &referenced_columns))
            .map(|i| i.id)
            .ok_or_else(|| {
                Error::Catalog(format!(
                    "FOREIGN KEY reference {}({}) must target PRIMARY KEY or UNIQUE columns",
                    spec.referenced_table,
                    spec.referenced_columns.join(",")
                ))
            })?;
        for (child_col, parent_col) in referencing_columns.iter().zip(referenced_columns.iter()) {
            let a = &child.columns[*child_col].dtype;
            let b = &parent.columns[*parent_col].dtype;
            if !(a == b || (a.is_integer() && b.is_integer()) || (is_text(a) && is_text(b))) {
                return Err(Error::Catalog(format!(
                    "FOREIGN KEY column '{}' type {:?} is not comparable to {:?}",
                    child.columns[*child_col].name, a, b
                )));
            }
        }

        let child_id = child.id;
        let parent_id = parent.id;
        let existing = child
            .indexes
            .iter()
            .find(|i| {
                i.columns.len() >= referencing_columns.len()
                    && same_column_set(&i.columns[..referencing_columns.len()], &referencing_columns)
            })
            .map(|i| i.id);
        let referencing_index = match existing {
            Some(id) => id,
            None => {
                let name = format!("{}__fkey", spec.name);
                self.push_index(child_id, &name, referencing_columns.clone(), false)?
            }
        };

        self.foreign_keys.push(Arc::new(ForeignKey {
            name: spec.name,
            referencing_table: child_id,
            referencing_columns,
            referencing_index,
            referenced_table: parent_id,
            referenced_columns,
            referenced_index,
            update_action: spec.on_update,
            delete_action: spec.on_delete,
            deferrable: spec.deferrable,
            initially_deferred: spec.deferrable && spec.initially_deferred,
        }));
        self.generation = next_generation();
        Ok(())
    }

    pub fn drop_foreign_key(&mut self, name: &str) -> Result<()> {
        let before = self.foreign_keys.len();
        self.foreign_keys.retain(|fk| fk.name != name);
        if self.foreign_keys.len() == before {
            return Err(Error::Catalog(format!("FOREIGN KEY constraint '{}' does not exist", name)));
        }
        self.generation = next_generation();
        Ok(())
    }
}

fn same_column_set(a: &[usize], b: &[usize]) -> bool {
    a.len() == b.len() && a.iter().all(|c| b.contains(c))
}

fn is_text(dtype: &crate::types::datatype::DataType) -> bool {
    use crate::types::datatype::DataType;
    matches!(dtype, DataType::Text | DataType::VarChar(_))
}
