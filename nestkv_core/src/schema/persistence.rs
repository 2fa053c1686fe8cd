use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{
    foreign_key_action_to_string, parse_foreign_key_action, Catalog, Column, ForeignKey, Index,
    ParentJoin, Table, TableId,
};
use crate::types::datatype::{datatype_to_string, parse_datatype};
use crate::types::value::{parse_value, value_to_string};

#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    tables: Vec<TableFile>,
    #[serde(default)]
    foreign_keys: Vec<ForeignKeyFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct TableFile {
    id: TableId,
    schema: String,
    name: String,
    ordinal: u32,
    root: TableId,
    columns: Vec<ColumnFile>,
    primary_key: Vec<usize>,
    #[serde(default)]
    parent: Option<ParentFile>,
    indexes: Vec<IndexFile>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColumnFile {
    name: String,
    dtype: String,
    #[serde(default)]
    not_null: bool,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParentFile {
    table: TableId,
    child_columns: Vec<usize>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexFile {
    id: u32,
    name: String,
    columns: Vec<usize>,
    unique: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ForeignKeyFile {
    name: String,
    referencing_table: TableId,
    referencing_columns: Vec<usize>,
    referencing_index: u32,
    referenced_table: TableId,
    referenced_columns: Vec<usize>,
    referenced_index: u32,
    on_update: String,
    on_delete: String,
    #[serde(default)]
    deferrable: bool,
    #[serde(default)]
    initially_deferred: bool,
}

impl Catalog {
    pub fn to_json(&self) -> Result<String> {
        let tables = self
            .tables()
            .map(|t| TableFile {
                id: t.id,
                schema: t.schema.clone(),
                name: t.name.clone(),
                ordinal: t.ordinal,
                root: t.root,
                columns: t
                    .columns
                    .iter()
                    .map(|c| ColumnFile {
                        name: c.name.clone(),
                        dtype: datatype_to_string(&c.dtype),
                        not_null: c.not_null,
                        default: c.default.as_ref().map(value_to_string),
                    })
                    .collect(),
                primary_key: t.primary_key.clone(),
                parent: t.parent.as_ref().map(|p| ParentFile {
                    table: p.parent,
                    child_columns: p.child_columns.clone(),
                }),
                indexes: t
                    .indexes
                    .iter()
                    .map(|i| IndexFile {
                        id: i.id,
                        name: i.name.clone(),
                        columns: i.columns.clone(),
                        unique: i.unique,
                    })
                    .collect(),
            })
            .collect();
        let foreign_keys = self
            .foreign_keys()
            .iter()
            .map(|fk| ForeignKeyFile {
                name: fk.name.clone(),
                referencing_table: fk.referencing_table,
                referencing_columns: fk.referencing_columns.clone(),
                referencing_index: fk.referencing_index,
                referenced_table: fk.referenced_table,
                referenced_columns: fk.referenced_columns.clone(),
                referenced_index: fk.referenced_index,
                on_update: foreign_key_action_to_string(fk.update_action).to_string(),
                on_delete: foreign_key_action_to_string(fk.delete_action).to_string(),
                deferrable: fk.deferrable,
                initially_deferred: fk.initially_deferred,
            })
            .collect();
        serde_json::to_string_pretty(&CatalogFile {
            tables,
            foreign_keys,
        })
        .map_err(|e| Error::Catalog(format!("Failed to serialize catalog as JSON: {e}")))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::new());
        }
        let file: CatalogFile = serde_json::from_str(content)
            .map_err(|e| Error::Catalog(format!("Malformed catalog JSON: {e}")))?;

        let mut tables: BTreeMap<TableId, Table> = BTreeMap::new();
        for t in file.tables {
            let mut columns = Vec::with_capacity(t.columns.len());
            for c in t.columns {
                let dtype = parse_datatype(&c.dtype)?;
                let default = match c.default {
                    Some(token) => Some(parse_value(&dtype, &token)?),
                    None => None,
                };
                columns.push(Column {
                    name: c.name,
                    dtype,
                    not_null: c.not_null,
                    default,
                });
            }
            let indexes = t
                .indexes
                .into_iter()
                .map(|i| Index {
                    id: i.id,
                    table: t.id,
                    name: i.name,
                    columns: i.columns,
                    unique: i.unique,
                    hkey_columns: Vec::new(),
                })
                .collect();
            tables.insert(
                t.id,
                Table {
                    id: t.id,
                    schema: t.schema,
                    name: t.name,
                    ordinal: t.ordinal,
                    root: t.root,
                    columns,
                    primary_key: t.primary_key,
                    parent: t.parent.map(|p| ParentJoin {
                        parent: p.table,
                        child_columns: p.child_columns,
                    }),
                    indexes,
                },
            );
        }

        let mut foreign_keys = Vec::with_capacity(file.foreign_keys.len());
        for fk in file.foreign_keys {
            let update_action = parse_foreign_key_action(&fk.on_update).ok_or_else(|| {
                Error::Catalog(format!("Unknown foreign key action '{}'", fk.on_update))
            })?;
            let delete_action = parse_foreign_key_action(&fk.on_delete).ok_or_else(|| {
                Error::Catalog(format!("Unknown foreign key action '{}'", fk.on_delete))
            })?;
            foreign_keys.push(ForeignKey {
                name: fk.name,
                referencing_table: fk.referencing_table,
                referencing_columns: fk.referencing_columns,
                referencing_index: fk.referencing_index,
                referenced_table: fk.referenced_table,
                referenced_columns: fk.referenced_columns,
                referenced_index: fk.referenced_index,
                update_action,
                delete_action,
                deferrable: fk.deferrable,
                initially_deferred: fk.initially_deferred,
            });
        }

        let mut catalog = Catalog::from_parts(tables, foreign_keys);
        catalog.rebuild_hkey_columns()?;
        Ok(catalog)
    }

    /// Saves catalog metadata to disk.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let payload = self.to_json()?;
        fs::write(path, payload)?;
        Ok(())
    }

    /// Loads catalog metadata from disk; a missing or empty file is an empty catalog.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}
