use crate::error::{Error, Result};
use crate::schema::Table;
use crate::types::Row;

/// Rejects rows with NULL in any NOT NULL column.
#[derive(Debug, Clone)]
pub struct NotNullHandler {
    schema: String,
    table: String,
    columns: Vec<(usize, String)>,
}

impl NotNullHandler {
    pub fn build(table: &Table) -> Option<Self> {
        let columns: Vec<(usize, String)> = table
            .not_null_columns()
            .into_iter()
            .map(|i| (i, table.columns[i].name.clone()))
            .collect();
        if columns.is_empty() {
            return None;
        }
        Some(Self {
            schema: table.schema.clone(),
            table: table.name.clone(),
            columns,
        })
    }

    /// Fails on the first NOT NULL column holding NULL, in column order.
    pub fn check_row(&self, row: &Row) -> Result<()> {
        for (position, name) in &self.columns {
            if row.get(*position).is_none_or(|v| v.is_null()) {
                return Err(Error::NotNullViolation {
                    schema: self.schema.clone(),
                    table: self.table.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }
}
