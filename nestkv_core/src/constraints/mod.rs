//! Row-level constraint enforcement.
//!
//! A table's [`Handler`] is derived once per catalog generation from its NOT
//! NULL columns and foreign keys and cached; a table with no constraints
//! caches `None` and every event on it is a no-op.

pub mod foreign_key;
pub mod not_null;
pub mod plan;

pub use foreign_key::ForeignKeyHandler;
pub use not_null::NotNullHandler;
pub use plan::{ActionPlan, ActionPlanner, RowActionPlanner};

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::Result;
use crate::rows::Mutator;
use crate::schema::{Catalog, Table, TableId};
use crate::types::Row;

#[derive(Debug)]
pub enum Handler {
    NotNull(NotNullHandler),
    ForeignKey(ForeignKeyHandler),
    Compound(Vec<Handler>),
}

impl Handler {
    /// `None` when the table has nothing to enforce.
    pub fn build(catalog: &Catalog, table: &Table) -> Result<Option<Handler>> {
        let mut handlers = Vec::new();
        if let Some(not_null) = NotNullHandler::build(table) {
            handlers.push(Handler::NotNull(not_null));
        }
        for fk in catalog.foreign_keys_for(table.id) {
            handlers.push(Handler::ForeignKey(ForeignKeyHandler::build(catalog, fk, table.id)?));
        }
        Ok(match handlers.len() {
            0 => None,
            1 => handlers.pop(),
            _ => Some(Handler::Compound(handlers)),
        })
    }

    pub fn handle_insert(&self, m: &mut Mutator<'_>, row: &Row) -> Result<()> {
        match self {
            Handler::NotNull(h) => h.check_row(row),
            Handler::ForeignKey(h) => h.handle_insert(m, row),
            Handler::Compound(hs) => hs.iter().try_for_each(|h| h.handle_insert(m, row)),
        }
    }

    pub fn handle_update_pre(&self, m: &mut Mutator<'_>, old: &Row, new: &Row) -> Result<()> {
        match self {
            Handler::NotNull(h) => h.check_row(new),
            Handler::ForeignKey(h) => h.handle_update_pre(m, old, new),
            Handler::Compound(hs) => hs.iter().try_for_each(|h| h.handle_update_pre(m, old, new)),
        }
    }

    pub fn handle_update_post(&self, m: &mut Mutator<'_>, old: &Row, new: &Row) -> Result<()> {
        match self {
            Handler::NotNull(_) => Ok(()),
            Handler::ForeignKey(h) => h.handle_update_post(m, old, new),
            Handler::Compound(hs) => hs.iter().try_for_each(|h| h.handle_update_post(m, old, new)),
        }
    }

    pub fn handle_delete(&self, m: &mut Mutator<'_>, row: &Row) -> Result<()> {
        match self {
            Handler::NotNull(_) => Ok(()),
            Handler::ForeignKey(h) => h.handle_delete(m, row),
            Handler::Compound(hs) => hs.iter().try_for_each(|h| h.handle_delete(m, row)),
        }
    }

    pub fn handle_truncate(&self, m: &mut Mutator<'_>) -> Result<()> {
        match self {
            Handler::NotNull(_) => Ok(()),
            Handler::ForeignKey(h) => h.handle_truncate(m),
            Handler::Compound(hs) => hs.iter().try_for_each(|h| h.handle_truncate(m)),
        }
    }
}

/// Entry point for the row pipeline: resolves the cached handler of a table
/// under the mutator's catalog and dispatches the event to it. Only the
/// installed catalog generation is cached; older snapshots still held by a
/// session get a handler built per call.
#[derive(Debug)]
pub struct ConstraintHandler {
    cache: DashMap<(u64, TableId), Option<Arc<Handler>>>,
    current: AtomicU64,
}

impl ConstraintHandler {
    pub fn new(generation: u64) -> Self {
        Self {
            cache: DashMap::new(),
            current: AtomicU64::new(generation),
        }
    }

    fn handler(&self, catalog: &Catalog, table: &Table) -> Result<Option<Arc<Handler>>> {
        let generation = catalog.generation();
        let key = (generation, table.id);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }
        let built = Handler::build(catalog, table)?.map(Arc::new);
        if generation != self.current.load(Ordering::SeqCst) {
            return Ok(built);
        }
        let handler = self.cache.entry(key).or_insert(built).value().clone();
        // A catalog installed meanwhile has already swept the cache.
        if generation != self.current.load(Ordering::SeqCst) {
            self.cache.remove(&key);
        }
        Ok(handler)
    }

    pub fn handle_insert(&self, m: &mut Mutator<'_>, table: &Table, row: &Row) -> Result<()> {
        match self.handler(m.catalog(), table)? {
            Some(h) => h.handle_insert(m, row),
            None => Ok(()),
        }
    }

    pub fn handle_update_pre(&self, m: &mut Mutator<'_>, table: &Table, old: &Row, new: &Row) -> Result<()> {
        match self.handler(m.catalog(), table)? {
            Some(h) => h.handle_update_pre(m, old, new),
            None => Ok(()),
        }
    }

    pub fn handle_update_post(&self, m: &mut Mutator<'_>, table: &Table, old: &Row, new: &Row) -> Result<()> {
        match self.handler(m.catalog(), table)? {
            Some(h) => h.handle_update_post(m, old, new),
            None => Ok(()),
        }
    }

    pub fn handle_delete(&self, m: &mut Mutator<'_>, table: &Table, row: &Row) -> Result<()> {
        match self.handler(m.catalog(), table)? {
            Some(h) => h.handle_delete(m, row),
            None => Ok(()),
        }
    }

    pub fn handle_truncate(&self, m: &mut Mutator<'_>, table: &Table) -> Result<()> {
        match self.handler(m.catalog(), table)? {
            Some(h) => h.handle_truncate(m),
            None => Ok(()),
        }
    }

    /// Makes `generation` the only cacheable one and drops every handler
    /// built under any other.
    pub fn install_generation(&self, generation: u64) {
        self.current.store(generation, Ordering::SeqCst);
        self.cache.retain(|(g, _), _| *g == generation);
    }

    /// Number of cached (generation, table) entries.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}
