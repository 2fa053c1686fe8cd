use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

pub mod checks;
pub mod codec;
pub mod config;
pub mod constraints;
pub mod error;
pub mod rows;
pub mod schema;
pub mod session;
pub mod store;
pub mod txn;
pub mod types;

pub use error::{Error, Result};
pub use session::Session;

use checks::{CheckMetrics, CheckTime};
use config::StoreConfig;
use constraints::{ActionPlanner, ConstraintHandler, RowActionPlanner};
use schema::Catalog;
use store::{EmbeddedStore, KvStore, MemoryStore, NetworkStore};
use txn::TransactionService;

const CATALOG_FILE: &str = "catalog.json";

/// A catalog snapshot bound to one key-value store.
#[derive(Clone)]
pub struct Database {
    pub(crate) inner: Arc<DatabaseInner>,
}

pub(crate) struct DatabaseInner {
    pub(crate) service: TransactionService,
    catalog: RwLock<Arc<Catalog>>,
    pub(crate) constraints: ConstraintHandler,
    pub(crate) planner: Arc<dyn ActionPlanner>,
    catalog_path: Option<PathBuf>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("service", &self.inner.service)
            .field("generation", &self.catalog().generation())
            .field("catalog_path", &self.inner.catalog_path)
            .finish()
    }
}

impl Database {
    pub fn open_memory(config: StoreConfig) -> Result<Self> {
        let store = MemoryStore::new(&config);
        Self::with_store(Arc::new(store), config)
    }

    /// Opens (creating if needed) an embedded store under `root`, with the
    /// catalog kept next to it in `catalog.json`.
    pub fn open_embedded(root: impl Into<PathBuf>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let root = root.into();
        let store = EmbeddedStore::open(&root, &config)?;
        let path = root.join(CATALOG_FILE);
        let catalog = if path.exists() {
            Catalog::load_from_path(&path)?
        } else {
            Catalog::new()
        };
        let db = Self::build(Arc::new(store), config, Arc::new(RowActionPlanner), catalog, Some(path))?;
        tracing::info!(root = %root.display(), "opened embedded database");
        Ok(db)
    }

    pub fn open_network(store: NetworkStore, config: StoreConfig) -> Result<Self> {
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<dyn KvStore>, config: StoreConfig) -> Result<Self> {
        Self::with_planner(store, config, Arc::new(RowActionPlanner))
    }

    pub fn with_planner(
        store: Arc<dyn KvStore>,
        config: StoreConfig,
        planner: Arc<dyn ActionPlanner>,
    ) -> Result<Self> {
        Self::build(store, config, planner, Catalog::new(), None)
    }

    fn build(
        store: Arc<dyn KvStore>,
        config: StoreConfig,
        planner: Arc<dyn ActionPlanner>,
        catalog: Catalog,
        catalog_path: Option<PathBuf>,
    ) -> Result<Self> {
        config.validate()?;
        let constraints = ConstraintHandler::new(catalog.generation());
        Ok(Self {
            inner: Arc::new(DatabaseInner {
                service: TransactionService::new(store, config),
                catalog: RwLock::new(Arc::new(catalog)),
                constraints,
                planner,
                catalog_path,
            }),
        })
    }

    /// The current catalog snapshot.
    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner.catalog.read().clone()
    }

    /// Replaces the catalog snapshot, persisting it first when the database
    /// lives on disk. Handlers cached for the old snapshot are dropped.
    pub fn install_catalog(&self, catalog: Catalog) -> Result<()> {
        if let Some(path) = &self.inner.catalog_path {
            catalog.save_to_path(path)?;
        }
        let mut current = self.inner.catalog.write();
        self.inner.constraints.install_generation(catalog.generation());
        *current = Arc::new(catalog);
        Ok(())
    }

    /// Applies `f` to a copy of the current catalog and installs the result.
    pub fn update_catalog<T>(&self, f: impl FnOnce(&mut Catalog) -> Result<T>) -> Result<T> {
        let mut next = Catalog::clone(&self.catalog());
        let out = f(&mut next)?;
        self.install_catalog(next)?;
        Ok(out)
    }

    pub fn session(&self) -> Session {
        Session::new(self.clone())
    }

    pub fn metrics(&self) -> Arc<CheckMetrics> {
        self.inner.service.metrics()
    }

    pub fn backend(&self) -> &'static str {
        self.inner.service.backend()
    }

    pub fn check_time(&self) -> CheckTime {
        self.inner.service.check_time()
    }

    pub fn config(&self) -> &StoreConfig {
        self.inner.service.config()
    }

    pub fn catalog_path(&self) -> Option<&Path> {
        self.inner.catalog_path.as_deref()
    }
}
